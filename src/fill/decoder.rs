//! `FillDecoder`: phase 2 of the two-phase decode. Walks the same cluster
//! order the alloc pass already counted, this time reading each object's
//! field data per its `FillSpec` (spec §4.5/§4.6).
//!
//! Grounded on `src/id0.rs::IDBFunction::read`/`EntryPointRaw::read` (small
//! per-kind read functions keyed off a tag byte, composed from lower-level
//! unpack helpers) and `src/til/function.rs`'s "N refs then a scalar tail"
//! shape. Unlike the alloc pass, fill errors are fatal (spec §7): there is
//! no cluster-level resync point once a schema mismatch is hit, so
//! `FillDecoder::run` returns `Err` immediately rather than a partial
//! `FillOutput`.

use std::collections::HashMap;

use crate::alloc::{AllocAux, AllocKind, ClusterAlloc};
use crate::diagnostics::Diags;
use crate::fill::spec::{FillKind, FillSpec, FillSpecRegistry, ScalarOp};
use crate::options::Options;
use crate::stream::{Stream, StreamError};
use crate::version::{Cid, VersionProfile};

#[derive(Debug)]
pub enum FillError {
    Stream(StreamError),
    SchemaMismatch { cid: Cid, ref_id: u64, message: String },
}

impl std::fmt::Display for FillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillError::Stream(e) => write!(f, "stream error during fill: {e}"),
            FillError::SchemaMismatch { cid, ref_id, message } => {
                write!(f, "schema mismatch filling ref {ref_id} (cid {cid}): {message}")
            }
        }
    }
}

impl std::error::Error for FillError {}

impl From<StreamError> for FillError {
    fn from(e: StreamError) -> Self {
        FillError::Stream(e)
    }
}

pub type FillResult<T> = Result<T, FillError>;

/// A decoded object's ref fields and scalar tail, generic over `FillKind`.
/// Name/owner/signature extraction (when `FillSpec` names an index) is
/// resolved against `refs` once all objects are filled, since a ref may
/// point forward to an object not yet decoded.
#[derive(Debug, Clone, Default)]
pub struct FilledObject {
    pub cid: Cid,
    pub refs: Vec<i64>,
    pub scalars: Vec<i64>,
    pub bytes: Option<Vec<u8>>,
    pub string_value: Option<String>,
    pub double_value: Option<f64>,
    pub rodata_offset: Option<u32>,
    pub rodata_length: Option<u32>,
    /// `FunctionType`'s decomposed `packed_parameter_counts` (spec §4.6):
    /// `(has_implicit_this, fixed_count, optional_count)`.
    pub packed_parameter_counts: Option<(bool, u32, u32)>,
    /// `Field`'s `kind_bits` scalar.
    pub field_kind_bits: Option<i64>,
    /// `Field`'s `host_offset_or_field_id`; `None` offset reads as -1 for
    /// static fields per spec §4.6.
    pub field_host_offset_or_id: Option<i64>,
    pub field_is_static: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FillOutput {
    pub objects: HashMap<u64, FilledObject>,
}

impl FillOutput {
    pub fn get(&self, ref_id: i64) -> Option<&FilledObject> {
        if ref_id <= 0 {
            return None;
        }
        self.objects.get(&(ref_id as u64))
    }

    pub fn name_of(&self, ref_id: i64) -> Option<&str> {
        self.get(ref_id).and_then(|o| o.string_value.as_deref())
    }
}

/// Per-run mutable state threaded through `fill_one` that can't be derived
/// from a single cluster/object in isolation (spec §4.6 Code: a running
/// `instructions_index` shared across every `Code` cluster in the pass).
#[derive(Default)]
struct FillState {
    instructions_index: i64,
}

pub struct FillDecoder<'a> {
    profile: &'a VersionProfile,
    opts: &'a Options,
}

impl<'a> FillDecoder<'a> {
    pub fn new(profile: &'a VersionProfile, opts: &'a Options) -> Self {
        Self { profile, opts }
    }

    /// `rodata` is the whole snapshot byte slice plus the byte offset
    /// within it where the data image begins (spec §4.7's data-image
    /// location algorithm); it is only consulted for `String` clusters in
    /// ROData mode (`!profile.old_string_format`).
    pub fn run(
        &self,
        stream: &mut Stream<'_>,
        clusters: &[ClusterAlloc],
        _diags: &mut Diags,
        rodata: Option<(&[u8], u64)>,
    ) -> FillResult<FillOutput> {
        let mut out = FillOutput::default();
        let mut state = FillState::default();
        for cluster in clusters {
            let fill_spec = FillSpecRegistry::resolve(cluster.cid, self.profile);

            // Instance's unboxed-fields bitmap is read once per cluster,
            // not once per object (spec §4.6).
            let instance_bitmap = if fill_spec.kind == FillKind::Instance {
                if self.profile.pre_canonical_split {
                    Some(0u64)
                } else {
                    Some(stream.read_unsigned()?)
                }
            } else {
                None
            };

            for (obj_index, ref_id) in cluster.ref_ids().enumerate() {
                crate::trace_fill!(self.opts, "fill ref {ref_id} cid {} kind {:?}", cluster.cid, fill_spec.kind);
                let obj = self.fill_one(
                    cluster,
                    &fill_spec,
                    obj_index as u64,
                    ref_id,
                    stream,
                    &mut state,
                    instance_bitmap,
                    rodata,
                )?;
                out.objects.insert(ref_id, obj);
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_one(
        &self,
        cluster: &ClusterAlloc,
        spec: &FillSpec,
        obj_index: u64,
        ref_id: u64,
        stream: &mut Stream<'_>,
        state: &mut FillState,
        instance_bitmap: Option<u64>,
        rodata: Option<(&[u8], u64)>,
    ) -> FillResult<FilledObject> {
        let mut obj = FilledObject { cid: cluster.cid, ..Default::default() };

        match spec.kind {
            FillKind::None | FillKind::Sentinel | FillKind::ROData | FillKind::InstructionsTable => {}

            FillKind::InlineBytes => {
                let len = stream.read_unsigned()?;
                obj.bytes = Some(stream.bytes(len as usize)?.to_vec());
            }

            FillKind::String => {
                if self.profile.old_string_format {
                    obj.string_value = Some(self.read_compressed_string(cluster.cid, stream)?);
                } else {
                    obj.string_value = Some(self.read_rodata_string(cluster, obj_index, rodata, ref_id)?);
                }
            }

            FillKind::Double => {
                if spec.leading_bool {
                    stream.byte()?;
                }
                obj.double_value = Some(f64::from_bits(stream.read_tagged64()? as u64));
            }

            FillKind::Refs | FillKind::Record => {
                self.fill_refs_and_scalars(spec, stream, &mut obj)?;
            }

            FillKind::Field => {
                self.fill_refs_and_scalars(spec, stream, &mut obj)?;
                if let [kind_bits, host_offset_or_id] = obj.scalars[..] {
                    obj.field_kind_bits = Some(kind_bits);
                    obj.field_is_static = kind_bits & 0b10 != 0;
                    obj.field_host_offset_or_id = if obj.field_is_static { Some(-1) } else { Some(host_offset_or_id) };
                }
            }

            FillKind::Class => {
                self.fill_class(cluster, spec, obj_index, stream, &mut obj)?;
            }

            FillKind::Code => {
                self.fill_code(cluster, spec, obj_index, stream, state, &mut obj)?;
            }

            FillKind::ObjectPool => {
                self.fill_object_pool(stream, &mut obj)?;
            }

            FillKind::Array => {
                self.fill_array(cluster, obj_index, stream, &mut obj)?;
            }

            FillKind::WeakArray => {
                let len = stream.read_unsigned()?;
                for _ in 0..len {
                    obj.refs.push(self.read_ref(stream)?);
                }
            }

            FillKind::TypeArguments => {
                self.fill_type_arguments(cluster, obj_index, stream, &mut obj)?;
            }

            FillKind::TypedData => {
                let len = stream.read_unsigned()?;
                obj.bytes = Some(stream.bytes(len as usize)?.to_vec());
            }

            FillKind::ExceptionHandlers => {
                obj.refs.push(self.read_ref(stream)?);
                obj.refs.push(self.read_ref(stream)?);
            }

            FillKind::Context => {
                obj.refs.push(self.read_ref(stream)?);
                obj.scalars.push(stream.read_tagged32()? as i64);
            }

            FillKind::ContextScope => {
                // approximate schema: spec.md's own source notes this
                // cluster should not appear in AOT snapshots at all (see
                // DESIGN.md Open Question); 7 pointer fields per entry.
                for _ in 0..7 {
                    obj.refs.push(self.read_ref(stream)?);
                }
            }

            FillKind::Instance => {
                self.fill_instance(cluster, spec, instance_bitmap.unwrap_or(0), stream, &mut obj)?;
            }
        }

        if matches!(cluster.kind, AllocKind::Unknown) {
            return Err(FillError::SchemaMismatch {
                cid: cluster.cid,
                ref_id,
                message: "no fill schema for unrecognized cid".into(),
            });
        }

        Ok(obj)
    }

    fn read_ref(&self, stream: &mut Stream<'_>) -> FillResult<i64> {
        if self.profile.new_ref_encoding {
            Ok(stream.read_ref_id()?)
        } else {
            Ok(stream.read_unsigned()? as i64)
        }
    }

    fn read_scalar(&self, stream: &mut Stream<'_>, op: ScalarOp) -> FillResult<i64> {
        Ok(match op {
            ScalarOp::Tagged32 => stream.read_tagged32()? as i64,
            ScalarOp::Tagged64 => stream.read_tagged64()?,
            ScalarOp::Unsigned => stream.read_unsigned()? as i64,
            ScalarOp::Bool => (stream.byte()? != 0) as i64,
            ScalarOp::U8 => stream.byte()? as i64,
            ScalarOp::I8 => stream.byte()? as i8 as i64,
            ScalarOp::U16 => stream.read_tagged32()? as u16 as i64,
            ScalarOp::I16 => stream.read_tagged32()? as i16 as i64,
            ScalarOp::RefId => stream.read_ref_id()?,
        })
    }

    fn fill_refs_and_scalars(&self, spec: &FillSpec, stream: &mut Stream<'_>, obj: &mut FilledObject) -> FillResult<()> {
        if spec.leading_bool {
            stream.byte()?;
        }
        for _ in 0..spec.num_refs {
            obj.refs.push(self.read_ref(stream)?);
        }
        for &op in &spec.scalars {
            obj.scalars.push(self.read_scalar(stream, op)?);
        }
        if spec.is_func_type {
            if let Some(&packed) = obj.scalars.get(1) {
                let packed = packed as u32;
                obj.packed_parameter_counts =
                    Some((packed & 1 != 0, (packed >> 1) & 0x3FFF, (packed >> 15) & 0x3FFF));
            }
        }
        Ok(())
    }

    fn fill_class(
        &self,
        cluster: &ClusterAlloc,
        spec: &FillSpec,
        obj_index: u64,
        stream: &mut Stream<'_>,
        obj: &mut FilledObject,
    ) -> FillResult<()> {
        self.fill_refs_and_scalars(spec, stream, obj)?;
        let class_id = obj.scalars.first().copied().unwrap_or(0);

        let predefined_count = match &cluster.aux {
            AllocAux::ClassCids(cids) => cids.len() as u64,
            _ => 0,
        };
        let read_bitmap = if obj_index < predefined_count {
            true
        } else {
            (class_id as u32) < self.profile.top_level_cid_offset()
        };
        if read_bitmap {
            stream.read_unsigned()?;
        }
        Ok(())
    }

    fn fill_code(
        &self,
        cluster: &ClusterAlloc,
        spec: &FillSpec,
        obj_index: u64,
        stream: &mut Stream<'_>,
        state: &mut FillState,
        obj: &mut FilledObject,
    ) -> FillResult<()> {
        let (main_count, deferred_state_bits, main_state_bits) = match &cluster.aux {
            AllocAux::Code { main_state_bits, deferred_state_bits, deferred_count } => {
                (cluster.count - deferred_count, deferred_state_bits, main_state_bits)
            }
            _ => (cluster.count, &Vec::new(), &Vec::new()),
        };
        let is_main = obj_index < main_count;

        let discarded_at_alloc = if is_main {
            main_state_bits.get(obj_index as usize).map(|bits| bits & 0b1000 != 0)
        } else {
            deferred_state_bits.get((obj_index - main_count) as usize).map(|bits| bits & 0b1000 != 0)
        }
        .unwrap_or(false);

        if is_main {
            if self.profile.code_text_offset_delta {
                stream.read_unsigned()?;
            }
            stream.read_unsigned()?; // payload_info
            obj.scalars.push(state.instructions_index);
            state.instructions_index += 1;

            if discarded_at_alloc {
                obj.refs.push(self.read_ref(stream)?); // compressed_stackmaps
                return Ok(());
            }
        } else {
            obj.scalars.push(-1);
        }

        match self.profile.code_fill_shape() {
            crate::version::CodeFillShape::StateBitsAfterN(n) => {
                let n = n as u8;
                for _ in 0..n {
                    obj.refs.push(self.read_ref(stream)?);
                }
                let state_bits = stream.read_tagged32()?;
                if state_bits & 0b1000 != 0 {
                    return Ok(());
                }
                for _ in n..spec.num_refs {
                    obj.refs.push(self.read_ref(stream)?);
                }
            }
            _ => {
                for _ in 0..spec.num_refs {
                    obj.refs.push(self.read_ref(stream)?);
                }
            }
        }

        if self.profile.code_state_bits_at_end {
            stream.read_tagged32()?;
        }
        Ok(())
    }

    fn fill_object_pool(&self, stream: &mut Stream<'_>, obj: &mut FilledObject) -> FillResult<()> {
        let length = stream.read_unsigned()?;
        for _ in 0..length {
            let entry_bits = stream.byte()?;
            if self.profile.old_pool_format {
                let mut ty = entry_bits & 0x7F;
                if self.profile.pool_type_swapped {
                    ty = match ty {
                        0 => 1,
                        1 => 0,
                        other => other,
                    };
                }
                match ty {
                    0 => obj.refs.push(self.read_ref(stream)?), // TaggedObject
                    1 => obj.scalars.push(stream.read_tagged64()?), // Immediate
                    2 | 3 => {}                                  // NativeFunction
                    _ => obj.refs.push(self.read_ref(stream)?), // NativeEntryData
                }
            } else {
                let behavior = entry_bits >> 5;
                if behavior == 0 {
                    match entry_bits & 0x0F {
                        0 => obj.refs.push(self.read_ref(stream)?),       // TaggedObject
                        1 => obj.scalars.push(stream.read_tagged64()?),  // Immediate
                        _ => {}                                          // NativeFunction
                    }
                }
                // behaviors 1..4: placeholders, nothing further to read.
            }
        }
        Ok(())
    }

    fn fill_array(&self, cluster: &ClusterAlloc, obj_index: u64, stream: &mut Stream<'_>, obj: &mut FilledObject) -> FillResult<()> {
        if self.profile.old_array_fill {
            let type_args = self.read_ref(stream)?;
            let length = alloc_length(cluster, obj_index);
            obj.refs.push(type_args);
            for _ in 0..length {
                obj.refs.push(self.read_ref(stream)?);
            }
        } else {
            let length = stream.read_unsigned()?;
            let type_args = self.read_ref(stream)?;
            obj.refs.push(type_args);
            for _ in 0..length {
                obj.refs.push(self.read_ref(stream)?);
            }
        }
        Ok(())
    }

    fn fill_type_arguments(&self, cluster: &ClusterAlloc, obj_index: u64, stream: &mut Stream<'_>, obj: &mut FilledObject) -> FillResult<()> {
        if self.profile.old_type_args_fill {
            let instantiations = self.read_ref(stream)?;
            let length = alloc_length(cluster, obj_index);
            obj.refs.push(instantiations);
            for _ in 0..length {
                obj.refs.push(self.read_ref(stream)?);
            }
            obj.scalars.push(stream.read_tagged32()? as i64); // hash, trailing
        } else {
            let length = stream.read_unsigned()?;
            let hash = stream.read_tagged32()?;
            let _nullability = stream.read_unsigned()?;
            let instantiations = self.read_ref(stream)?;
            obj.scalars.push(hash as i64);
            obj.refs.push(instantiations);
            for _ in 0..length {
                obj.refs.push(self.read_ref(stream)?);
            }
        }
        Ok(())
    }

    fn fill_instance(
        &self,
        cluster: &ClusterAlloc,
        spec: &FillSpec,
        bitmap: u64,
        stream: &mut Stream<'_>,
        obj: &mut FilledObject,
    ) -> FillResult<()> {
        if spec.leading_bool {
            stream.byte()?;
        }
        let (next_field_offset_in_words, _instance_size) = match &cluster.aux {
            AllocAux::Instance { next_field_offset_in_words, instance_size } => (*next_field_offset_in_words, *instance_size),
            _ => (0, 0),
        };
        let header_words = if self.profile.compressed_pointers { 2 } else { 1 };
        let num_slots = (next_field_offset_in_words - header_words).max(0) as u32;
        for bit in 0..num_slots {
            if bitmap & (1 << bit) != 0 {
                obj.scalars.push(stream.read_tagged32()? as i64);
                obj.scalars.push(stream.read_tagged32()? as i64);
            } else {
                obj.refs.push(self.read_ref(stream)?);
            }
        }
        Ok(())
    }

    fn read_compressed_string(&self, cid: Cid, stream: &mut Stream<'_>) -> FillResult<String> {
        let encoded = stream.read_unsigned()?;
        let (len, two_byte) = if self.profile.old_string_format {
            (encoded, self.profile.cids.kind_of(cid) == Some(crate::version::ObjectKind::TwoByteString))
        } else {
            (encoded >> 1, encoded & 1 != 0)
        };
        if two_byte {
            let bytes = stream.bytes(len as usize * 2)?;
            let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            Ok(String::from_utf16_lossy(&units))
        } else {
            let bytes = stream.bytes(len as usize)?;
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    /// Walk the per-object offset-delta recorded during alloc (spec §4.6's
    /// "abstract `String` cluster in ROData mode"): each object lives in
    /// the data image at a running offset, a 16-byte header (8-byte tags,
    /// 8-byte length) followed by its payload. `AllocDecoder` already
    /// folds the per-object deltas into a running offset, so this is a
    /// direct index into the data image.
    fn read_rodata_string(
        &self,
        cluster: &ClusterAlloc,
        obj_index: u64,
        rodata: Option<(&[u8], u64)>,
        ref_id: u64,
    ) -> FillResult<String> {
        let Some((data, data_image_base)) = rodata else {
            return Err(FillError::SchemaMismatch {
                cid: cluster.cid,
                ref_id,
                message: "ROData-mode string fill requires a data-image base offset".into(),
            });
        };
        let AllocAux::Lengths(offsets) = &cluster.aux else {
            return Err(FillError::SchemaMismatch {
                cid: cluster.cid,
                ref_id,
                message: "String cluster missing alloc-captured offsets".into(),
            });
        };
        let offset = *offsets.get(obj_index as usize).ok_or_else(|| FillError::SchemaMismatch {
            cid: cluster.cid,
            ref_id,
            message: "string index beyond alloc-captured offset table".into(),
        })?;

        let object_offset = data_image_base + offset;
        let header_start = object_offset as usize;
        let mut header = Stream::new(data.get(header_start..).ok_or_else(|| FillError::SchemaMismatch {
            cid: cluster.cid,
            ref_id,
            message: "string rodata header offset exceeds snapshot length".into(),
        })?);
        let _tags = header.u64le()?;
        let length = header.u64le()?;
        let payload_start = header_start + 16;

        let two_byte = self.profile.cids.kind_of(cluster.cid) == Some(crate::version::ObjectKind::TwoByteString);
        let payload_len = if two_byte { length as usize * 2 } else { length as usize };
        let payload = data.get(payload_start..payload_start + payload_len).ok_or_else(|| FillError::SchemaMismatch {
            cid: cluster.cid,
            ref_id,
            message: "string rodata payload exceeds snapshot length".into(),
        })?;

        if two_byte {
            let units: Vec<u16> = payload.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            Ok(String::from_utf16_lossy(&units))
        } else {
            Ok(String::from_utf8_lossy(payload).into_owned())
        }
    }
}

/// `Array`/`TypeArguments` old-format fill reads the object's element
/// count from the alloc-captured per-object length list rather than the
/// fill stream (spec §4.6).
fn alloc_length(cluster: &ClusterAlloc, obj_index: u64) -> u64 {
    match &cluster.aux {
        AllocAux::Lengths(lengths) => lengths.get(obj_index as usize).copied().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::classify;
    use crate::version::{profile_legacy, ObjectKind};

    fn push_unsigned(out: &mut Vec<u8>, mut v: u64) {
        loop {
            let chunk = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                out.push(chunk + 128);
                return;
            }
            out.push(chunk);
        }
    }

    #[test]
    fn fills_one_byte_string() {
        let profile = profile_legacy();
        let cid = profile.cids.cid(ObjectKind::OneByteString).unwrap();
        let mut data = Vec::new();
        push_unsigned(&mut data, 5);
        data.extend_from_slice(b"hello");
        let mut stream = Stream::new(&data);

        let cluster = ClusterAlloc {
            cid,
            kind: classify(cid, &profile.cids),
            canonical: false,
            count: 1,
            canonical_table_len: None,
            aux: AllocAux::None,
            start_ref_id: 1,
            end_ref_id: 2,
        };
        let opts = Options::default();
        let decoder = FillDecoder::new(&profile, &opts);
        let mut diags = Diags::new();
        let out = decoder.run(&mut stream, std::slice::from_ref(&cluster), &mut diags, None).unwrap();

        assert_eq!(out.name_of(1), Some("hello"));
    }

    fn push_tagged32(out: &mut Vec<u8>, v: i32) {
        // single-byte encoding only works for values in -64..63, which
        // covers this test's inputs.
        out.push((v + 192) as u8);
    }

    #[test]
    fn field_scalars_decode_static_flag() {
        let profile = profile_legacy();
        let cid = profile.cids.cid(ObjectKind::Field).unwrap();
        let mut data = Vec::new();
        for _ in 0..3 {
            push_unsigned(&mut data, 0); // refs, old ref encoding: read_unsigned
        }
        push_tagged32(&mut data, 0b10); // kind_bits: static flag set
        data.push(128); // read_ref_id terminator byte, value 0
        let mut stream = Stream::new(&data);

        let cluster = ClusterAlloc {
            cid,
            kind: classify(cid, &profile.cids),
            canonical: false,
            count: 1,
            canonical_table_len: None,
            aux: AllocAux::None,
            start_ref_id: 1,
            end_ref_id: 2,
        };
        let opts = Options::default();
        let decoder = FillDecoder::new(&profile, &opts);
        let mut diags = Diags::new();
        let out = decoder.run(&mut stream, std::slice::from_ref(&cluster), &mut diags, None).unwrap();
        let obj = out.objects.get(&1).unwrap();
        assert!(obj.field_is_static);
        assert_eq!(obj.field_host_offset_or_id, Some(-1));
    }
}
