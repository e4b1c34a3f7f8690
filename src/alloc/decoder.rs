//! `AllocDecoder`: phase 1 of the two-phase decode. One forward pass over
//! the cluster stream, reading each cluster's tag, count, and per-kind
//! auxiliary alloc-time data, without reading a single object's fill-phase
//! field data, assigning each object a dense 1-based reference id in
//! stream order (spec §4.3/§4.4).
//!
//! Grounded on `src/id0/btree.rs`'s and `src/id0.rs`'s per-entry-kind read
//! loop: read a tag, dispatch, accumulate, continue-or-break on error. Alloc
//! errors are non-fatal (spec §7): on a structural problem we record a
//! `Diag` and return everything decoded so far rather than an `Err`.

use crate::alloc::classifier::{classify, AllocKind};
use crate::diagnostics::{DiagKind, Diags};
use crate::options::Options;
use crate::stream::Stream;
use crate::version::{Cid, ObjectKind, TagEncoding, VersionProfile};

/// End-of-clusters sentinel: no CID in any known table is ever 0.
const CLUSTER_STOP_CID: Cid = 0;

/// A maximum canonical-set table length before we treat the field as
/// corrupt rather than spending `max_steps` assigning ref ids to garbage
/// (spec §4.4: "up to 16 × max_steps").
const CANONICAL_TABLE_LEN_MULTIPLIER: u64 = 16;

/// Per-AllocKind auxiliary data captured during the alloc pass, to be
/// consumed by the fill pass (spec §3: "per-kind auxiliary data").
#[derive(Debug, Clone)]
pub enum AllocAux {
    None,
    /// per-object lengths or data-image offset-deltas, aligned with this
    /// cluster's `ref_ids()` order.
    Lengths(Vec<u64>),
    /// per-object `Mint` values, aligned with `ref_ids()` order.
    Mints(Vec<i64>),
    /// per-class tagged32 CID, one per predefined class in this cluster.
    ClassCids(Vec<i32>),
    /// `Code` cluster discard bits: one tagged32 per main (non-deferred)
    /// code, then one per deferred code; bit 3 of each marks discarded.
    Code { main_state_bits: Vec<i32>, deferred_state_bits: Vec<i32>, deferred_count: u64 },
    Instance { next_field_offset_in_words: i32, instance_size: i32 },
}

#[derive(Debug, Clone)]
pub struct ClusterAlloc {
    pub cid: Cid,
    pub kind: AllocKind,
    pub canonical: bool,
    pub count: u64,
    pub canonical_table_len: Option<u64>,
    pub aux: AllocAux,
    /// first assigned ref id (inclusive).
    pub start_ref_id: u64,
    /// one past the last assigned ref id (exclusive).
    pub end_ref_id: u64,
}

impl ClusterAlloc {
    pub fn ref_ids(&self) -> std::ops::Range<u64> {
        self.start_ref_id..self.end_ref_id
    }
}

pub struct AllocDecoder<'a> {
    profile: &'a VersionProfile,
    opts: &'a Options,
}

impl<'a> AllocDecoder<'a> {
    pub fn new(profile: &'a VersionProfile, opts: &'a Options) -> Self {
        Self { profile, opts }
    }

    /// Run the alloc pass to completion or until `max_steps` objects have
    /// been counted, whichever comes first. Returns whatever clusters were
    /// decoded before any stopping condition, plus the accumulated
    /// diagnostics.
    pub fn run(&self, stream: &mut Stream<'_>, diags: &mut Diags) -> Vec<ClusterAlloc> {
        let mut clusters = Vec::new();
        let mut next_ref_id = self.profile.cids.predefined_count as u64 + 1;
        let mut total_objects: u64 = 0;

        loop {
            if total_objects >= self.opts.max_steps {
                diags.push(
                    stream.position(),
                    DiagKind::CountOutOfRange,
                    format!("alloc pass stopped after reaching max_steps ({})", self.opts.max_steps),
                );
                break;
            }

            let tag_offset = stream.position();
            let (cid, canonical) = match self.read_tag(stream) {
                Ok(tag) => tag,
                Err(e) => {
                    diags.push(tag_offset, DiagKind::Eof, format!("reading cluster tag: {e}"));
                    break;
                }
            };
            if cid == CLUSTER_STOP_CID {
                break;
            }

            let kind = classify(cid, &self.profile.cids);
            if kind == AllocKind::Unknown {
                diags.push(tag_offset, DiagKind::UnknownCid, format!("cid {cid}"));
            }

            crate::trace_alloc!(self.opts, "cluster cid={cid} canonical={canonical} kind={kind:?} @ {tag_offset:#x}");

            let count_offset = stream.position();
            let (count, aux, canonical_table_len) = match self.read_cluster_body(cid, kind, canonical, stream, diags) {
                Some(v) => v,
                None => break,
            };

            if count > self.opts.max_steps.saturating_sub(total_objects) {
                diags.push(
                    count_offset,
                    DiagKind::CountOutOfRange,
                    format!("cluster cid {cid} count {count} exceeds remaining step budget"),
                );
                break;
            }

            let start_ref_id = next_ref_id;
            next_ref_id += count;
            total_objects += count;

            clusters.push(ClusterAlloc {
                cid,
                kind,
                canonical,
                count,
                canonical_table_len,
                aux,
                start_ref_id,
                end_ref_id: next_ref_id,
            });
        }

        clusters
    }

    fn read_tag(&self, stream: &mut Stream<'_>) -> Result<(Cid, bool), crate::stream::StreamError> {
        match self.profile.tag_encoding {
            TagEncoding::CidShiftCanonical => {
                let raw = stream.read_tagged64()?;
                Ok(((raw >> 1) as Cid, raw & 1 != 0))
            }
            TagEncoding::ObjectHeaderWord => {
                let word = stream.u32le()?;
                let canonical = (word >> 1) & 1 != 0;
                let cid = ((word >> 12) & 0xFFFFF) as Cid;
                Ok((cid, canonical))
            }
            TagEncoding::PlainSignedCid => {
                let cid = stream.read_tagged32()?;
                Ok((cid, false))
            }
        }
    }

    /// Dispatch on `kind` and read this cluster's count plus any per-kind
    /// auxiliary alloc data (spec §4.4 step 3). Returns `None` (and the
    /// caller should stop the pass) on a stream error.
    fn read_cluster_body(
        &self,
        cid: Cid,
        kind: AllocKind,
        canonical: bool,
        stream: &mut Stream<'_>,
        diags: &mut Diags,
    ) -> Option<(u64, AllocAux, Option<u64>)> {
        match kind {
            AllocKind::CanonicalSet => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                if !canonical {
                    return Some((count, AllocAux::None, None));
                }
                let object_kind = self.profile.cids.kind_of(cid).unwrap_or(ObjectKind::Type);
                let (table_len, gap) = self.read_canonical_set_layout(count, object_kind, stream, diags)?;
                Some((count, AllocAux::Lengths(gap), Some(table_len)))
            }

            AllocKind::String => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                if self.profile.old_string_format {
                    // compressed-pointer mode: the per-object length is
                    // read inline during fill, not here.
                    Some((count, AllocAux::None, None))
                } else {
                    // Each raw value is a delta from the previous
                    // object's data-image offset; store the running sum
                    // so fill can index straight into the data image.
                    let offsets = self.read_cumulative_unsigned_n(count, stream, diags, "string rodata offset-delta")?;
                    Some((count, AllocAux::Lengths(offsets), None))
                }
            }

            AllocKind::Mint => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    if self.profile.pre_canonical_split {
                        if stream.byte().is_err() {
                            diags.push(stream.position(), DiagKind::Eof, "reading Mint is_canonical flag");
                            return None;
                        }
                    }
                    match stream.read_tagged64() {
                        Ok(v) => values.push(v),
                        Err(e) => {
                            diags.push(stream.position(), DiagKind::Eof, format!("reading Mint value: {e}"));
                            return None;
                        }
                    }
                }
                Some((count, AllocAux::Mints(values), None))
            }

            AllocKind::Array
            | AllocKind::WeakArray
            | AllocKind::Context
            | AllocKind::ContextScope
            | AllocKind::Record
            | AllocKind::TypedData
            | AllocKind::ObjectPool
            | AllocKind::ExceptionHandlers => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                let lengths = self.read_unsigned_n(count, stream, diags, "per-object length")?;
                Some((count, AllocAux::Lengths(lengths), None))
            }

            AllocKind::TypeArguments => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                let lengths = self.read_unsigned_n(count, stream, diags, "TypeArguments per-object length")?;
                if !canonical {
                    return Some((count, AllocAux::Lengths(lengths), None));
                }
                let (table_len, _gap) = self.read_canonical_set_layout(count, ObjectKind::TypeArguments, stream, diags)?;
                Some((count, AllocAux::Lengths(lengths), Some(table_len)))
            }

            AllocKind::Class => {
                let predefined_count = self.read_count_with_stray_check(cid, stream, diags)?;
                let mut class_cids = Vec::with_capacity(predefined_count as usize);
                for _ in 0..predefined_count {
                    match stream.read_tagged32() {
                        Ok(v) => class_cids.push(v),
                        Err(e) => {
                            diags.push(stream.position(), DiagKind::Eof, format!("reading Class predefined CID: {e}"));
                            return None;
                        }
                    }
                }
                let new_count = match stream.read_unsigned() {
                    Ok(v) => v,
                    Err(e) => {
                        diags.push(stream.position(), DiagKind::Eof, format!("reading Class new_count: {e}"));
                        return None;
                    }
                };
                Some((predefined_count + new_count, AllocAux::ClassCids(class_cids), None))
            }

            AllocKind::Code => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                // Whether per-code discard bits are captured during alloc
                // (as opposed to only during fill) tracks the same
                // version band as the mid/latest `CodeFillShape`
                // variants (see DESIGN.md Open Question).
                let state_bits_in_alloc = !matches!(
                    self.profile.code_fill_shape(),
                    crate::version::CodeFillShape::NoStateBits
                );
                let main_state_bits = if state_bits_in_alloc {
                    self.read_tagged32_n(count, stream, diags, "Code state_bits")?
                } else {
                    Vec::new()
                };
                let deferred_count = match stream.read_unsigned() {
                    Ok(v) => v,
                    Err(e) => {
                        diags.push(stream.position(), DiagKind::Eof, format!("reading Code deferred_count: {e}"));
                        return None;
                    }
                };
                let deferred_state_bits = if state_bits_in_alloc {
                    self.read_tagged32_n(deferred_count, stream, diags, "Code deferred state_bits")?
                } else {
                    Vec::new()
                };
                // Deferred codes are appended to the same cluster and get
                // their own ref ids right after the main codes (spec
                // §4.4); the cluster's total count covers both.
                Some((count + deferred_count, AllocAux::Code { main_state_bits, deferred_state_bits, deferred_count }, None))
            }

            AllocKind::ROData => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                let offsets = self.read_cumulative_unsigned_n(count, stream, diags, "ROData offset-delta")?;
                Some((count, AllocAux::Lengths(offsets), None))
            }

            AllocKind::Instance => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                let next_field_offset_in_words = match stream.read_tagged32() {
                    Ok(v) => v,
                    Err(e) => {
                        diags.push(stream.position(), DiagKind::Eof, format!("reading Instance next_field_offset_in_words: {e}"));
                        return None;
                    }
                };
                let instance_size = match stream.read_tagged32() {
                    Ok(v) => v,
                    Err(e) => {
                        diags.push(stream.position(), DiagKind::Eof, format!("reading Instance instance_size: {e}"));
                        return None;
                    }
                };
                Some((count, AllocAux::Instance { next_field_offset_in_words, instance_size }, None))
            }

            AllocKind::Empty => {
                let count = if self.profile.pre_canonical_split {
                    match stream.read_unsigned() {
                        Ok(v) => v,
                        Err(e) => {
                            diags.push(stream.position(), DiagKind::Eof, format!("reading Empty cluster count: {e}"));
                            return None;
                        }
                    }
                } else {
                    0
                };
                Some((count, AllocAux::None, None))
            }

            AllocKind::Simple | AllocKind::Unknown => {
                let count = self.read_count_with_stray_check(cid, stream, diags)?;
                Some((count, AllocAux::None, None))
            }
        }
    }

    /// Read `table_length`, an optional `first_element`, then
    /// `count − first_element` gap values (spec §4.4's canonical-set
    /// layout). Returns `(table_length, gap_values)`.
    fn read_canonical_set_layout(
        &self,
        count: u64,
        object_kind: ObjectKind,
        stream: &mut Stream<'_>,
        diags: &mut Diags,
    ) -> Option<(u64, Vec<u64>)> {
        let offset = stream.position();
        let table_len = match stream.read_unsigned() {
            Ok(len) => len,
            Err(e) => {
                diags.push(offset, DiagKind::Eof, format!("reading canonical-set table length: {e}"));
                return None;
            }
        };
        let max_table_len = self.opts.max_steps.saturating_mul(CANONICAL_TABLE_LEN_MULTIPLIER);
        if table_len > max_table_len {
            diags.push(
                offset,
                DiagKind::CanonicalSetTooLarge,
                format!("canonical-set table length {table_len} exceeds {max_table_len}"),
            );
            return None;
        }

        let first_element = if self.profile.canonical_set_has_first_element(object_kind) {
            match stream.read_unsigned() {
                Ok(v) => v,
                Err(e) => {
                    diags.push(stream.position(), DiagKind::Eof, format!("reading canonical first_element: {e}"));
                    return None;
                }
            }
        } else {
            0
        };

        let gap_count = count.saturating_sub(first_element);
        let gap = self.read_unsigned_n(gap_count, stream, diags, "canonical-set gap value")?;
        Some((table_len, gap))
    }

    fn read_unsigned_n(&self, n: u64, stream: &mut Stream<'_>, diags: &mut Diags, what: &str) -> Option<Vec<u64>> {
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            match stream.read_unsigned() {
                Ok(v) => out.push(v),
                Err(e) => {
                    diags.push(stream.position(), DiagKind::Eof, format!("reading {what}: {e}"));
                    return None;
                }
            }
        }
        Some(out)
    }

    /// Like `read_unsigned_n`, but each value is a delta from the running
    /// sum rather than an independent length; returns the accumulated
    /// offsets (spec §4.6: "each object lives in the data image at a
    /// running offset").
    fn read_cumulative_unsigned_n(&self, n: u64, stream: &mut Stream<'_>, diags: &mut Diags, what: &str) -> Option<Vec<u64>> {
        let mut out = Vec::with_capacity(n as usize);
        let mut running = 0u64;
        for _ in 0..n {
            match stream.read_unsigned() {
                Ok(v) => {
                    running += v;
                    out.push(running);
                }
                Err(e) => {
                    diags.push(stream.position(), DiagKind::Eof, format!("reading {what}: {e}"));
                    return None;
                }
            }
        }
        Some(out)
    }

    fn read_tagged32_n(&self, n: u64, stream: &mut Stream<'_>, diags: &mut Diags, what: &str) -> Option<Vec<i32>> {
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            match stream.read_tagged32() {
                Ok(v) => out.push(v),
                Err(e) => {
                    diags.push(stream.position(), DiagKind::Eof, format!("reading {what}: {e}"));
                    return None;
                }
            }
        }
        Some(out)
    }

    /// Older (`pre_v32_format`) writers occasionally emit a duplicate
    /// leading count on `Class` clusters (spec.md's `skipClassAlloc`
    /// heuristic, see DESIGN.md Open Question). Detect it by peeking: if
    /// the very next varint repeats the one we just read, the first was
    /// stray and gets discarded.
    fn read_count_with_stray_check(&self, cid: Cid, stream: &mut Stream<'_>, diags: &mut Diags) -> Option<u64> {
        let offset = stream.position();
        let first = match stream.read_unsigned() {
            Ok(v) => v,
            Err(e) => {
                diags.push(offset, DiagKind::Eof, format!("reading cluster count: {e}"));
                return None;
            }
        };

        let is_class = self.profile.cids.kind_of(cid) == Some(crate::version::ObjectKind::Class);
        if self.profile.pre_v32_format && is_class {
            let mut peek = stream.clone();
            if let Ok(second) = peek.read_unsigned() {
                if second == first {
                    diags.push(offset, DiagKind::StrayCountPrefix, format!("duplicate class count {first}"));
                    crate::trace_alloc!(self.opts, "skipped stray class-count prefix {first} @ {offset:#x}");
                    *stream = peek;
                    return Some(second);
                }
            }
        }
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::profile_latest;

    fn encode_cluster(cid: Cid, canonical: bool, count: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        let tag = ((cid as i64) << 1) | (canonical as i64);
        push_tagged64(&mut bytes, tag);
        push_unsigned(&mut bytes, count);
        bytes
    }

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

    fn push_tagged64(out: &mut Vec<u8>, mut v: i64) {
        // mirrors Stream::read_tagged's accumulation exactly: peel 7-bit
        // continuation groups until the remainder fits the terminator's
        // -64..63 range, then emit it as `remainder + 192`.
        while !(-64..=63).contains(&v) {
            out.push((v & 0x7F) as u8);
            v >>= 7;
        }
        out.push((v + 192) as u8);
    }

    #[test]
    fn single_simple_cluster_assigns_ref_ids() {
        let profile = profile_latest();
        let field_cid = profile.cids.cid(crate::version::ObjectKind::Field).unwrap();
        let mut data = encode_cluster(field_cid, false, 3);
        push_tagged64(&mut data, 0); // stop sentinel
        let mut stream = Stream::new(&data);
        let mut diags = Diags::new();
        let opts = Options::default();
        let decoder = AllocDecoder::new(&profile, &opts);
        let clusters = decoder.run(&mut stream, &mut diags);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].kind, AllocKind::Simple);
        assert_eq!(clusters[0].count, 3);
        let expected_start = profile.cids.predefined_count as u64 + 1;
        assert_eq!(clusters[0].start_ref_id, expected_start);
        assert_eq!(clusters[0].end_ref_id, expected_start + 3);
        assert!(diags.is_empty());
    }

    #[test]
    fn unknown_cid_records_diag_but_continues() {
        let profile = profile_latest();
        let mut data = encode_cluster(99_999, false, 2);
        push_tagged64(&mut data, 0);
        let mut stream = Stream::new(&data);
        let mut diags = Diags::new();
        let opts = Options::default();
        let decoder = AllocDecoder::new(&profile, &opts);
        let clusters = decoder.run(&mut stream, &mut diags);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].kind, AllocKind::Unknown);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn max_steps_bounds_the_pass() {
        let profile = profile_latest();
        let field_cid = profile.cids.cid(crate::version::ObjectKind::Field).unwrap();
        let data = encode_cluster(field_cid, false, 100);
        let mut stream = Stream::new(&data);
        let mut diags = Diags::new();
        let opts = Options { max_steps: 10, ..Options::default() };
        let decoder = AllocDecoder::new(&profile, &opts);
        let clusters = decoder.run(&mut stream, &mut diags);

        assert!(clusters.is_empty());
        assert!(diags.iter().any(|d| d.kind == DiagKind::CountOutOfRange));
    }

    #[test]
    fn mint_cluster_captures_per_object_values() {
        let profile = profile_latest();
        let mint_cid = profile.cids.cid(crate::version::ObjectKind::Mint).unwrap();
        let mut data = encode_cluster(mint_cid, false, 2);
        push_tagged64(&mut data, 7);
        push_tagged64(&mut data, -3);
        push_tagged64(&mut data, 0);
        let mut stream = Stream::new(&data);
        let mut diags = Diags::new();
        let opts = Options::default();
        let decoder = AllocDecoder::new(&profile, &opts);
        let clusters = decoder.run(&mut stream, &mut diags);

        assert_eq!(clusters.len(), 1);
        match &clusters[0].aux {
            AllocAux::Mints(values) => assert_eq!(values, &vec![7, -3]),
            other => panic!("expected Mints aux, got {other:?}"),
        }
    }

    #[test]
    fn class_cluster_reads_predefined_cids_and_new_count() {
        let profile = profile_latest();
        let class_cid = profile.cids.cid(crate::version::ObjectKind::Class).unwrap();
        let mut data = Vec::new();
        push_tagged64(&mut data, (class_cid as i64) << 1);
        push_unsigned(&mut data, 2); // predefined_count
        push_tagged64(&mut data, 101);
        push_tagged64(&mut data, 102);
        push_unsigned(&mut data, 3); // new_count
        push_tagged64(&mut data, 0);
        let mut stream = Stream::new(&data);
        let mut diags = Diags::new();
        let opts = Options::default();
        let decoder = AllocDecoder::new(&profile, &opts);
        let clusters = decoder.run(&mut stream, &mut diags);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count, 5);
        match &clusters[0].aux {
            AllocAux::ClassCids(cids) => assert_eq!(cids, &vec![101, 102]),
            other => panic!("expected ClassCids aux, got {other:?}"),
        }
    }
}
