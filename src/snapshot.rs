//! Top-level orchestration: snapshot header parsing, version resolution,
//! and wiring `Stream` → `AllocDecoder` → `FillDecoder` →
//! `InstructionsTable` → disassembly → `CallGraph` into one `Decoder`
//! entry point (spec §4.1-§4.10 tied together).
//!
//! Grounded on the teacher's `identify_idb_file`/`IDBFormat` front door in
//! `src/lib.rs`: parse a small fixed header, resolve which format/version
//! collaborator applies, then hand off to format-specific readers.

use anyhow::{bail, Context, Result};

use crate::alloc::{AllocDecoder, ClusterAlloc};
use crate::callgraph::CallGraph;
use crate::diagnostics::{DiagKind, Diags};
use crate::disasm::decode::disassemble;
use crate::disasm::reg_tracker::RegTracker;
use crate::disasm::thr::{ThrClass, ThrClassifier};
use crate::fill::{FillDecoder, FillOutput};
use crate::instructions_table::InstructionsTable;
use crate::options::Options;
use crate::stream::Stream;
use crate::version::{resolve_profile, DefaultVersionDetector, VersionDetector, VersionProfile};

const MAGIC: &[u8; 4] = b"SNAP";
const HASH_LEN: usize = 32;

/// Spec §4.7: data-image alignment is 16 bytes in older versions, 64 in
/// newer ones; this tracks the same version-era split as `new_ref_encoding`.
fn data_image_alignment(profile: &VersionProfile) -> u64 {
    if profile.new_ref_encoding {
        64
    } else {
        16
    }
}

fn round_up(value: u64, alignment: u64) -> u64 {
    let rem = value % alignment;
    if rem == 0 {
        value
    } else {
        value + (alignment - rem)
    }
}

/// Spec §3's clustered-section header: base-object count, total-object
/// count, an optional split canonical-cluster count (only in the
/// `canonical_clusters_counted_separately` version band), a non-canonical
/// (or plain, when not split) cluster count, and the three optional
/// instructions/field-table fields gated by their own profile flags.
#[derive(Debug, Clone, Default)]
pub struct ClusteredSectionHeader {
    pub base_object_count: u32,
    pub total_object_count: u32,
    pub split_canonical_cluster_count: Option<u32>,
    pub non_canonical_cluster_count: u32,
    pub initial_field_table_length: Option<u32>,
    pub instructions_table_length: Option<u32>,
    pub instructions_table_data_offset: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SnapshotHeader {
    pub total_size: u64,
    pub kind: u64,
    pub hash: [u8; HASH_LEN],
    pub feature_string: String,
    pub clustered: ClusteredSectionHeader,
    /// byte offset where the clustered-section header (and, immediately
    /// after its fields, the cluster stream) begins.
    pub clustered_offset: u64,
}

impl SnapshotHeader {
    pub fn parse(data: &[u8]) -> Result<(Self, VersionProfile, bool)> {
        Self::parse_with(data, &DefaultVersionDetector)
    }

    pub fn parse_with(data: &[u8], detector: &impl VersionDetector) -> Result<(Self, VersionProfile, bool)> {
        let mut stream = Stream::new(data);
        let magic = stream.bytes(4).context("reading snapshot magic")?;
        if magic != MAGIC {
            bail!("not a recognized snapshot: bad magic {magic:02x?}");
        }
        let total_size = stream.u64le().context("reading snapshot total size")?;
        let kind = stream.u64le().context("reading snapshot kind")?;
        let hash_bytes = stream.bytes(HASH_LEN).context("reading snapshot hash")?;
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(hash_bytes);
        let feature_string = {
            let bytes = stream.cstring().context("reading feature string")?;
            String::from_utf8_lossy(bytes).into_owned()
        };

        let (profile, fell_back) = resolve_profile(&feature_string, detector);

        let base_object_count = stream.u32le().context("reading base-object count")?;
        let total_object_count = stream.u32le().context("reading total-object count")?;
        let split_canonical_cluster_count = if profile.canonical_clusters_counted_separately {
            Some(stream.u32le().context("reading split canonical-cluster count")?)
        } else {
            None
        };
        let non_canonical_cluster_count = stream.u32le().context("reading non-canonical cluster count")?;
        let initial_field_table_length = if profile.has_initial_field_table_length {
            Some(stream.u32le().context("reading initial field-table length")?)
        } else {
            None
        };
        let instructions_table_length = if profile.has_instructions_table_length {
            Some(stream.u32le().context("reading instructions-table length")?)
        } else {
            None
        };
        let instructions_table_data_offset = if profile.has_instructions_table_data_offset {
            Some(stream.u32le().context("reading instructions-table data offset")?)
        } else {
            None
        };

        let clustered_offset = stream.position();

        Ok((
            Self {
                total_size,
                kind,
                hash,
                feature_string,
                clustered: ClusteredSectionHeader {
                    base_object_count,
                    total_object_count,
                    split_canonical_cluster_count,
                    non_canonical_cluster_count,
                    initial_field_table_length,
                    instructions_table_length,
                    instructions_table_data_offset,
                },
                clustered_offset,
            },
            profile,
            fell_back,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFunction {
    pub ref_id: u64,
    pub name: Option<String>,
    pub owner_class: Option<String>,
    pub code_start: Option<u32>,
    pub code_end: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ResolvedClass {
    pub ref_id: u64,
    pub name: Option<String>,
    pub num_fields: usize,
}

#[derive(Debug, Clone)]
pub struct UnresolvedThrAccess {
    pub function_name: String,
    pub insn_offset: u32,
    pub thr_offset: i64,
    pub width: u8,
    pub is_store: bool,
    pub class: ThrClass,
}

#[derive(Debug, Clone)]
pub struct DecodedSnapshot {
    pub profile_name: &'static str,
    pub feature_string: String,
    pub clusters: Vec<ClusterAlloc>,
    pub fill: FillOutput,
    pub classes: Vec<ResolvedClass>,
    pub functions: Vec<ResolvedFunction>,
    pub call_graph: CallGraph,
    pub unresolved_thr: Vec<UnresolvedThrAccess>,
    pub diags: Diags,
}

pub struct Decoder<'a> {
    opts: &'a Options,
}

impl<'a> Decoder<'a> {
    pub fn new(opts: &'a Options) -> Self {
        Self { opts }
    }

    pub fn decode(&self, data: &[u8]) -> Result<DecodedSnapshot> {
        let (header, profile, fell_back) = SnapshotHeader::parse(data)?;
        let mut diags = Diags::new();
        if fell_back {
            diags.push(0, DiagKind::VersionFallback, format!("unrecognized feature string '{}'", header.feature_string));
        }

        let cluster_slice = data.get(header.clustered_offset as usize..).context("clustered section out of bounds")?;
        let mut alloc_stream = Stream::new(cluster_slice);
        let clusters = AllocDecoder::new(&profile, self.opts).run(&mut alloc_stream, &mut diags);

        // The fill section begins immediately after the last cluster's
        // alloc range (spec §3).
        let fill_offset = header.clustered_offset + alloc_stream.position();
        let fill_slice = data.get(fill_offset as usize..).context("fill section out of bounds")?;
        let mut fill_stream = Stream::new(fill_slice);

        let data_image_base = round_up(header.total_size, data_image_alignment(&profile));
        let rodata = Some((data, data_image_base));

        let fill = FillDecoder::new(&profile, self.opts)
            .run(&mut fill_stream, &clusters, &mut diags, rodata)
            .context("fatal fill-phase schema mismatch")?;

        let instructions = match header.clustered.instructions_table_data_offset {
            Some(offset) if offset > 0 => {
                let table_start = data_image_base + offset as u64;
                let table_slice = data.get(table_start as usize..).context("instructions table out of bounds")?;
                Some(InstructionsTable::parse(table_slice).context("parsing instructions table")?)
            }
            _ => None,
        };

        let text_base = data_image_base as u32;
        let classes = build_classes(&clusters, &fill);
        let mut functions = build_functions(&clusters, &fill, instructions.as_ref(), text_base);
        let (call_graph, unresolved_thr) = analyze_code(data, &mut functions, self.opts, instructions.as_ref(), text_base);

        Ok(DecodedSnapshot {
            profile_name: profile.name,
            feature_string: header.feature_string,
            clusters,
            fill,
            classes,
            functions,
            call_graph,
            unresolved_thr,
            diags,
        })
    }
}

fn build_classes(clusters: &[ClusterAlloc], fill: &FillOutput) -> Vec<ResolvedClass> {
    use crate::alloc::AllocKind;
    let mut out = Vec::new();
    for cluster in clusters.iter().filter(|c| c.kind == AllocKind::Class) {
        for ref_id in cluster.ref_ids() {
            let Some(obj) = fill.objects.get(&ref_id) else { continue };
            let name = obj.refs.first().and_then(|&r| fill.name_of(r)).map(str::to_owned);
            out.push(ResolvedClass { ref_id, name, num_fields: obj.scalars.len() });
        }
    }
    out
}

fn build_functions(
    clusters: &[ClusterAlloc],
    fill: &FillOutput,
    instructions: Option<&InstructionsTable>,
    text_end_hint: u32,
) -> Vec<ResolvedFunction> {
    use crate::alloc::AllocKind;
    let mut code_index = 0usize;
    let mut out = Vec::new();
    for cluster in clusters.iter().filter(|c| c.kind == AllocKind::Code) {
        for ref_id in cluster.ref_ids() {
            let Some(obj) = fill.objects.get(&ref_id) else { continue };
            let owner_name = obj.refs.get(1).and_then(|&r| fill.name_of(r)).map(str::to_owned);
            let range = instructions.and_then(|t| t.code_range(code_index, text_end_hint));
            code_index += 1;
            out.push(ResolvedFunction {
                ref_id,
                name: owner_name.clone(),
                owner_class: owner_name,
                code_start: range.map(|r| r.start),
                code_end: range.map(|r| r.end),
            });
        }
    }
    out
}

fn analyze_code(
    data: &[u8],
    functions: &mut [ResolvedFunction],
    opts: &Options,
    instructions: Option<&InstructionsTable>,
    text_base: u32,
) -> (CallGraph, Vec<UnresolvedThrAccess>) {
    let mut call_graph = CallGraph::new();
    let mut unresolved = Vec::new();
    if instructions.is_none() {
        return (call_graph, unresolved);
    }

    for func in functions.iter() {
        let (Some(start), Some(end)) = (func.code_start, func.code_end) else { continue };
        let base = text_base as usize + start as usize;
        let len = (end - start) as usize;
        let Some(bytes) = data.get(base..base + len.min(data.len().saturating_sub(base))) else { continue };
        let insns: Vec<_> = bytes
            .chunks_exact(4)
            .enumerate()
            .map(|(i, w)| disassemble(start + (i as u32) * 4, u32::from_le_bytes([w[0], w[1], w[2], w[3]])))
            .collect();

        let mut tracker = RegTracker::new(opts.reg_window);
        let (annotations, edges) = tracker.run(&insns);

        let caller = func.name.clone().unwrap_or_else(|| format!("fn@{start:#x}"));
        for edge in edges {
            if let Some(target) = edge.callee_target {
                let callee_name = functions
                    .iter()
                    .find(|f| f.code_start == Some(target))
                    .and_then(|f| f.name.clone())
                    .unwrap_or_else(|| format!("fn@{target:#x}"));
                call_graph.add_edge(caller.clone(), callee_name);
            }
        }

        for ann in annotations {
            if let crate::disasm::reg_tracker::Provenance::ThreadOffset(off) = ann.prov {
                let idx = insns.iter().position(|i| i.offset == ann.insn_offset).unwrap_or(0);
                let (class, is_store, width) = ThrClassifier::classify(&insns, idx, off);
                unresolved.push(UnresolvedThrAccess {
                    function_name: caller.clone(),
                    insn_offset: ann.insn_offset,
                    thr_offset: off,
                    width,
                    is_store,
                    class,
                });
            }
        }
    }

    (call_graph, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

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

    /// mirrors `Stream::read_tagged`'s accumulation (see alloc/decoder.rs's
    /// test helper of the same name): peel 7-bit groups until the remainder
    /// fits the terminator's -64..63 range.
    fn push_tagged(out: &mut Vec<u8>, mut v: i64) {
        while !(-64..=63).contains(&v) {
            out.push((v & 0x7F) as u8);
            v >>= 7;
        }
        out.push((v + 192) as u8);
    }

    /// Builds a minimal "legacy"-profile snapshot with a single
    /// `OneByteString` cluster of two objects, exercising the whole
    /// header -> alloc -> fill pipeline without any code/instructions
    /// table (so `analyze_code` short-circuits on `instructions.is_none()`).
    fn build_legacy_snapshot(strings: &[&str]) -> Vec<u8> {
        let profile = crate::version::profile_legacy();
        let cid = profile.cids.cid(crate::version::ObjectKind::OneByteString).unwrap();

        let mut alloc = Vec::new();
        push_tagged(&mut alloc, cid as i64); // PlainSignedCid tag, canonical always false
        push_unsigned(&mut alloc, strings.len() as u64);
        push_tagged(&mut alloc, 0); // stop sentinel

        let mut fill = Vec::new();
        for s in strings {
            push_unsigned(&mut fill, s.len() as u64);
            fill.extend_from_slice(s.as_bytes());
        }

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(&0u64.to_le_bytes()); // total_size (unused by this fixture)
        data.extend_from_slice(&0u64.to_le_bytes()); // kind
        data.extend_from_slice(&[0u8; HASH_LEN]);
        data.extend_from_slice(b"legacy\0");
        data.extend_from_slice(&0u32.to_le_bytes()); // base_object_count
        data.extend_from_slice(&(strings.len() as u32).to_le_bytes()); // total_object_count
        data.extend_from_slice(&(strings.len() as u32).to_le_bytes()); // non_canonical_cluster_count
        // legacy: no split count, no initial-field-table length, no instructions-table fields.
        data.extend_from_slice(&alloc);
        data.extend_from_slice(&fill);
        data
    }

    #[test]
    fn decodes_string_cluster_end_to_end() {
        let data = build_legacy_snapshot(&["ab", "xyz"]);
        let opts = Options::default();
        let decoded = Decoder::new(&opts).decode(&data).unwrap();

        assert_eq!(decoded.profile_name, "legacy");
        assert!(decoded.diags.is_empty());
        assert_eq!(decoded.fill.objects.len(), 2);
        let mut values: Vec<_> =
            decoded.fill.objects.values().filter_map(|o| o.string_value.clone()).collect();
        values.sort();
        assert_eq!(values, vec!["ab".to_string(), "xyz".to_string()]);
        assert!(decoded.classes.is_empty());
        assert!(decoded.functions.is_empty());
        assert!(decoded.call_graph.is_empty());
        assert!(decoded.unresolved_thr.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut data = build_legacy_snapshot(&["ab"]);
        data[0] = b'X';
        let opts = Options::default();
        assert!(Decoder::new(&opts).decode(&data).is_err());
    }

    /// Builds a snapshot shaped for `profile_latest()`: its header carries
    /// the split/instructions-table header fields that profile requires,
    /// and its `OneByteString` fill entries use the ROData offset-delta
    /// form (`old_string_format` is false in this profile) rather than
    /// `build_legacy_snapshot`'s inline length-prefixed bytes. No
    /// instructions table is supplied (`instructions_table_data_offset =
    /// 0`), so `analyze_code` still short-circuits.
    fn build_latest_shaped_snapshot(feature_bytes: &[u8], num_strings: usize) -> Vec<u8> {
        let profile = crate::version::profile_latest();
        let cid = profile.cids.cid(crate::version::ObjectKind::OneByteString).unwrap();

        let mut alloc = Vec::new();
        push_tagged(&mut alloc, ((cid as i64) << 1) | 0); // CidShiftCanonical tag, not canonical
        push_unsigned(&mut alloc, num_strings as u64);
        for i in 0..num_strings {
            push_unsigned(&mut alloc, i as u64 + 1); // offset-delta
        }
        push_tagged(&mut alloc, 0); // stop sentinel

        // latest is ROData-mode: fill reads nothing for String directly,
        // the payload lives in the (absent, in this fixture) data image.
        // We don't exercise that path here; this fixture only checks
        // header parsing + fallback behavior with zero fill bytes needed
        // beyond the sentinel cluster's own (empty) fill contribution.
        let fill: Vec<u8> = Vec::new();

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&[0u8; HASH_LEN]);
        data.extend_from_slice(feature_bytes);
        data.extend_from_slice(&0u32.to_le_bytes()); // base_object_count
        data.extend_from_slice(&(num_strings as u32).to_le_bytes()); // total_object_count
        data.extend_from_slice(&(num_strings as u32).to_le_bytes()); // non_canonical_cluster_count
        data.extend_from_slice(&1u32.to_le_bytes()); // initial_field_table_length
        data.extend_from_slice(&0u32.to_le_bytes()); // instructions_table_length
        data.extend_from_slice(&0u32.to_le_bytes()); // instructions_table_data_offset (absent)
        data.extend_from_slice(&alloc);
        data.extend_from_slice(&fill);
        data
    }

    #[test]
    fn unrecognized_feature_string_falls_back_and_records_diag() {
        let data = build_latest_shaped_snapshot(b"zzzzzz\0", 0);
        let opts = Options::default();
        let decoded = Decoder::new(&opts).decode(&data).unwrap();
        assert_eq!(decoded.profile_name, "latest");
        assert!(decoded.diags.iter().any(|d| d.kind == crate::diagnostics::DiagKind::VersionFallback));
        assert_eq!(decoded.fill.objects.len(), 0);
    }
}
