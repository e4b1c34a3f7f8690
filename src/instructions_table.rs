//! `InstructionsTable`: the rodata structure mapping code-object cluster
//! indices and stub slots to `(pc_offset, stack_map_offset)` pairs, plus
//! code-range and stub-range resolution (spec §4.7).
//!
//! Grounded on `src/id1.rs`'s fixed-stride table read: a small header
//! followed by N fixed-size records, with a final merge/sort pass — same
//! two-step shape here, just over 8-byte `(pc_offset, stack_map_offset)`
//! entries instead of IDA's segment-flag words.

use crate::stream::{Stream, StreamResult};

const OBJECT_HEADER_LEN: usize = 16;
const STRUCT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionsEntry {
    pub pc_offset: u32,
    pub stack_map_offset: u32,
}

#[derive(Debug, Clone)]
pub struct InstructionsTable {
    pub canon_offset: u32,
    /// index of the first slot holding a code (non-stub) entry; slots
    /// `[0, first_entry_with_code)` are stubs.
    pub first_entry_with_code: u32,
    entries: Vec<InstructionsEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub start: u32,
    pub end: u32,
    /// -1 for stub ranges, the cluster index for code ranges.
    pub ref_index: i64,
}

impl InstructionsTable {
    /// Skip the 16-byte object header, read the 16-byte
    /// `canon_offset/length/first_entry_with_code/padding` struct, then
    /// read `length` 8-byte `(pc_offset, stack_map_offset)` entries.
    pub fn parse(data: &[u8]) -> StreamResult<Self> {
        let mut stream = Stream::new(data);
        stream.skip(OBJECT_HEADER_LEN as u64);
        let canon_offset = stream.u32le()?;
        let length = stream.u32le()?;
        let first_entry_with_code = stream.u32le()?;
        let _padding = stream.u32le()?;
        debug_assert_eq!(STRUCT_LEN, 16);

        let mut entries = Vec::with_capacity(length as usize);
        for _ in 0..length {
            let pc_offset = stream.u32le()?;
            let stack_map_offset = stream.u32le()?;
            entries.push(InstructionsEntry { pc_offset, stack_map_offset });
        }
        Ok(Self { canon_offset, first_entry_with_code, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<InstructionsEntry> {
        self.entries.get(index).copied()
    }

    /// Resolve the `[start, end)` byte range a cluster-order code object
    /// occupies: look up slot `first_entry_with_code + cluster_index`,
    /// from its own `pc_offset` to the next code slot's `pc_offset` (by
    /// table order), or to `text_end` for the last entry.
    pub fn code_range(&self, cluster_index: usize, text_end: u32) -> Option<CodeRange> {
        let slot = self.first_entry_with_code as usize + cluster_index;
        let start = self.entries.get(slot)?.pc_offset;
        let end = self.entries.get(slot + 1).map(|e| e.pc_offset).unwrap_or(text_end);
        Some(CodeRange { start, end, ref_index: cluster_index as i64 })
    }

    /// Resolve every stub range: slots `[0, first_entry_with_code)`.
    pub fn stub_ranges(&self, text_end: u32) -> Vec<CodeRange> {
        let first_code = self.first_entry_with_code as usize;
        (0..first_code.min(self.entries.len()))
            .map(|slot| {
                let start = self.entries[slot].pc_offset;
                let end = self.entries.get(slot + 1).map(|e| e.pc_offset).unwrap_or(text_end);
                CodeRange { start, end, ref_index: -1 }
            })
            .collect()
    }

    /// Resolve stub ranges: entries whose `stack_map_offset` is the
    /// well-known "no stack map" sentinel (`u32::MAX`) are bare stubs, not
    /// user code; the caller filters on this to separate the two.
    pub fn is_stub(&self, index: usize) -> bool {
        index < self.first_entry_with_code as usize
            || self.entries.get(index).is_some_and(|e| e.stack_map_offset == u32::MAX)
    }

    /// All code ranges (`[0, length - first_entry_with_code)` cluster
    /// indices) plus every stub range, merged where adjacent and sorted
    /// by `pc_offset` (spec §4.7's "merge/sort code ranges").
    pub fn merged_ranges(&self, text_end: u32) -> Vec<CodeRange> {
        let code_count = self.entries.len().saturating_sub(self.first_entry_with_code as usize);
        let mut ranges: Vec<CodeRange> = (0..code_count).filter_map(|i| self.code_range(i, text_end)).collect();
        ranges.extend(self.stub_ranges(text_end));
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<CodeRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_table(first_entry_with_code: u32, entries: &[(u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&[0u8; OBJECT_HEADER_LEN]);
        data.extend_from_slice(&0u32.to_le_bytes()); // canon_offset
        data.extend_from_slice(&(entries.len() as u32).to_le_bytes()); // length
        data.extend_from_slice(&first_entry_with_code.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // padding
        for (pc, stack) in entries {
            data.extend_from_slice(&pc.to_le_bytes());
            data.extend_from_slice(&stack.to_le_bytes());
        }
        data
    }

    #[test]
    fn parses_fixed_entries() {
        let data = build_table(0, &[(0, 4), (64, 8), (128, 12)]);
        let table = InstructionsTable::parse(&data).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.entry(1), Some(InstructionsEntry { pc_offset: 64, stack_map_offset: 8 }));
    }

    #[test]
    fn code_range_offsets_by_first_entry_with_code() {
        let data = build_table(1, &[(0, u32::MAX), (64, 8), (128, 12)]);
        let table = InstructionsTable::parse(&data).unwrap();
        // cluster index 0 maps to slot 1, not slot 0 (a stub).
        assert_eq!(table.code_range(0, 256), Some(CodeRange { start: 64, end: 128, ref_index: 0 }));
        assert_eq!(table.code_range(1, 256), Some(CodeRange { start: 128, end: 256, ref_index: 1 }));
    }

    #[test]
    fn stub_ranges_cover_slots_before_first_code() {
        let data = build_table(2, &[(0, u32::MAX), (16, u32::MAX), (64, 8)]);
        let table = InstructionsTable::parse(&data).unwrap();
        let stubs = table.stub_ranges(256);
        assert_eq!(stubs.len(), 2);
        assert!(stubs.iter().all(|r| r.ref_index == -1));
        assert!(table.is_stub(0));
        assert!(table.is_stub(1));
        assert!(!table.is_stub(2));
    }

    #[test]
    fn merges_adjacent_ranges() {
        let data = build_table(0, &[(0, 4), (64, 8)]);
        let table = InstructionsTable::parse(&data).unwrap();
        let merged = table.merged_ranges(128);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 0);
        assert_eq!(merged[0].end, 128);
    }

    #[test]
    fn large_all_code_table_parses_every_entry() {
        let entries: Vec<(u32, u32)> = (0..1465u32).map(|i| (i * 16, i)).collect();
        let data = build_table(0, &entries);
        let table = InstructionsTable::parse(&data).unwrap();
        assert_eq!(table.len(), 1465);
        assert_eq!(table.entry(1464).unwrap().pc_offset, 1464 * 16);
    }

    #[test]
    fn merged_ranges_snapshot_for_irregular_stub_interleaving() {
        // a mix of adjacent, overlapping, and gapped entries plus stubs,
        // the shape real `merged_ranges` output is too irregular to usefully
        // assert field-by-field.
        let data = build_table(2, &[(0, u32::MAX), (32, u32::MAX), (40, 8), (96, 12), (200, 16)]);
        let table = InstructionsTable::parse(&data).unwrap();
        insta::assert_debug_snapshot!(table.merged_ranges(256));
    }

    #[test]
    fn large_mixed_table_splits_stubs_from_code() {
        let stub_count = 17475u32;
        let code_count = 21627u32 - stub_count;
        let mut entries: Vec<(u32, u32)> = (0..stub_count).map(|i| (i * 4, u32::MAX)).collect();
        entries.extend((0..code_count).map(|i| ((stub_count + i) * 16, i)));
        let data = build_table(stub_count, &entries);
        let table = InstructionsTable::parse(&data).unwrap();
        assert_eq!(table.len(), 21627);
        assert_eq!(table.stub_ranges(u32::MAX).len() as u32, stub_count);
        assert!(table.code_range((code_count - 1) as usize, u32::MAX).is_some());
        assert!(table.code_range(code_count as usize, u32::MAX).is_none());
    }
}
