//! Owned diagnostics accumulator, passed by exclusive borrow rather than
//! read from a global logger. Grounded on the teacher's `anyhow::Result` +
//! `ensure!` idiom, generalized because the alloc phase's contract (spec
//! §7) requires partial results on error, which a bare `Result` can't
//! carry.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    Overrun,
    Eof,
    CountOutOfRange,
    RefIdOutOfRange,
    CanonicalSetTooLarge,
    UnknownCid,
    UnknownPoolEntryType,
    UnknownTagEncoding,
    VersionFallback,
    StrayCountPrefix,
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagKind::Overrun => "overrun",
            DiagKind::Eof => "eof",
            DiagKind::CountOutOfRange => "count-out-of-range",
            DiagKind::RefIdOutOfRange => "ref-id-out-of-range",
            DiagKind::CanonicalSetTooLarge => "canonical-set-too-large",
            DiagKind::UnknownCid => "unknown-cid",
            DiagKind::UnknownPoolEntryType => "unknown-pool-entry-type",
            DiagKind::UnknownTagEncoding => "unknown-tag-encoding",
            DiagKind::VersionFallback => "version-fallback",
            DiagKind::StrayCountPrefix => "stray-count-prefix",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Diag {
    pub offset: u64,
    pub kind: DiagKind,
    pub message: String,
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}: {}", self.offset, self.kind, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Diags(Vec<Diag>);

impl Diags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, offset: u64, kind: DiagKind, message: impl Into<String>) {
        self.0.push(Diag { offset, kind, message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diag> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Diag> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_in_order() {
        let mut diags = Diags::new();
        diags.push(0x10, DiagKind::Eof, "truncated cluster header");
        diags.push(0x20, DiagKind::UnknownCid, "cid 9999");
        assert_eq!(diags.len(), 2);
        let offsets: Vec<u64> = diags.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0x10, 0x20]);
    }
}
