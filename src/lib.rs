#![forbid(unsafe_code)]

//! Decoder for versioned clustered-snapshot binaries produced by an
//! ahead-of-time-compiled managed-runtime build for ARM64 mobile
//! deployment: class hierarchy, function names/ownership, string
//! literals, constant pools, code ranges, and the static call graph.
//!
//! The decode is two-phase (`alloc` then `fill`, see [`snapshot::Decoder`]):
//! a first pass over the cluster stream counts objects and assigns dense
//! reference ids, a second pass reads each object's field data against a
//! per-CID [`fill::FillSpec`] selected by the active [`version::VersionProfile`].
//! A companion ARM64 disassembly subsystem ([`disasm`]) recovers basic-block
//! structure, register provenance, and the static call graph from each
//! function's instruction bytes.

pub mod alloc;
pub mod artifacts;
pub mod callgraph;
pub mod diagnostics;
pub mod disasm;
pub mod fill;
pub mod instructions_table;
pub mod options;
pub mod snapshot;
pub mod stream;
pub mod version;

pub use diagnostics::{Diag, DiagKind, Diags};
pub use options::Options;
pub use snapshot::{Decoder, DecodedSnapshot, SnapshotHeader};
pub use stream::{Stream, StreamError, StreamResult};
