//! Phase 1 of the two-phase decode: walk the cluster stream once, computing
//! how many objects of each kind exist and assigning them dense reference
//! ids, without yet reading any object's field data (spec §4.3/§4.4).

pub mod classifier;
pub mod decoder;

pub use classifier::{classify, AllocKind};
pub use decoder::{AllocAux, AllocDecoder, ClusterAlloc};
