//! Phase 2 of the two-phase decode: walk the same cluster order again,
//! this time reading each object's actual field data (spec §4.5/§4.6).
//! Fill errors are fatal — there is no resync point once a schema
//! mismatch is hit (spec §7).

pub mod decoder;
pub mod spec;

pub use decoder::{FillDecoder, FillError, FillOutput, FillResult};
pub use spec::{FillKind, FillSpec, FillSpecRegistry};
