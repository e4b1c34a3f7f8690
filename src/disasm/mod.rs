//! ARM64 disassembly subsystem: a narrow, fixed set of instruction
//! recognitions (spec §4.8) feeding register-provenance tracking, CFG
//! construction, and thread-pointer-access classification. This is
//! explicitly NOT a general ISA decoder — unrecognized words render as
//! `.word 0xAABBCCDD` rather than failing the whole pass (Non-goal:
//! "reconstructing executable semantics").

pub mod cfg;
pub mod decode;
pub mod reg_tracker;
pub mod thr;

pub use cfg::{BasicBlock, CFGBuilder, Cfg};
pub use decode::{disassemble, Insn, Opcode};
pub use reg_tracker::{Provenance, RegTracker};
pub use thr::{ThrClass, ThrClassifier};
