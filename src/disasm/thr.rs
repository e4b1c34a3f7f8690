//! `THRClassifier`: a prioritized 11-rule pattern match over a ±2
//! instruction context window, classifying thread-pointer-relative
//! accesses that `RegTracker` could not resolve to a named runtime field
//! (spec §4.10).
//!
//! Grounded on the teacher's ordered-rule-list dispatch style (same shape
//! as `alloc::classifier::classify`): first rule that matches wins, no
//! fallthrough once a case other than the final default has fired.

use super::decode::{Insn, Opcode, LR_REG, THR_REG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrClass {
    RuntimeEntrypoint,
    IsolateGroupPtr,
    ObjectStoreCache,
    Unknown,
}

pub struct ThrClassifier;

impl ThrClassifier {
    /// `insns` is the full instruction stream; `index` points at the THR-
    /// relative load/store to classify. Returns the classification, whether
    /// the access itself was a store, and its width in bytes (4 or 8).
    pub fn classify(insns: &[Insn], index: usize, thr_offset: i64) -> (ThrClass, bool, u8) {
        let this = &insns[index];
        let (is_store, width) = match this.op {
            Opcode::StrImm { is64 } => (true, if is64 { 8 } else { 4 }),
            Opcode::LdrImm { is64 } => (false, if is64 { 8 } else { 4 }),
            _ => (false, 8),
        };
        let _ = thr_offset;

        // Rule 1: store to THR -> RuntimeEntrypoint (vm-tag update pattern).
        if is_store && this.rn == Some(THR_REG) {
            return (ThrClass::RuntimeEntrypoint, is_store, width);
        }

        let loaded_reg = this.rt.or(this.rd);
        let after1 = insns.get(index + 1);
        let after2 = insns.get(index + 2);

        // Rule 2: load into Xn followed immediately by BLR Xn.
        if let (Some(reg), Some(a1)) = (loaded_reg, after1) {
            if matches!(a1.op, Opcode::Blr) && a1.rn == Some(reg) {
                return (ThrClass::RuntimeEntrypoint, is_store, width);
            }
        }

        // Rule 3: load into Xn, store Xn back to THR, then BLR Xn.
        if let (Some(reg), Some(a1), Some(a2)) = (loaded_reg, after1, after2) {
            if matches!(a1.op, Opcode::StrImm { .. })
                && a1.rt == Some(reg)
                && a1.rn == Some(THR_REG)
                && matches!(a2.op, Opcode::Blr)
                && a2.rn == Some(reg)
            {
                return (ThrClass::RuntimeEntrypoint, is_store, width);
            }
        }

        // Rule 4: LDR X5, "MOV X4, ..." (no dedicated mov opcode in this
        // decoder; an AddImm with a zero immediate stands in for it), then
        // LDR X30 from THR (argument-passing convention).
        if loaded_reg == Some(5) {
            if let (Some(a1), Some(a2)) = (after1, after2) {
                let mov_x4 = matches!(a1.op, Opcode::AddImm) && a1.rd == Some(4) && a1.imm == Some(0);
                let loads_lr_from_thr =
                    matches!(a2.op, Opcode::LdrImm { .. }) && a2.rt == Some(LR_REG) && a2.rn == Some(THR_REG);
                if mov_x4 && loads_lr_from_thr {
                    return (ThrClass::RuntimeEntrypoint, is_store, width);
                }
            }
        }

        // Rule 5: LDR X30, then a stack push, then BL -> IsolateGroupPtr.
        if loaded_reg == Some(LR_REG) {
            if let (Some(a1), Some(a2)) = (after1, after2) {
                let push = matches!(a1.op, Opcode::StrImm { .. });
                if push && matches!(a2.op, Opcode::Bl) {
                    return (ThrClass::IsolateGroupPtr, is_store, width);
                }
            }
        }

        // Rule 6: LDR X9 then BLR X10 (stack-overflow check).
        if loaded_reg == Some(9) {
            if let Some(a1) = after1 {
                if matches!(a1.op, Opcode::Blr) && a1.rn == Some(10) {
                    return (ThrClass::RuntimeEntrypoint, is_store, width);
                }
            }
        }

        // Rule 7: load followed by a store not targeting THR.
        if let Some(a1) = after1 {
            if matches!(a1.op, Opcode::StrImm { .. }) && a1.rn != Some(THR_REG) {
                return (ThrClass::ObjectStoreCache, is_store, width);
            }
        }

        // Rule 8: load followed by a compare on the same register. No
        // dedicated CMP opcode here; Cbz/Cbnz/Bcond on the loaded register
        // stand in for it.
        if let (Some(reg), Some(a1)) = (loaded_reg, after1) {
            let compares = match a1.op {
                Opcode::Cbz { .. } | Opcode::Cbnz { .. } => a1.rt == Some(reg) || a1.rn == Some(reg),
                Opcode::Bcond => true,
                _ => false,
            };
            if compares {
                return (ThrClass::ObjectStoreCache, is_store, width);
            }
        }

        // Rule 9: LDR Xn then LDR Xn, [Xn, #imm] -> pointer chase.
        if let (Some(reg), Some(a1)) = (loaded_reg, after1) {
            if matches!(a1.op, Opcode::LdrImm { .. }) && a1.rt == Some(reg) && a1.rn == Some(reg) {
                return (ThrClass::IsolateGroupPtr, is_store, width);
            }
        }

        // Rule 10: load followed by an unconditional branch.
        if let Some(a1) = after1 {
            if matches!(a1.op, Opcode::B) {
                return (ThrClass::ObjectStoreCache, is_store, width);
            }
        }

        (ThrClass::Unknown, is_store, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::decode::disassemble;

    #[test]
    fn store_to_thr_is_runtime_entrypoint() {
        // STR X1, [X26, #8]
        let word = 0xF9000000 | (1 << 10) | ((THR_REG as u32) << 5) | 1;
        let insns = vec![disassemble(0, word)];
        let (class, is_store, _) = ThrClassifier::classify(&insns, 0, 8);
        assert_eq!(class, ThrClass::RuntimeEntrypoint);
        assert!(is_store);
    }

    #[test]
    fn load_then_blr_same_reg_is_runtime_entrypoint() {
        // LDR X9, [X26, #8] ; BLR X9
        let ldr = 0xF9400000 | (1 << 10) | ((THR_REG as u32) << 5) | 9;
        let blr = 0xD63F0000 | (9 << 5);
        let insns = vec![disassemble(0, ldr), disassemble(4, blr)];
        let (class, is_store, width) = ThrClassifier::classify(&insns, 0, 8);
        assert_eq!(class, ThrClass::RuntimeEntrypoint);
        assert!(!is_store);
        assert_eq!(width, 8);
    }

    #[test]
    fn load_then_store_elsewhere_is_object_store_cache() {
        // LDR X2, [X26, #16] ; STR X2, [X3]
        let ldr = 0xF9400000 | (2 << 10) | ((THR_REG as u32) << 5) | 2;
        let str_ = 0xF9000000 | (3 << 5) | 2;
        let insns = vec![disassemble(0, ldr), disassemble(4, str_)];
        let (class, ..) = ThrClassifier::classify(&insns, 0, 16);
        assert_eq!(class, ThrClass::ObjectStoreCache);
    }

    #[test]
    fn pointer_chase_is_isolate_group_ptr() {
        // LDR X9, [X26, #8] ; LDR X9, [X9, #16]
        let ldr1 = 0xF9400000 | (1 << 10) | ((THR_REG as u32) << 5) | 9;
        let ldr2 = 0xF9400000 | (2 << 10) | (9 << 5) | 9;
        let insns = vec![disassemble(0, ldr1), disassemble(4, ldr2)];
        let (class, ..) = ThrClassifier::classify(&insns, 0, 8);
        assert_eq!(class, ThrClass::IsolateGroupPtr);
    }

    #[test]
    fn no_context_match_is_unknown() {
        let ldr = 0xF9400000 | (1 << 10) | ((THR_REG as u32) << 5) | 4;
        let insns = vec![disassemble(0, ldr)];
        let (class, ..) = ThrClassifier::classify(&insns, 0, 8);
        assert_eq!(class, ThrClass::Unknown);
    }
}
