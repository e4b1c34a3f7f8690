//! `CFGBuilder`: three-pass basic-block construction over a decoded
//! instruction stream (spec §4.10) — find leaders, partition into blocks,
//! then compute edges.
//!
//! Grounded on the teacher's own multi-pass parsing discipline (e.g.
//! `src/id0/btree.rs` reading a b-tree in distinct header/body passes)
//! generalized to the classic leaders/partition/edges CFG algorithm, which
//! the teacher's domain never needed but whose "do one full pass per
//! concern" shape matches.

use std::collections::BTreeSet;

use super::decode::{Insn, Opcode};

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub start: u32,
    pub end: u32,
    pub successors: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
}

pub struct CFGBuilder;

impl CFGBuilder {
    /// `insns` must be in increasing-offset order and cover a single
    /// function's instruction stream.
    pub fn build(insns: &[Insn]) -> Cfg {
        if insns.is_empty() {
            return Cfg::default();
        }

        // Pass 1: leaders — the function entry, every branch target inside
        // this stream, and every instruction right after a branch.
        let mut leaders: BTreeSet<u32> = BTreeSet::new();
        leaders.insert(insns[0].offset);
        for (i, insn) in insns.iter().enumerate() {
            if let Some(target) = insn.target {
                leaders.insert(target);
            }
            if is_branch(insn.op) {
                if let Some(next) = insns.get(i + 1) {
                    leaders.insert(next.offset);
                }
            }
        }

        // Pass 2: partition into blocks at each leader boundary.
        let leaders: Vec<u32> = leaders.into_iter().collect();
        let mut blocks = Vec::with_capacity(leaders.len());
        for (i, &start) in leaders.iter().enumerate() {
            let end = leaders
                .get(i + 1)
                .copied()
                .unwrap_or_else(|| insns.last().map(|insn| insn.offset + 4).unwrap_or(start));
            blocks.push(BasicBlock { start, end, successors: Vec::new() });
        }

        // Pass 3: edges — fall-through plus explicit branch targets, taken
        // from the last instruction strictly inside each block.
        for i in 0..blocks.len() {
            let block_end = blocks[i].end;
            let last = insns.iter().rev().find(|insn| insn.offset < block_end);
            let mut successors = Vec::new();
            if let Some(last) = last {
                match last.op {
                    Opcode::B => {
                        if let Some(t) = last.target {
                            successors.push(t);
                        }
                    }
                    Opcode::Bcond | Opcode::Cbz { .. } | Opcode::Cbnz { .. } | Opcode::Tbz | Opcode::Tbnz => {
                        if let Some(t) = last.target {
                            successors.push(t);
                        }
                        successors.push(block_end);
                    }
                    Opcode::Ret => {}
                    _ => {
                        successors.push(block_end);
                    }
                }
            }
            blocks[i].successors = successors;
        }

        Cfg { blocks }
    }
}

fn is_branch(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::B | Opcode::Bcond | Opcode::Cbz { .. } | Opcode::Cbnz { .. } | Opcode::Tbz | Opcode::Tbnz | Opcode::Ret
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::decode::disassemble;

    fn word(op: u32) -> u32 {
        op
    }

    #[test]
    fn nine_instruction_stream_partitions_into_blocks() {
        // 0: add x0, x0, #1
        // 4: cbz x0, +16 (-> offset 20)
        // 8: add x1, x1, #1
        // 12: add x2, x2, #1
        // 16: b +8 (-> offset 24)
        // 20: add x3, x3, #1
        // 24: ret
        let mut insns = Vec::new();
        insns.push(disassemble(0, word(0x91000400)));
        insns.push(disassemble(4, 0x34000000 | (4 << 5))); // imm19=4 -> delta 16 -> target 20
        insns.push(disassemble(8, word(0x91000421)));
        insns.push(disassemble(12, word(0x91000442)));
        insns.push(disassemble(16, 0x14000000 | 2)); // imm26=2 -> delta 8 -> target 24
        insns.push(disassemble(20, word(0x91000463)));
        insns.push(disassemble(24, 0xD65F0000 | (30 << 5)));

        let cfg = CFGBuilder::build(&insns);
        assert!(cfg.blocks.len() >= 4);
        let entry = cfg.blocks.iter().find(|b| b.start == 0).unwrap();
        assert!(entry.successors.contains(&8) || entry.successors.contains(&entry.end));
        let ret_block = cfg.blocks.iter().find(|b| b.start == 24).unwrap();
        assert!(ret_block.successors.is_empty());
    }

    #[test]
    fn empty_stream_yields_no_blocks() {
        let cfg = CFGBuilder::build(&[]);
        assert!(cfg.blocks.is_empty());
    }
}
