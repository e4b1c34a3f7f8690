//! Fixed mask/value recognition of the narrow ARM64 instruction subset
//! named by spec §4.8. Grounded on the A64 top-level-encoding-group
//! organization in
//! `other_examples/917428c8_tr-nx-time__libs-a2ir-src-aarch64_reader.rs.rs`,
//! scaled down to exactly the named mnemonics; anything else decodes to
//! `Opcode::Unknown` and renders as `.word 0xAABBCCDD` rather than erroring.

/// Dart/Flutter AOT ABI register assignments this crate cares about: the
/// object-pool-pointer and thread-pointer registers referenced throughout
/// `reg_tracker`/`thr` (spec §4.9/§4.10).
pub const PP_REG: u8 = 27;
pub const THR_REG: u8 = 26;
pub const LR_REG: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LdrImm { is64: bool },
    StrImm { is64: bool },
    AddImm,
    Movz,
    Movk,
    Movn,
    Ubfm,
    Bl,
    Blr,
    Ret,
    B,
    Bcond,
    Cbz { is64: bool },
    Cbnz { is64: bool },
    Tbz,
    Tbnz,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct Insn {
    pub offset: u32,
    pub raw: u32,
    pub op: Opcode,
    pub rd: Option<u8>,
    pub rn: Option<u8>,
    pub rt: Option<u8>,
    pub imm: Option<i64>,
    pub cond: Option<u8>,
    /// branch/load-literal target as an absolute byte offset from the
    /// start of this function's instruction stream.
    pub target: Option<u32>,
}

impl Insn {
    fn base(offset: u32, raw: u32, op: Opcode) -> Self {
        Self { offset, raw, op, rd: None, rn: None, rt: None, imm: None, cond: None, target: None }
    }
}

fn bits(raw: u32, hi: u32, lo: u32) -> u32 {
    (raw >> lo) & ((1u32 << (hi - lo + 1)) - 1)
}

fn sign_extend(value: u32, bits_n: u32) -> i64 {
    let shift = 32 - bits_n;
    ((value << shift) as i32 >> shift) as i64
}

/// Decode one 4-byte little-endian ARM64 instruction word at `offset`.
/// Always succeeds: instructions outside the named subset come back as
/// `Opcode::Unknown` so callers can render `.word` and keep walking.
pub fn disassemble(offset: u32, word: u32) -> Insn {
    let rd = (word & 0x1F) as u8;
    let rn = bits(word, 9, 5) as u8;
    let rt = (word & 0x1F) as u8;

    if word & 0xFFC00000 == 0xF9400000 {
        let mut i = Insn::base(offset, word, Opcode::LdrImm { is64: true });
        i.rt = Some(rt);
        i.rn = Some(rn);
        i.imm = Some((bits(word, 21, 10) * 8) as i64);
        return i;
    }
    if word & 0xFFC00000 == 0xB9400000 {
        let mut i = Insn::base(offset, word, Opcode::LdrImm { is64: false });
        i.rt = Some(rt);
        i.rn = Some(rn);
        i.imm = Some((bits(word, 21, 10) * 4) as i64);
        return i;
    }
    if word & 0xFFC00000 == 0xF9000000 {
        let mut i = Insn::base(offset, word, Opcode::StrImm { is64: true });
        i.rt = Some(rt);
        i.rn = Some(rn);
        i.imm = Some((bits(word, 21, 10) * 8) as i64);
        return i;
    }
    if word & 0xFFC00000 == 0xB9000000 {
        let mut i = Insn::base(offset, word, Opcode::StrImm { is64: false });
        i.rt = Some(rt);
        i.rn = Some(rn);
        i.imm = Some((bits(word, 21, 10) * 4) as i64);
        return i;
    }
    if word & 0xFFC00000 == 0x91000000 {
        let mut i = Insn::base(offset, word, Opcode::AddImm);
        i.rd = Some(rd);
        i.rn = Some(rn);
        i.imm = Some(bits(word, 21, 10) as i64);
        return i;
    }
    if word & 0xFFE00000 == 0xD2800000 {
        let mut i = Insn::base(offset, word, Opcode::Movz);
        i.rd = Some(rd);
        i.imm = Some(bits(word, 20, 5) as i64);
        return i;
    }
    if word & 0xFFE00000 == 0xF2800000 {
        let mut i = Insn::base(offset, word, Opcode::Movk);
        i.rd = Some(rd);
        i.imm = Some(bits(word, 20, 5) as i64);
        return i;
    }
    if word & 0xFFE00000 == 0x92800000 {
        let mut i = Insn::base(offset, word, Opcode::Movn);
        i.rd = Some(rd);
        i.imm = Some(bits(word, 20, 5) as i64);
        return i;
    }
    if word & 0xFFC00000 == 0xD3400000 {
        let mut i = Insn::base(offset, word, Opcode::Ubfm);
        i.rd = Some(rd);
        i.rn = Some(rn);
        i.imm = Some(bits(word, 21, 16) as i64); // immr
        return i;
    }
    if word & 0xFC000000 == 0x94000000 {
        let imm26 = bits(word, 25, 0);
        let delta = sign_extend(imm26, 26) * 4;
        let mut i = Insn::base(offset, word, Opcode::Bl);
        i.imm = Some(delta);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }
    if word & 0xFFFFFC1F == 0xD63F0000 {
        let mut i = Insn::base(offset, word, Opcode::Blr);
        i.rn = Some(rn);
        return i;
    }
    if word & 0xFFFFFC1F == 0xD65F0000 {
        let mut i = Insn::base(offset, word, Opcode::Ret);
        i.rn = Some(rn);
        return i;
    }
    if word & 0xFC000000 == 0x14000000 {
        let imm26 = bits(word, 25, 0);
        let delta = sign_extend(imm26, 26) * 4;
        let mut i = Insn::base(offset, word, Opcode::B);
        i.imm = Some(delta);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }
    if word & 0xFF000010 == 0x54000000 {
        let imm19 = bits(word, 23, 5);
        let delta = sign_extend(imm19, 19) * 4;
        let mut i = Insn::base(offset, word, Opcode::Bcond);
        i.cond = Some((word & 0xF) as u8);
        i.imm = Some(delta);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }
    if word & 0x7F000000 == 0x34000000 || word & 0x7F000000 == 0xB4000000 {
        let is64 = word & 0x80000000 != 0;
        let imm19 = bits(word, 23, 5);
        let delta = sign_extend(imm19, 19) * 4;
        let mut i = Insn::base(offset, word, Opcode::Cbz { is64 });
        i.rt = Some(rt);
        i.imm = Some(delta);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }
    if word & 0x7F000000 == 0x35000000 || word & 0x7F000000 == 0xB5000000 {
        let is64 = word & 0x80000000 != 0;
        let imm19 = bits(word, 23, 5);
        let delta = sign_extend(imm19, 19) * 4;
        let mut i = Insn::base(offset, word, Opcode::Cbnz { is64 });
        i.rt = Some(rt);
        i.imm = Some(delta);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }
    if word & 0x7F000000 == 0x36000000 {
        let imm14 = bits(word, 18, 5);
        let delta = sign_extend(imm14, 14) * 4;
        let bit_pos = bits(word, 23, 19) | ((word >> 26) & 1) << 5;
        let mut i = Insn::base(offset, word, Opcode::Tbz);
        i.rt = Some(rt);
        i.imm = Some(delta);
        i.cond = Some(bit_pos as u8);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }
    if word & 0x7F000000 == 0x37000000 {
        let imm14 = bits(word, 18, 5);
        let delta = sign_extend(imm14, 14) * 4;
        let bit_pos = bits(word, 23, 19) | ((word >> 26) & 1) << 5;
        let mut i = Insn::base(offset, word, Opcode::Tbnz);
        i.rt = Some(rt);
        i.imm = Some(delta);
        i.cond = Some(bit_pos as u8);
        i.target = Some((offset as i64 + delta) as u32);
        return i;
    }

    Insn::base(offset, word, Opcode::Unknown)
}

/// Text rendering for an instruction; unknown words render as `.word`
/// (spec §7: disassembly errors degrade gracefully, never fail the pass).
pub fn render(insn: &Insn) -> String {
    match insn.op {
        Opcode::Unknown => format!(".word {:#010x}", insn.raw),
        Opcode::LdrImm { is64 } => format!(
            "ldr {}{}, [x{}, #{}]",
            if is64 { "x" } else { "w" },
            insn.rt.unwrap_or(31),
            insn.rn.unwrap_or(31),
            insn.imm.unwrap_or(0)
        ),
        Opcode::StrImm { is64 } => format!(
            "str {}{}, [x{}, #{}]",
            if is64 { "x" } else { "w" },
            insn.rt.unwrap_or(31),
            insn.rn.unwrap_or(31),
            insn.imm.unwrap_or(0)
        ),
        Opcode::AddImm => {
            format!("add x{}, x{}, #{}", insn.rd.unwrap_or(31), insn.rn.unwrap_or(31), insn.imm.unwrap_or(0))
        }
        Opcode::Movz => format!("movz x{}, #{}", insn.rd.unwrap_or(31), insn.imm.unwrap_or(0)),
        Opcode::Movk => format!("movk x{}, #{}", insn.rd.unwrap_or(31), insn.imm.unwrap_or(0)),
        Opcode::Movn => format!("movn x{}, #{}", insn.rd.unwrap_or(31), insn.imm.unwrap_or(0)),
        Opcode::Ubfm => format!("ubfm x{}, x{}, #{}", insn.rd.unwrap_or(31), insn.rn.unwrap_or(31), insn.imm.unwrap_or(0)),
        Opcode::Bl => format!("bl {:#x}", insn.target.unwrap_or(0)),
        Opcode::Blr => format!("blr x{}", insn.rn.unwrap_or(31)),
        Opcode::Ret => format!("ret x{}", insn.rn.unwrap_or(LR_REG)),
        Opcode::B => format!("b {:#x}", insn.target.unwrap_or(0)),
        Opcode::Bcond => format!("b.{} {:#x}", insn.cond.unwrap_or(0), insn.target.unwrap_or(0)),
        Opcode::Cbz { is64 } => format!(
            "cbz {}{}, {:#x}",
            if is64 { "x" } else { "w" },
            insn.rt.unwrap_or(31),
            insn.target.unwrap_or(0)
        ),
        Opcode::Cbnz { is64 } => format!(
            "cbnz {}{}, {:#x}",
            if is64 { "x" } else { "w" },
            insn.rt.unwrap_or(31),
            insn.target.unwrap_or(0)
        ),
        Opcode::Tbz => format!("tbz x{}, #{}, {:#x}", insn.rt.unwrap_or(31), insn.cond.unwrap_or(0), insn.target.unwrap_or(0)),
        Opcode::Tbnz => format!("tbnz x{}, #{}, {:#x}", insn.rt.unwrap_or(31), insn.cond.unwrap_or(0), insn.target.unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ldr_x16_from_thr() {
        // ldr x16, [x28, #8]  (PP-register-style load off THR)
        let word = 0xF9400000 | ((1u32) << 10) | ((THR_REG as u32) << 5) | 16;
        let insn = disassemble(0, word);
        assert!(matches!(insn.op, Opcode::LdrImm { is64: true }));
        assert_eq!(insn.rn, Some(THR_REG));
        assert_eq!(insn.rt, Some(16));
        assert_eq!(insn.imm, Some(8));
    }

    #[test]
    fn decodes_bl_with_forward_target() {
        let word = 0x94000000 | 4; // imm26 = 4 -> delta = 16
        let insn = disassemble(100, word);
        assert!(matches!(insn.op, Opcode::Bl));
        assert_eq!(insn.target, Some(116));
    }

    #[test]
    fn unknown_word_renders_as_dotword() {
        let insn = disassemble(0, 0xAABBCCDD);
        assert_eq!(insn.op, Opcode::Unknown);
        assert_eq!(render(&insn), ".word 0xaabbccdd");
    }

    #[test]
    fn decodes_ret() {
        let word = 0xD65F0000 | ((LR_REG as u32) << 5);
        let insn = disassemble(0, word);
        assert!(matches!(insn.op, Opcode::Ret));
        assert_eq!(insn.rn, Some(LR_REG));
    }

    #[test]
    fn decodes_cbz_and_tbnz_targets() {
        let cbz = 0x34000000 | (2 << 5) | 9; // imm19=2 -> delta 8, rt=9
        let insn = disassemble(0, cbz);
        assert!(matches!(insn.op, Opcode::Cbz { is64: false }));
        assert_eq!(insn.target, Some(8));

        let tbnz = 0x37000000 | (1 << 5) | 3;
        let insn = disassemble(0, tbnz);
        assert!(matches!(insn.op, Opcode::Tbnz));
        assert_eq!(insn.target, Some(4));
    }
}
