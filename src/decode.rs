//! Instruction decode for the reference model: recovers the control signals
//! the datapath needs from a raw 16-bit word, given the current flag state.

use crate::isa::{self, InsnClass, Opcode, IMM5_MASK, IMM8_MASK, RD_SHIFT, REG_MASK, RS_SHIFT};
use crate::runtime::Flags;

/// Execution shape of a decoded word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InsnType {
    AmiRegReg,
    AmiRegImm,
    BraJal,
    MemLw,
    MemSw,
    /// Untaken branches, plain jumps and reserved encodings
    None,
}

/// Where the next instruction comes from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NextPc {
    /// Taken branch, PC-relative immediate
    Imm,
    /// Taken branch through a register
    Reg,
    /// Fall through
    Inc,
}

/// Control-signal bundle produced by [`decode`].
#[derive(Clone, Copy, Debug)]
pub struct Decoded {
    pub opcode: Option<Opcode>,
    pub insn_type: InsnType,
    pub next_pc: NextPc,
    /// ALU operation; meaningful only when `alu_en` is set.
    pub alu_op: Opcode,
    pub alu_en: bool,
    /// Immediate, already zero- or sign-extended per class.
    pub imm: u16,
    /// Raw destination register field (first read port).
    pub rd: u16,
    /// Raw source register field (second read port).
    pub rs: u16,
    /// Register the writeback targets; r7 for `jal`.
    pub regdst: u16,
    pub reg_we: bool,
    pub mem_we: bool,
    pub flag_we: bool,
}

impl Decoded {
    /// Reserved encodings behave as a no-op that falls through.
    fn nop(rd: u16, rs: u16) -> Self {
        Decoded {
            opcode: None,
            insn_type: InsnType::None,
            next_pc: NextPc::Inc,
            alu_op: Opcode::Or,
            alu_en: false,
            imm: 0,
            rd,
            rs,
            regdst: rd,
            reg_we: false,
            mem_we: false,
            flag_we: false,
        }
    }
}

/// Decode one instruction word against the current flags. Flags matter only
/// for the branch-taken decision; everything else is combinational on the
/// word itself.
pub fn decode(word: u16, flags: Flags) -> Decoded {
    let rd = (word >> RD_SHIFT) & REG_MASK;
    let rs = (word >> RS_SHIFT) & REG_MASK;
    let Some(op) = Opcode::from_word(word) else {
        return Decoded::nop(rd, rs);
    };

    let mut dec = Decoded::nop(rd, rs);
    dec.opcode = Some(op);

    match op.class() {
        InsnClass::Ami => {
            dec.alu_en = true;
            dec.alu_op = op;
            dec.flag_we = op.sets_flags();
            dec.reg_we = op != Opcode::Cmp;
            // The wide moves always take the immediate path; for the rest a
            // non-zero RS selects the register form.
            if matches!(op, Opcode::Movhi | Opcode::Movlo) {
                dec.insn_type = InsnType::AmiRegImm;
                dec.imm = word & IMM8_MASK;
            } else if rs != 0 {
                dec.insn_type = InsnType::AmiRegReg;
            } else {
                dec.insn_type = InsnType::AmiRegImm;
                dec.imm = word & IMM5_MASK;
            }
        }
        InsnClass::Bra => {
            dec.imm = isa::sign_extend(word & IMM8_MASK, 8);
            if branch_taken(op, flags) {
                dec.next_pc = if rd == 0 { NextPc::Imm } else { NextPc::Reg };
            }
            if op == Opcode::Jal {
                dec.insn_type = InsnType::BraJal;
                dec.reg_we = true;
                dec.regdst = 7;
            }
        }
        InsnClass::Mem => {
            dec.alu_en = true;
            dec.alu_op = Opcode::Add;
            dec.imm = isa::sign_extend(word & IMM5_MASK, 5);
            if op == Opcode::Lw {
                dec.insn_type = InsnType::MemLw;
                dec.reg_we = true;
            } else {
                dec.insn_type = InsnType::MemSw;
                dec.mem_we = true;
            }
        }
    }
    dec
}

/// Branch condition table.
pub fn branch_taken(op: Opcode, flags: Flags) -> bool {
    let zf = flags.contains(Flags::Z);
    let sf = flags.contains(Flags::S);
    let cf = flags.contains(Flags::C);
    let of = flags.contains(Flags::O);
    match op {
        Opcode::Je => zf,
        Opcode::Jne => !zf,
        Opcode::Jgs => !zf && sf == of,
        Opcode::Jgu => !cf && !zf,
        Opcode::Jges => sf == of,
        Opcode::Jgeu => !cf,
        Opcode::Jls => sf != of,
        Opcode::Jlu => cf,
        Opcode::Jles => zf || sf != of,
        Opcode::Jleu => cf || zf,
        Opcode::J | Opcode::Jal => true,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::air::Air;
    use crate::parser::AsmParser;
    use crate::symbol::{reset_state, SrcFile};

    fn assemble(src: &'static str) -> Air {
        reset_state();
        let mut air = AsmParser::new(SrcFile::new("test.s", src), isa::DEFAULT_PC_WIDTH)
            .parse()
            .unwrap();
        air.backpatch().unwrap();
        air
    }

    #[test]
    fn decode_ami_reg_imm() {
        let word = assemble("or %r1, $5").words()[0];
        let dec = decode(word, Flags::empty());
        assert_eq!(dec.opcode, Some(Opcode::Or));
        assert_eq!(dec.insn_type, InsnType::AmiRegImm);
        assert_eq!(dec.next_pc, NextPc::Inc);
        assert_eq!((dec.rd, dec.imm), (1, 5));
        assert!(dec.alu_en && dec.reg_we && dec.flag_we && !dec.mem_we);
    }

    #[test]
    fn decode_ami_reg_reg() {
        let word = assemble("add %r2, %r3").words()[0];
        let dec = decode(word, Flags::empty());
        assert_eq!(dec.insn_type, InsnType::AmiRegReg);
        assert_eq!((dec.rd, dec.rs), (2, 3));
    }

    #[test]
    fn decode_cmp_suppresses_writeback() {
        let word = assemble("cmp %r1, %r2").words()[0];
        let dec = decode(word, Flags::empty());
        assert!(!dec.reg_we);
        assert!(dec.flag_we);
    }

    #[test]
    fn decode_moves_are_imm_form_with_wide_imm() {
        let word = assemble("movhi %r1, $0xAB").words()[0];
        let dec = decode(word, Flags::empty());
        assert_eq!(dec.insn_type, InsnType::AmiRegImm);
        assert_eq!(dec.imm, 0xAB);
        assert!(!dec.flag_we);
    }

    #[test]
    fn decode_branch_taken_and_untaken() {
        let word = assemble("je $4").words()[0];
        let taken = decode(word, Flags::Z);
        assert_eq!(taken.next_pc, NextPc::Imm);
        assert_eq!(taken.imm, 4);
        let untaken = decode(word, Flags::empty());
        assert_eq!(untaken.next_pc, NextPc::Inc);
    }

    #[test]
    fn decode_branch_register_form() {
        let word = assemble("j %r3").words()[0];
        let dec = decode(word, Flags::empty());
        assert_eq!(dec.next_pc, NextPc::Reg);
        assert_eq!(dec.rd, 3);
    }

    #[test]
    fn decode_branch_negative_displacement() {
        let word = assemble("j $-5").words()[0];
        let dec = decode(word, Flags::empty());
        assert_eq!(dec.imm, (-5i16) as u16);
    }

    #[test]
    fn decode_jal_links_r7() {
        let word = assemble("jal $2").words()[0];
        let dec = decode(word, Flags::empty());
        assert_eq!(dec.insn_type, InsnType::BraJal);
        assert!(dec.reg_we);
        assert_eq!(dec.regdst, 7);
    }

    #[test]
    fn decode_memory_ops() {
        let air = assemble("lw %r3, $-2(%r4)\nsw %r1, $3(%r2)");
        let lw = decode(air.words()[0], Flags::empty());
        assert_eq!(lw.insn_type, InsnType::MemLw);
        assert_eq!(lw.alu_op, Opcode::Add);
        assert_eq!(lw.imm, (-2i16) as u16);
        assert!(lw.reg_we && !lw.mem_we && !lw.flag_we);
        let sw = decode(air.words()[1], Flags::empty());
        assert_eq!(sw.insn_type, InsnType::MemSw);
        assert!(sw.mem_we && !sw.reg_we);
    }

    #[test]
    fn decode_reserved_opcode_is_nop() {
        let dec = decode(27 << isa::OPC_SHIFT, Flags::empty());
        assert_eq!(dec.opcode, None);
        assert_eq!(dec.insn_type, InsnType::None);
        assert_eq!(dec.next_pc, NextPc::Inc);
        assert!(!dec.reg_we && !dec.mem_we && !dec.alu_en);
    }

    #[test]
    fn branch_condition_table() {
        use Opcode::*;
        // signed greater: ZF=0 and SF=OF
        assert!(branch_taken(Jgs, Flags::empty()));
        assert!(branch_taken(Jgs, Flags::S | Flags::O));
        assert!(!branch_taken(Jgs, Flags::Z));
        assert!(!branch_taken(Jgs, Flags::S));
        // unsigned compares ride the carry
        assert!(branch_taken(Jlu, Flags::C));
        assert!(!branch_taken(Jlu, Flags::empty()));
        assert!(branch_taken(Jgeu, Flags::empty()));
        assert!(!branch_taken(Jgeu, Flags::C));
        assert!(branch_taken(Jgu, Flags::empty()));
        assert!(!branch_taken(Jgu, Flags::C | Flags::Z));
        // less-or-equal unions
        assert!(branch_taken(Jles, Flags::Z));
        assert!(branch_taken(Jles, Flags::S));
        assert!(!branch_taken(Jles, Flags::empty()));
        assert!(branch_taken(Jleu, Flags::Z));
        assert!(branch_taken(Jleu, Flags::C));
        assert!(!branch_taken(Jleu, Flags::empty()));
        // unconditional
        assert!(branch_taken(J, Flags::empty()));
        assert!(branch_taken(Jal, Flags::empty()));
    }

    #[test]
    fn round_trip_matches_intent() {
        let air = assemble(
            "start: or %r1, $5\nadd %r2, %r3\nnot %r4\nmovlo %r5, $9\n\
             cmp %r1, $5\nje start\nlw %r6, $1(%r2)\nsw %r6, $2(%r2)\nnop\n",
        );
        for (i, word) in air.words().into_iter().enumerate() {
            let dec = decode(word, Flags::Z);
            match i {
                0 => assert_eq!((dec.opcode, dec.rd, dec.imm), (Some(Opcode::Or), 1, 5)),
                1 => assert_eq!((dec.opcode, dec.rd, dec.rs), (Some(Opcode::Add), 2, 3)),
                2 => assert_eq!((dec.opcode, dec.rd), (Some(Opcode::Not), 4)),
                3 => assert_eq!((dec.opcode, dec.rd, dec.imm), (Some(Opcode::Movlo), 5, 9)),
                4 => assert!(!dec.reg_we),
                5 => assert_eq!(dec.next_pc, NextPc::Imm),
                6 => assert_eq!(dec.insn_type, InsnType::MemLw),
                7 => assert_eq!(dec.insn_type, InsnType::MemSw),
                8 => assert_eq!((dec.opcode, dec.rd), (Some(Opcode::Neg), 0)),
                _ => unreachable!(),
            }
        }
    }
}
