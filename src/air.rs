use miette::Report;

use crate::error;
use crate::isa::{
    self, Opcode, IMM5_MASK, IMM8_MASK, MAX_IMM_AMI, OPC_SHIFT, RD_SHIFT, RS_SHIFT,
};
use crate::symbol::{Label, Register, SrcFile};

/// Assembly intermediate representation: the instruction records of one
/// translation unit, in program order.
#[derive(Debug)]
pub struct Air {
    src: SrcFile,
    /// Program counter width; the program space holds `2^pc_width` words.
    pc_width: u8,
    ast: Vec<AsmLine>,
}

impl Air {
    pub fn new(src: SrcFile, pc_width: u8) -> Self {
        Air {
            src,
            pc_width,
            ast: Vec::new(),
        }
    }

    /// Append a statement; its program address is its emission index.
    pub fn add_stmt(&mut self, line: u16, stmt: AirStmt) {
        let pc = self.ast.len() as u16;
        self.ast.push(AsmLine::new(line, pc, stmt));
    }

    pub fn get(&self, idx: usize) -> &AsmLine {
        &self.ast[idx]
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    pub fn pc_width(&self) -> u8 {
        self.pc_width
    }

    /// Words the program space can hold.
    pub fn capacity(&self) -> usize {
        1usize << self.pc_width
    }

    pub fn src(&self) -> SrcFile {
        self.src
    }

    /// Fill label references using values from the symbol table, re-running
    /// the displacement range checks. Visits every record so a single pass
    /// reports every unresolved or out-of-range reference, in program order.
    pub fn backpatch(&mut self) -> Result<(), Vec<Report>> {
        let src = self.src;
        let errors: Vec<Report> = self
            .ast
            .iter_mut()
            .filter_map(|stmt| stmt.backpatch(src).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Encode every record. Only valid after a successful `backpatch`.
    pub fn words(&self) -> Vec<u16> {
        self.ast.iter().map(AsmLine::emit).collect()
    }
}

/// Register or immediate second operand of a binary ALU instruction. Label
/// references resolve to their absolute program-word offset.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AmiSrc {
    Reg(Register),
    /// Stored as unsigned 5 bits; the sign of the written value is ignored.
    Imm(u8),
    Label(Label),
}

impl AmiSrc {
    pub fn bits(&self) -> u16 {
        match self {
            Self::Reg(reg) => (*reg as u16) << RS_SHIFT,
            Self::Imm(val) => *val as u16 & IMM5_MASK,
            Self::Label(Label::Ref(off)) => *off & IMM5_MASK,
            Self::Label(Label::Unfilled(_)) => panic!("tried to encode unfilled label"),
        }
    }
}

/// A single Tangle statement.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AirStmt {
    /// Binary ALU op: `op rd, (rs | $imm | label)`
    Ami {
        op: Opcode,
        dest: Register,
        src: AmiSrc,
    },
    /// Unary ALU op on a single register: `not`/`neg`
    AmiUnary { op: Opcode, dest: Register },
    /// `movhi`/`movlo` with an 8-bit immediate
    MovImm {
        op: Opcode,
        dest: Register,
        imm: u16,
    },
    /// Branch with an explicit displacement in words
    BranchImm { op: Opcode, disp: i8 },
    /// Branch to a label, displacement filled at backpatch
    BranchLabel { op: Opcode, dest_label: Label },
    /// Branch to the address held in a register
    BranchReg { op: Opcode, target: Register },
    /// `lw`/`sw` with a signed 5-bit displacement off a base register
    MemAccess {
        op: Opcode,
        reg: Register,
        offset: i8,
        base: Register,
    },
    /// Encodes as `neg` with all operand fields zero, which reads and
    /// writes the hardwired r0.
    Nop,
}

/// One instruction record: source line, program address and statement.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AsmLine {
    pub line: u16,
    pub pc: u16,
    pub stmt: AirStmt,
}

impl AsmLine {
    pub fn new(line: u16, pc: u16, stmt: AirStmt) -> Self {
        AsmLine { line, pc, stmt }
    }

    /// Resolve a pending label reference against the symbol table.
    pub fn backpatch(&mut self, src: SrcFile) -> Result<(), Report> {
        match &mut self.stmt {
            AirStmt::BranchLabel { dest_label, .. } => {
                if let Label::Unfilled(name) = dest_label {
                    let off = Label::lookup(name)
                        .ok_or_else(|| error::patch_undefined_label(src, self.line, name))?;
                    if isa::branch_displacement(off, self.pc).is_none() {
                        let disp = off as i64 - self.pc as i64;
                        return Err(error::patch_branch_too_far(src, self.line, name, disp));
                    }
                    *dest_label = Label::Ref(off);
                }
            }
            AirStmt::Ami { src: operand, .. } => {
                if let AmiSrc::Label(Label::Unfilled(name)) = operand {
                    let off = Label::lookup(name)
                        .ok_or_else(|| error::patch_undefined_label(src, self.line, name))?;
                    if off as i64 > MAX_IMM_AMI {
                        return Err(error::patch_ami_label_range(src, self.line, name, off));
                    }
                    *operand = AmiSrc::Label(Label::Ref(off));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Return binary representation of a statement
    pub fn emit(&self) -> u16 {
        match &self.stmt {
            AirStmt::Ami { op, dest, src } => {
                let mut raw = (*op as u16) << OPC_SHIFT;
                raw |= (*dest as u16) << RD_SHIFT;
                raw |= src.bits();
                raw
            }
            AirStmt::AmiUnary { op, dest } => {
                let mut raw = (*op as u16) << OPC_SHIFT;
                raw |= (*dest as u16) << RD_SHIFT;
                raw
            }
            AirStmt::MovImm { op, dest, imm } => {
                let mut raw = (*op as u16) << OPC_SHIFT;
                raw |= (*dest as u16) << RD_SHIFT;
                raw |= imm & IMM8_MASK;
                raw
            }
            AirStmt::BranchImm { op, disp } => {
                let raw = (*op as u16) << OPC_SHIFT;
                raw | (*disp as u8 as u16)
            }
            AirStmt::BranchLabel { op, dest_label } => {
                let off = match dest_label {
                    Label::Ref(off) => *off,
                    Label::Unfilled(_) => panic!("tried to encode unfilled label"),
                };
                let raw = (*op as u16) << OPC_SHIFT;
                raw | (off.wrapping_sub(self.pc) & IMM8_MASK)
            }
            AirStmt::BranchReg { op, target } => {
                let raw = (*op as u16) << OPC_SHIFT;
                raw | (*target as u16) << RD_SHIFT
            }
            AirStmt::MemAccess {
                op,
                reg,
                offset,
                base,
            } => {
                let mut raw = (*op as u16) << OPC_SHIFT;
                raw |= (*reg as u16) << RD_SHIFT;
                raw |= (*base as u16) << RS_SHIFT;
                raw |= *offset as u8 as u16 & IMM5_MASK;
                raw
            }
            AirStmt::Nop => (Opcode::Neg as u16) << OPC_SHIFT,
        }
    }
}
