use std::{iter::Peekable, vec::IntoIter};

use miette::Report;

use crate::{
    air::{Air, AirStmt, AmiSrc},
    error,
    isa::{
        self, Grammar, Opcode, MAX_IMM_AMI, MAX_IMM_BRA, MAX_IMM_LOHI, MAX_IMM_MEM, MIN_IMM_AMI,
        MIN_IMM_BRA, MIN_IMM_LOHI, MIN_IMM_MEM,
    },
    lexer::{self, Token, TokenKind},
    symbol::{Label, Register, Span, SrcFile},
};

/// Transforms the token stream into AIR.
///
/// Parsing is line-oriented: an error inside a statement is recorded and the
/// parser resynchronizes at the next newline, so a single run reports every
/// problem in the file. No output is produced if any diagnostic fired.
pub struct AsmParser {
    /// Reference to the source file
    src: SrcFile,
    /// Peekable iterator over tokens
    toks: Peekable<IntoIter<Token>>,
    /// Assembly intermediate representation
    air: Air,
    /// Tracker for current line
    line: u16,
    /// Diagnostics collected so far, keyed by source offset
    errors: Vec<(usize, Report)>,
}

impl AsmParser {
    pub fn new(src: SrcFile, pc_width: u8) -> Self {
        let (toks, errors) = lexer::tokenize(src);
        AsmParser {
            src,
            toks: toks.into_iter().peekable(),
            air: Air::new(src, pc_width),
            line: 1,
            errors,
        }
    }

    fn get_span(&self, span: Span) -> &'static str {
        &self.src.src[span.as_range()]
    }

    /// Create AIR out of token stream
    pub fn parse(mut self) -> Result<Air, Vec<Report>> {
        while let Some(tok) = self.toks.next() {
            match tok.kind {
                TokenKind::Newline => self.line += 1,
                // Directives consume their whole line; the newline follows.
                TokenKind::Direc => {}
                TokenKind::Ident => {
                    // Label definition or mnemonic
                    if self.peek_is(TokenKind::Colon) {
                        self.toks.next();
                        let name = self.get_span(tok.span);
                        if Label::insert(name, self.air.len() as u16).is_err() {
                            self.errors.push((
                                tok.span.offs(),
                                error::parse_duplicate_label(tok.span, self.src),
                            ));
                        }
                    } else if let Err(report) = self.parse_stmt(tok) {
                        self.errors.push((tok.span.offs(), report));
                        self.sync_line();
                    }
                }
                TokenKind::Eof => break,
                _ => {
                    self.errors.push((
                        tok.span.offs(),
                        error::parse_unexpected_token(tok.span, self.src),
                    ));
                    self.sync_line();
                }
            }
        }

        if self.air.len() > self.air.capacity() {
            self.errors.push((
                usize::MAX,
                error::parse_program_too_long(self.src, self.air.len(), self.air.capacity()),
            ));
        }

        if self.errors.is_empty() {
            Ok(self.air)
        } else {
            // Lexer and parser diagnostics interleave in source order
            self.errors.sort_by_key(|(offs, _)| *offs);
            Err(self.errors.into_iter().map(|(_, report)| report).collect())
        }
    }

    /// Process several tokens to form a valid AIR statement
    fn parse_stmt(&mut self, mnemonic: Token) -> Result<(), Report> {
        let text = self.get_span(mnemonic.span);
        let Some((op, grammar)) = isa::lookup(text) else {
            return Err(error::parse_unknown_mnemonic(mnemonic.span, self.src, text));
        };

        let stmt = match grammar {
            Grammar::NoOperand => AirStmt::Nop,
            Grammar::Single => self.parse_single(op)?,
            Grammar::Double => self.parse_double(op)?,
            Grammar::Memory => self.parse_memory(op)?,
        };
        // The terminator check consumes the newline and advances the line
        // counter, so the record keeps the statement's own line.
        let line = self.line;
        self.expect_end(op)?;
        self.air.add_stmt(line, stmt);
        Ok(())
    }

    /// Single operand: a register for the unary ALU ops; a register,
    /// immediate displacement or label for branches.
    fn parse_single(&mut self, op: Opcode) -> Result<AirStmt, Report> {
        if op.class() == isa::InsnClass::Ami {
            let dest = self.expect_reg(op)?;
            return Ok(AirStmt::AmiUnary { op, dest });
        }

        let tok = self.next_operand(op)?;
        match tok.kind {
            TokenKind::Reg(target) => {
                // r0 is the discriminator for the immediate form and cannot
                // name a branch target.
                if target == Register::R0 {
                    return Err(error::parse_branch_on_r0(tok.span, self.src, op));
                }
                Ok(AirStmt::BranchReg { op, target })
            }
            TokenKind::Lit(val) => {
                if !(MIN_IMM_BRA..=MAX_IMM_BRA).contains(&val) {
                    return Err(error::parse_imm_range(tok.span, self.src, val, op));
                }
                Ok(AirStmt::BranchImm {
                    op,
                    disp: val as i8,
                })
            }
            TokenKind::Ident => {
                let name = self.get_span(tok.span);
                let dest_label = Label::try_fill(name);
                // Backward references resolve now and get their range check
                // in source order; forward references wait for backpatch.
                if let Label::Ref(off) = dest_label {
                    let pc = self.air.len() as u16;
                    if isa::branch_displacement(off, pc).is_none() {
                        let disp = off as i64 - pc as i64;
                        return Err(error::parse_branch_too_far(tok.span, self.src, name, disp));
                    }
                }
                Ok(AirStmt::BranchLabel { op, dest_label })
            }
            _ => Err(error::parse_invalid_operand(tok.span, self.src, op)),
        }
    }

    /// Two operands: `rd, (rs | $imm | label)`. The moves with 8-bit
    /// immediates reject registers and labels.
    fn parse_double(&mut self, op: Opcode) -> Result<AirStmt, Report> {
        let dest = self.expect_reg(op)?;
        self.expect_comma(op)?;
        let wide_imm = matches!(op, Opcode::Movhi | Opcode::Movlo);

        let tok = self.next_operand(op)?;
        match tok.kind {
            TokenKind::Reg(rs) => {
                if wide_imm {
                    return Err(error::parse_imm_only(tok.span, self.src, op));
                }
                Ok(AirStmt::Ami {
                    op,
                    dest,
                    src: AmiSrc::Reg(rs),
                })
            }
            TokenKind::Lit(val) => {
                if wide_imm {
                    if !(MIN_IMM_LOHI..=MAX_IMM_LOHI).contains(&val) {
                        return Err(error::parse_imm_range(tok.span, self.src, val, op));
                    }
                    Ok(AirStmt::MovImm {
                        op,
                        dest,
                        imm: val as u16 & 0xFF,
                    })
                } else {
                    if !(MIN_IMM_AMI..=MAX_IMM_AMI).contains(&val) {
                        return Err(error::parse_imm_range(tok.span, self.src, val, op));
                    }
                    Ok(AirStmt::Ami {
                        op,
                        dest,
                        src: AmiSrc::Imm(val as u8 & 0x1F),
                    })
                }
            }
            TokenKind::Ident => {
                if wide_imm {
                    return Err(error::parse_imm_only(tok.span, self.src, op));
                }
                let name = self.get_span(tok.span);
                let label = Label::try_fill(name);
                if let Label::Ref(off) = label {
                    if off as i64 > MAX_IMM_AMI {
                        return Err(error::parse_ami_label_range(tok.span, self.src, name, off));
                    }
                }
                Ok(AirStmt::Ami {
                    op,
                    dest,
                    src: AmiSrc::Label(label),
                })
            }
            _ => Err(error::parse_invalid_operand(tok.span, self.src, op)),
        }
    }

    /// Memory access: `rd, $imm(rs)` with exact punctuation.
    fn parse_memory(&mut self, op: Opcode) -> Result<AirStmt, Report> {
        let reg = self.expect_reg(op)?;
        self.expect_comma(op)?;

        let tok = self.next_operand(op)?;
        let TokenKind::Lit(val) = tok.kind else {
            return Err(error::parse_invalid_operand(tok.span, self.src, op));
        };
        if !(MIN_IMM_MEM..=MAX_IMM_MEM).contains(&val) {
            return Err(error::parse_imm_range(tok.span, self.src, val, op));
        }

        self.expect_kind(TokenKind::LParen, op)?;
        let base = self.expect_reg(op)?;
        self.expect_kind(TokenKind::RParen, op)?;

        Ok(AirStmt::MemAccess {
            op,
            reg,
            offset: val as i8,
            base,
        })
    }

    /// After the final operand only a newline or the end of input may follow.
    fn expect_end(&mut self, op: Opcode) -> Result<(), Report> {
        match self.toks.peek() {
            None | Some(Token { kind: TokenKind::Eof, .. }) => Ok(()),
            Some(Token { kind: TokenKind::Newline, .. }) => {
                self.toks.next();
                self.line += 1;
                Ok(())
            }
            Some(tok) => Err(error::parse_invalid_operand(tok.span, self.src, op)),
        }
    }

    fn next_operand(&mut self, op: Opcode) -> Result<Token, Report> {
        match self.toks.next() {
            Some(tok) if !matches!(tok.kind, TokenKind::Newline | TokenKind::Eof) => Ok(tok),
            Some(tok) => Err(error::parse_invalid_operand(tok.span, self.src, op)),
            None => Err(error::parse_eof(self.src, op)),
        }
    }

    fn expect_reg(&mut self, op: Opcode) -> Result<Register, Report> {
        let tok = self.next_operand(op)?;
        match tok.kind {
            TokenKind::Reg(reg) => Ok(reg),
            _ => Err(error::parse_invalid_operand(tok.span, self.src, op)),
        }
    }

    fn expect_comma(&mut self, op: Opcode) -> Result<(), Report> {
        self.expect_kind(TokenKind::Comma, op)
    }

    fn expect_kind(&mut self, expected: TokenKind, op: Opcode) -> Result<(), Report> {
        let tok = self.next_operand(op)?;
        if tok.kind == expected {
            Ok(())
        } else {
            Err(error::parse_invalid_operand(tok.span, self.src, op))
        }
    }

    fn peek_is(&mut self, kind: TokenKind) -> bool {
        matches!(self.toks.peek(), Some(tok) if tok.kind == kind)
    }

    /// Skip to the start of the next line after an error.
    fn sync_line(&mut self) {
        for tok in self.toks.by_ref() {
            if tok.kind == TokenKind::Newline {
                self.line += 1;
                break;
            }
        }
    }
}
