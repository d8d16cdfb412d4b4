use miette::{miette, LabeledSpan, Report, Severity};

use crate::isa::{
    Opcode, MAX_IMM_AMI, MAX_IMM_BRA, MAX_IMM_LOHI, MAX_IMM_MEM, MIN_IMM_AMI, MIN_IMM_BRA,
    MIN_IMM_LOHI, MIN_IMM_MEM,
};
use crate::symbol::{Span, SrcFile};

// Lexer errors

pub fn lex_unknown(span: Span, src: SrcFile) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::unknown",
        help = "registers are written %r0..%r7 and immediates $n",
        labels = vec![LabeledSpan::at(span, "unknown token")],
        "Encountered an unknown token",
    )
    .with_source_code(src.named())
}

pub fn lex_invalid_lit(span: Span, src: SrcFile) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::bad_lit",
        help = "immediates use C-style bases: $10, $0x1f, $017, $-4",
        labels = vec![LabeledSpan::at(span, "incorrect literal")],
        "invalid number",
    )
    .with_source_code(src.named())
}

pub fn lex_invalid_reg(span: Span, src: SrcFile) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::bad_reg",
        help = "valid registers are %r0 through %r7",
        labels = vec![LabeledSpan::at(span, "not a register")],
        "Invalid register reference",
    )
    .with_source_code(src.named())
}

// Parser errors

pub fn parse_unknown_mnemonic(span: Span, src: SrcFile, found: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::mnemonic",
        help = "check the mnemonic against the instruction listing",
        labels = vec![LabeledSpan::at(span, "unknown mnemonic")],
        "instruction ({found}) does not exist",
    )
    .with_source_code(src.named())
}

pub fn parse_duplicate_label(span: Span, src: SrcFile) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::duplicate_label",
        help = "each label may be defined only once per file",
        labels = vec![LabeledSpan::at(span, "duplicate label")],
        "Duplicate label"
    )
    .with_source_code(src.named())
}

pub fn parse_unexpected_token(span: Span, src: SrcFile) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_token",
        help = "lines hold an optional label definition followed by one instruction",
        labels = vec![LabeledSpan::at(span, "unexpected token")],
        "Unexpected token at start of statement",
    )
    .with_source_code(src.named())
}

pub fn parse_invalid_operand(span: Span, src: SrcFile, op: Opcode) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::operand",
        help = format!("check the operand forms accepted by '{op}'"),
        labels = vec![LabeledSpan::at(span, "invalid operand")],
        "invalid operand for '{op}'",
    )
    .with_source_code(src.named())
}

pub fn parse_eof(src: SrcFile, op: Opcode) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_eof",
        help = format!("'{op}' is missing operands"),
        labels = vec![LabeledSpan::at_offset(
            src.src.len().saturating_sub(1),
            "input ends here"
        )],
        "Unexpected end of file",
    )
    .with_source_code(src.named())
}

pub fn parse_branch_on_r0(span: Span, src: SrcFile, op: Opcode) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::branch_reg",
        help = "%r0 marks the immediate branch form and cannot hold a target",
        labels = vec![LabeledSpan::at(span, "reserved register")],
        "register-form '{op}' requires %r1..%r7",
    )
    .with_source_code(src.named())
}

pub fn parse_imm_only(span: Span, src: SrcFile, op: Opcode) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::operand",
        help = format!("'{op}' takes an 8-bit immediate, not a label or register"),
        labels = vec![LabeledSpan::at(span, "invalid operand")],
        "invalid operand for '{op}'",
    )
    .with_source_code(src.named())
}

pub fn parse_imm_range(span: Span, src: SrcFile, found: i64, op: Opcode) -> Report {
    let (min, max) = imm_range(op);
    miette!(
        severity = Severity::Error,
        code = "parse::imm_range",
        help = format!("'{op}' accepts immediates from {min} to {max}"),
        labels = vec![LabeledSpan::at(span, "out-of-range immediate")],
        "invalid number or out-of-range (expects: {min} -- {max}), found {found}",
    )
    .with_source_code(src.named())
}

pub fn parse_branch_too_far(span: Span, src: SrcFile, label: &str, disp: i64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::branch_range",
        help = format!(
            "the displacement to '{label}' is {disp} words; \
             only {MIN_IMM_BRA} to {MAX_IMM_BRA} fit"
        ),
        labels = vec![LabeledSpan::at(span, "target out of reach")],
        "label too far, use register-based branch",
    )
    .with_source_code(src.named())
}

pub fn parse_ami_label_range(span: Span, src: SrcFile, label: &str, off: u16) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::label_range",
        help = format!("'{label}' is at word {off}; only {MIN_IMM_AMI} to {MAX_IMM_AMI} fit"),
        labels = vec![LabeledSpan::at(span, "label offset too large")],
        "label offset does not fit in a 5-bit immediate",
    )
    .with_source_code(src.named())
}

pub fn parse_program_too_long(src: SrcFile, len: usize, capacity: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::too_long",
        help = "raise the program counter width or shrink the program",
        "program is {len} words but the program space holds {capacity}",
    )
    .with_source_code(src.named())
}

// Relocation errors. Spans are gone by this pass, so these carry the
// file:line context in the message.

pub fn patch_undefined_label(src: SrcFile, line: u16, label: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "patch::undefined_label",
        help = "labels are case-sensitive; check the definition",
        "{}:{line}: label ({label}) not found",
        src.name,
    )
}

pub fn patch_branch_too_far(src: SrcFile, line: u16, label: &str, disp: i64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "patch::branch_range",
        help = format!(
            "the displacement to '{label}' is {disp} words; \
             only {MIN_IMM_BRA} to {MAX_IMM_BRA} fit"
        ),
        "{}:{line}: label too far, use register-based branch",
        src.name,
    )
}

pub fn patch_ami_label_range(src: SrcFile, line: u16, label: &str, off: u16) -> Report {
    miette!(
        severity = Severity::Error,
        code = "patch::label_range",
        help = format!("'{label}' is at word {off}; only {MIN_IMM_AMI} to {MAX_IMM_AMI} fit"),
        "{}:{line}: label offset does not fit in a 5-bit immediate",
        src.name,
    )
}

fn imm_range(op: Opcode) -> (i64, i64) {
    use crate::isa::InsnClass;
    match op {
        Opcode::Movhi | Opcode::Movlo => (MIN_IMM_LOHI, MAX_IMM_LOHI),
        op => match op.class() {
            InsnClass::Bra => (MIN_IMM_BRA, MAX_IMM_BRA),
            InsnClass::Mem => (MIN_IMM_MEM, MAX_IMM_MEM),
            InsnClass::Ami => (MIN_IMM_AMI, MAX_IMM_AMI),
        },
    }
}
