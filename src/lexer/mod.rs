use lazy_static::lazy_static;
use miette::Report;
use regex::Regex;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::symbol::{Register, Span, SrcFile, SrcOffset};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum TokenKind {
    /// Mnemonic or label, a maximal run of `[A-Za-z0-9_+-]`
    Ident,
    /// `%rN`
    Reg(Register),
    /// `$` followed by a number in one of the customary bases
    Lit(i64),
    Colon,
    Comma,
    LParen,
    RParen,
    /// Statement terminator
    Newline,
    /// `.`-directive, consumed through end of line
    Direc,
    /// Spaces, tabs and carriage returns
    Junk,
    /// `#` or `;` through end of line
    Comment,
    Eof,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Pattern {
    Junk,
    Newline,
    Comment,
    Direc,
    Lit,
    Reg,
    Ident,
    Colon,
    Comma,
    LParen,
    RParen,
}

lazy_static! {
    // Order is important since some patterns are subpatterns of others.
    // Do NOT rearrange without a good hard think.
    static ref PATTERNS: Vec<(Pattern, Regex)> = vec![
        (Pattern::Junk, Regex::new(r"^[ \t\r]+").unwrap()),
        (Pattern::Newline, Regex::new(r"^\n").unwrap()),
        (Pattern::Comment, Regex::new(r"^[#;][^\n]*").unwrap()),
        (Pattern::Direc, Regex::new(r"^\.[^\n]*").unwrap()),
        (Pattern::Lit, Regex::new(r"^\$-?[0-9a-fA-FxX]*").unwrap()),
        (Pattern::Reg, Regex::new(r"^%[a-zA-Z0-9]*").unwrap()),
        // Includes mnemonics and labels.
        (Pattern::Ident, Regex::new(r"^[a-zA-Z0-9_+-]+").unwrap()),
        (Pattern::Colon, Regex::new(r"^:").unwrap()),
        (Pattern::Comma, Regex::new(r"^,").unwrap()),
        (Pattern::LParen, Regex::new(r"^\(").unwrap()),
        (Pattern::RParen, Regex::new(r"^\)").unwrap()),
    ];
}

/// Lex the whole source. Junk and comments are dropped; malformed literals,
/// registers and stray characters are reported and skipped so that one run
/// surfaces every lexing problem at once. Errors are keyed by source offset
/// so the parser can merge them with its own in source order.
pub fn tokenize(src: SrcFile) -> (Vec<Token>, Vec<(usize, Report)>) {
    let mut cursor = Cursor::new(src.src);
    let mut toks = Vec::new();
    let mut errors = Vec::new();
    loop {
        let at = cursor.curr_pt();
        match cursor.advance_token(src) {
            Ok(tok) => match tok.kind {
                TokenKind::Eof => break,
                TokenKind::Junk | TokenKind::Comment => {}
                _ => toks.push(tok),
            },
            Err(report) => errors.push((at, report)),
        }
    }
    (toks, errors)
}

impl Cursor<'static> {
    pub fn advance_token(&mut self, src: SrcFile) -> Result<Token, Report> {
        if self.is_eof() {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span::dummy(),
            });
        }

        for (pat, re) in PATTERNS.iter() {
            if let Some(found) = re.find(self.rest()) {
                let span = Span::new(SrcOffset(self.curr_pt()), found.len());
                self.advance(found.len());
                let kind = match pat {
                    Pattern::Junk => TokenKind::Junk,
                    Pattern::Newline => TokenKind::Newline,
                    Pattern::Comment => TokenKind::Comment,
                    Pattern::Direc => TokenKind::Direc,
                    Pattern::Lit => TokenKind::Lit(parse_literal(found.as_str(), span, src)?),
                    Pattern::Reg => TokenKind::Reg(parse_register(found.as_str(), span, src)?),
                    Pattern::Ident => TokenKind::Ident,
                    Pattern::Colon => TokenKind::Colon,
                    Pattern::Comma => TokenKind::Comma,
                    Pattern::LParen => TokenKind::LParen,
                    Pattern::RParen => TokenKind::RParen,
                };
                return Ok(Token { kind, span });
            }
        }

        let span = Span::new(SrcOffset(self.curr_pt()), 1);
        self.bump();
        Err(error::lex_unknown(span, src))
    }
}

/// Number parsing with `strtol`-style base selection: `0x` hex, leading `0`
/// octal, decimal otherwise. `text` still carries the `$` sigil.
fn parse_literal(text: &str, span: Span, src: SrcFile) -> Result<i64, Report> {
    let body = &text[1..];
    let (negative, digits) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i64>()
    };
    match parsed {
        Ok(val) => Ok(if negative { -val } else { val }),
        Err(_) => Err(error::lex_invalid_lit(span, src)),
    }
}

fn parse_register(text: &str, span: Span, src: SrcFile) -> Result<Register, Report> {
    let body = &text[1..];
    if let Some(num) = body
        .strip_prefix(['r', 'R'])
        .filter(|num| num.len() == 1)
    {
        if let Ok(reg) = num.parse::<Register>() {
            return Ok(reg);
        }
    }
    Err(error::lex_invalid_reg(span, src))
}
