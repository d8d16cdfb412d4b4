//! Heavily inspired and referenced from `rustc_lexer` and adapted to suit the project.
//! See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

/// Position tracker over a static source string.
#[derive(Clone)]
pub struct Cursor<'sess> {
    pos: usize,
    src: &'sess str,
}

impl Cursor<'static> {
    pub fn new(src: &'static str) -> Cursor<'static> {
        Cursor { pos: 0, src }
    }

    /// File is finished lexing
    pub fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Remaining source from the current position
    pub fn rest(&self) -> &'static str {
        &self.src[self.pos..]
    }

    /// Advance by `n` bytes
    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Advance past one character
    pub fn bump(&mut self) {
        let n = self.rest().chars().next().map_or(0, char::len_utf8);
        self.pos += n;
    }

    pub fn curr_pt(&self) -> usize {
        self.pos
    }
}
