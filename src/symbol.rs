use std::{cell::RefCell, ops::Range, str::FromStr};

use fxhash::FxHashMap;
use miette::{miette, NamedSource, Result, SourceSpan};

thread_local! {
    pub static SYMBOL_TABLE: RefCell<FxHashMap<String, u16>> = RefCell::new(FxHashMap::default());
}

pub fn reset_state() {
    with_symbol_table(|sym| sym.clear());
}

/// Access to symbol table via closure
pub fn with_symbol_table<R, F>(f: F) -> R
where
    F: FnOnce(&mut FxHashMap<String, u16>) -> R,
{
    SYMBOL_TABLE.with_borrow_mut(f)
}

/// Program-word offset of a referenced label
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Label {
    Ref(u16),
    Unfilled(String),
}

impl Label {
    /// Called on label definitions. Errors on duplicates.
    pub fn insert(label: &str, off: u16) -> Result<()> {
        with_symbol_table(|sym| {
            // Some is returned if the label already exists
            if sym.insert(label.to_string(), off).is_some() {
                Err(miette!("Label exists"))
            } else {
                Ok(())
            }
        })
    }

    /// Used on label references to resolve them early where possible
    pub fn try_fill(label: &str) -> Self {
        with_symbol_table(|sym| {
            // Fill with existing label value
            if let Some(off) = sym.get(label) {
                Label::Ref(*off)
            } else {
                Label::Unfilled(label.to_string())
            }
        })
    }

    /// Offset for a defined label name, if any
    pub fn lookup(label: &str) -> Option<u16> {
        with_symbol_table(|sym| sym.get(label).copied())
    }

    /// For comparison in tests
    pub fn empty(val: &str) -> Self {
        Label::Unfilled(val.to_string())
    }

    /// Function for testing purposes only
    pub fn dummy(val: u16) -> Self {
        Label::Ref(val)
    }
}

/// Source file contents plus the name shown in rendered diagnostics. The
/// driver leaks both so spans stay valid for the whole run.
#[derive(Clone, Copy, Debug)]
pub struct SrcFile {
    pub name: &'static str,
    pub src: &'static str,
}

impl SrcFile {
    pub fn new(name: &'static str, src: &'static str) -> Self {
        SrcFile { name, src }
    }

    pub fn named(&self) -> NamedSource<&'static str> {
        NamedSource::new(self.name, self.src)
    }
}

/// Location within source str
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: SrcOffset,
    len: usize,
}

impl Span {
    pub fn new(offs: SrcOffset, len: usize) -> Self {
        Span { offs, len }
    }

    /// Non-source span
    pub fn dummy() -> Self {
        Span {
            offs: SrcOffset(0),
            len: 0,
        }
    }

    /// Returns a range that can be used to index the source
    pub fn as_range(&self) -> Range<usize> {
        self.offs()..self.end()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offs(&self) -> usize {
        self.offs.0
    }

    pub fn end(&self) -> usize {
        self.offs.0 + self.len
    }
}

// Used for miette conversion
impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Range<usize>> for Span {
    fn from(value: Range<usize>) -> Self {
        Span {
            offs: SrcOffset(value.start),
            len: value.end - value.start,
        }
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.offs()..value.end()
    }
}

/// Represents the CPU registers. r0 always reads as zero and ignores writes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    /// Used as the link register by `jal`.
    R7,
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Register::R0),
            "1" => Ok(Register::R1),
            "2" => Ok(Register::R2),
            "3" => Ok(Register::R3),
            "4" => Ok(Register::R4),
            "5" => Ok(Register::R5),
            "6" => Ok(Register::R6),
            "7" => Ok(Register::R7),
            _ => Err(()),
        }
    }
}

/// Used to refer to offsets from the start of a source file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SrcOffset(pub usize);
