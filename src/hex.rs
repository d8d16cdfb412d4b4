//! The hex image format: one `%04x` word per line behind a `//` comment
//! header. This is the only artifact shared between the assembler and the
//! CPU's block RAM loader, so both directions live here.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use miette::{bail, IntoDiagnostic, Result};

use crate::air::Air;

/// Render an assembled program as hex text.
pub fn render(air: &Air, input_name: &str) -> String {
    let mut out = format!("// {input_name} file\n");
    for word in air.words() {
        out.push_str(&format!("{word:04x}\n"));
    }
    out
}

/// Write the hex image for `air` to `path`.
pub fn write_file(air: &Air, path: &Path, input_name: &str) -> Result<()> {
    let mut file = File::create(path).into_diagnostic()?;
    file.write_all(render(air, input_name).as_bytes())
        .into_diagnostic()
}

/// Read a hex image back into words. Blank lines and `//` comments are
/// ignored; anything else must be a 16-bit hex word.
pub fn parse(text: &str) -> Result<Vec<u16>> {
    let mut words = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        match u16::from_str_radix(line, 16) {
            Ok(word) => words.push(word),
            Err(_) => bail!("line {}: invalid hex word '{line}'", idx + 1),
        }
    }
    Ok(words)
}
