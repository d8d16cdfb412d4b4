use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use miette::{IntoDiagnostic, MietteHandlerOpts, Report, Result};

use tangle::{hex, isa, AsmParser, SrcFile};

/// tas is the assembler for the Tangle 16-bit processor: it translates
/// assembly source into the hex image the CPU executes out of its block RAM.
#[derive(Parser)]
#[command(name = "tas", version, disable_help_flag = true)]
struct Args {
    /// Assembly source file
    input: Option<PathBuf>,

    /// Destination for the hex image
    #[arg(short, default_value = "ram.hex")]
    output: PathBuf,

    /// Program counter width in bits; the program space holds 2^width words
    #[arg(long, default_value_t = isa::DEFAULT_PC_WIDTH,
          value_parser = clap::value_parser!(u8).range(1..=isa::MAX_PC_WIDTH as i64))]
    pc_width: u8,

    /// Print usage information
    #[arg(short = 'h', long = "help")]
    help: bool,
}

fn main() -> Result<ExitCode> {
    miette::set_hook(Box::new(|_| {
        Box::new(MietteHandlerOpts::new().terminal_links(false).build())
    }))?;

    let args = Args::parse();
    if args.help {
        usage()?;
        return Ok(ExitCode::FAILURE);
    }
    let Some(input) = args.input else {
        eprintln!("{}", "Expected an input file after options".red());
        usage()?;
        return Ok(ExitCode::FAILURE);
    };

    // Source and name live for the whole run so diagnostic spans stay valid
    let contents: &'static str =
        Box::leak(fs::read_to_string(&input).into_diagnostic()?.into_boxed_str());
    let name: &'static str = Box::leak(input.to_string_lossy().into_owned().into_boxed_str());

    println!("{:>12} target {}", "Assembling".green().bold(), name);

    let parser = AsmParser::new(SrcFile::new(name, contents), args.pc_width);
    let mut air = match parser.parse() {
        Ok(air) => air,
        Err(errors) => return Ok(report_all(errors)),
    };
    if let Err(errors) = air.backpatch() {
        return Ok(report_all(errors));
    }

    hex::write_file(&air, &args.output, name)?;

    println!("{:>12} {} words", "Finished".green().bold(), air.len());
    println!(
        "{:>12} {}",
        "Saved to".green().bold(),
        args.output.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Every diagnostic goes to stderr; no output file is written.
fn report_all(errors: Vec<Report>) -> ExitCode {
    for error in errors {
        eprintln!("{error:?}");
    }
    ExitCode::FAILURE
}

fn usage() -> Result<()> {
    Args::command().print_help().into_diagnostic()
}
