// main_assembler.rs
//
// `tomasulo-asm`: the assembler CLI (spec §6). Reads source text, emits a
// binary stream of little-endian 32-bit words.

use std::fs;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use tomasulo_rs::assembler::Assembler;

#[derive(Parser)]
#[command(name = "tomasulo-asm", about = "Two-pass assembler for the Tomasulo simulator's ISA", version)]
struct Cli {
    /// Assembly source file.
    input: String,
    #[arg(short = 'o', long, default_value = "a.out")]
    output: String,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(&cli.input)?;
    let words = Assembler::assemble(&source)?;

    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in &words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    fs::File::create(&cli.output)?.write_all(&bytes)?;
    info!("wrote {} words ({} bytes) to {}", words.len(), bytes.len(), cli.output);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        },
    }
}
