// main.rs
//
// `tomasulo-sim`: assembles a program and drives the cycle engine to
// completion (or a cycle budget), printing the final architectural state.
// A CLI harness only — the interesting logic lives in the library crate.

use std::fs;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use tomasulo_rs::assembler::Assembler;
use tomasulo_rs::machine::config::{MachineConfig, BASE_PC};
use tomasulo_rs::machine::Machine;

#[derive(Parser)]
#[command(name = "tomasulo-sim", about = "Cycle-accurate Tomasulo simulator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and run a program to completion, printing final register state.
    Run(RunArgs),
    /// Like `run`, but prints a one-line snapshot every cycle.
    Trace(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Assembly source file.
    input: String,
    #[arg(long, default_value_t = 16)]
    rob_size: usize,
    #[arg(long, default_value_t = 8)]
    btb_size: usize,
    #[arg(long, default_value_t = 2)]
    int_units: usize,
    #[arg(long, default_value_t = 2)]
    load_units: usize,
    #[arg(long, default_value_t = 2)]
    store_units: usize,
    #[arg(long, default_value_t = 100_000)]
    max_cycles: u64,
}

fn build_machine(args: &RunArgs, word_count: usize) -> Result<Machine, Box<dyn std::error::Error>> {
    let config = MachineConfig::new()
        .with_rob_size(args.rob_size)
        .with_btb_size(args.btb_size)
        .with_int_units(args.int_units)
        .with_load_units(args.load_units)
        .with_store_units(args.store_units);
    let mut machine = Machine::new(config);
    machine.set_memory_size(BASE_PC as usize + word_count);
    Ok(machine)
}

fn run(args: RunArgs, trace: bool) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(&args.input)?;
    let words = Assembler::assemble(&source)?;
    info!("assembled {} words from {}", words.len(), args.input);

    let mut machine = build_machine(&args, words.len())?;
    for (i, word) in words.iter().enumerate() {
        machine.load_instruction(BASE_PC + i as u32, *word)?;
    }

    let mut halted = false;
    for _ in 0..args.max_cycles {
        halted = machine.step()?;
        if trace {
            println!("cycle {:>6}  pc={:#06x}  halted={}", machine.cycles, machine.pc, machine.halted);
        }
        if halted {
            break;
        }
    }

    if !halted {
        error!("program did not halt within {} cycles", args.max_cycles);
        return Err("cycle budget exceeded".into());
    }

    println!("halted after {} cycles", machine.cycles);
    for reg in 1..32 {
        let value = machine.registers.read(reg);
        if value != 0 {
            println!("  r{:<2} = {} (0x{:08x})", reg, value as i32, value);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args, false),
        Command::Trace(args) => run(args, true),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        },
    }
}
