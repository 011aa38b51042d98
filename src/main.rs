//! Assemble-and-run CLI for the toy computer.
//!
//! Takes one assembly source file, resolves its imports, assembles it and
//! executes the resulting byte code in a fresh VM. The console honors the
//! `print` syscall (code 1): the handler prints the byte stored at the
//! syscall-arguments address.
//!
//! # Usage
//! ```text
//! damson <program.basm> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `program.basm`: Assembly source file to assemble and run
//!
//! # Options
//! - `-d, --disassemble`: Print the assembled byte code as a listing instead
//!   of running it
//! - `-v, --verbose`: Enable per-instruction execution tracing
//!
//! Exits non-zero with a compiler-style diagnostic on any parse error.

use damson::asm::assembler::{Assembler, FsResolver, render_diagnostic};
use damson::asm::disasm::disassemble;
use damson::utils::log::{Level, set_min_level};
use damson::vm::Vm;
use damson::{error, info};
use std::env;
use std::path::Path;
use std::process;

/// Syscall code the console host answers: print one byte.
const SYSCALL_PRINT: u8 = 1;
/// Programs place syscall arguments at this memory address.
const SYSCALL_ARGS_ADDRESS: u16 = 0xbb00;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut disassemble_only = false;

    for arg in &args[2..] {
        match arg.as_str() {
            "--disassemble" | "-d" => disassemble_only = true,
            "--verbose" | "-v" => set_min_level(Level::Debug),
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let path = Path::new(input_path);
    let Some(entry) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        error!("Not a source file path: {}", input_path);
        process::exit(1);
    };
    let root = path.parent().unwrap_or(Path::new("."));

    let mut assembler = Assembler::new(FsResolver::new(root));
    let rom = match assembler.assemble(&entry) {
        Ok(rom) => rom,
        Err(e) => {
            let source = e.token().and_then(|token| assembler.source(&token.filename));
            eprint!("{}", render_diagnostic(source, &e));
            process::exit(1);
        }
    };

    info!("assembled {} ({} bytes)", input_path, rom.len());

    if disassemble_only {
        match disassemble(&rom) {
            Ok(listing) => print!("{listing}"),
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        }
        return;
    }

    let mut vm = Vm::new();
    if let Err(e) = vm.load(rom) {
        error!("{e}");
        process::exit(1);
    }

    vm.add_syscall_listener(|code, machine| {
        if code == SYSCALL_PRINT {
            println!("{}", machine.memory_byte(SYSCALL_ARGS_ADDRESS));
        }
    });

    if let Err(e) = vm.run() {
        error!("{e}");
        process::exit(1);
    }
}

const USAGE: &str = "\
Toy computer assembler and VM

USAGE:
    {program} <program.basm> [OPTIONS]

ARGS:
    <program.basm>    Assembly source file to assemble and run

OPTIONS:
    -d, --disassemble    Print the assembled byte code instead of running it
    -v, --verbose        Enable per-instruction execution tracing
    -h, --help           Print this help message

EXAMPLES:
    # Assemble and run a program
    {program} demos/countdown.basm

    # Inspect the generated byte code
    {program} demos/countdown.basm -d
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
