//! nom - interactive REPL for Nominal
//!
//! Usage:
//!   nom                     # Start an interactive session
//!   nom script.ns           # Execute a script file
//!   nom --dump-bytecode     # Also print the bytecode after each line
//!
//! Each line is evaluated in a persistent state; the resulting value (or
//! the error) is printed. Definitions persist across lines:
//!
//! ```text
//! > a := 2
//! 2
//! > a * 21
//! 42
//! ```

use clap::Parser;
use nominal_runtime::State;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nom")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interactive REPL for the Nominal scripting language", long_about = None)]
struct Args {
    /// Nominal source file to execute (starts a REPL if not specified)
    file: Option<PathBuf>,

    /// Print the state's bytecode after each evaluation
    #[arg(long)]
    dump_bytecode: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match &args.file {
        Some(file) => run_file(file, args.dump_bytecode),
        None => run_repl(args.dump_bytecode),
    };

    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

/// Execute a script file in a fresh state.
fn run_file(file: &Path, dump_bytecode: bool) -> Result<(), String> {
    let mut state = State::new();
    state.do_file(file);

    if dump_bytecode {
        print!("{}", state.disassemble());
    }

    if state.error() {
        return Err(state.get_error().to_string());
    }

    Ok(())
}

/// Read-evaluate-print over rustyline with history.
fn run_repl(dump_bytecode: bool) -> Result<(), String> {
    let mut editor =
        DefaultEditor::new().map_err(|e| format!("Failed to initialize line editor: {e}"))?;
    let mut state = State::new();

    println!("Nominal {} — ctrl-d to exit", env!("CARGO_PKG_VERSION"));

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);

                let result = state.evaluate(&line);
                if state.error() {
                    eprintln!("Error: {}", state.get_error());
                } else {
                    println!("{}", state.to_string(result));
                }

                if dump_bytecode {
                    print!("{}", state.disassemble());
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(error) => return Err(format!("Failed to read line: {error}")),
        }
    }

    Ok(())
}
