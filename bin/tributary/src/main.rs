//! The tributary engine binary.

mod cli;
mod manifest;

use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Enable backtraces unless a RUST_BACKTRACE value has already been
    // explicitly provided.
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    match cli::Cli::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
