//! Operator command-line tool for the Skybridge cluster.
//!
//! Exit codes follow the run results: 0 for success, 2 for an operation that
//! completed partially and left detail to inspect, 1 for everything else.

#![allow(clippy::print_stdout, reason = "CLI tool outputs to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool reports failures on stderr")]

use clap::Parser;
use colored::Colorize;
use skybridge_types::CoreError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod account_commands;
mod cli;
mod commands;
mod sync_commands;
mod table_commands;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match commands::dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red());
            exit_for(&e)
        }
    }
}

/// Partial completions carry their own exit code; anything else is a plain
/// failure.
fn exit_for(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<CoreError>() {
        Some(core) => ExitCode::from(core.exit_code()),
        None => ExitCode::FAILURE,
    }
}
