//! Scenario CLI - a declarative end-to-end test runner
//!
//! Executes JSON/YAML scenarios (HTTP calls, key-value operations, waits,
//! assertions) against live infrastructure and reports a verdict per run.

use clap::Parser;
use scenario::commands::Commands;
use scenario::{cli, common};

#[derive(Parser)]
#[command(name = "scenario", about = "Declarative end-to-end test runner")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    common::logging::init();

    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
