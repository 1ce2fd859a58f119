//! stampede: closed-loop HTTP load testing from the command line.

use anyhow::Result;
use clap::Parser;

mod commands;

/// Concurrent HTTP load testing with live throughput and resource monitoring
#[derive(Parser)]
#[command(name = "stampede")]
#[command(about = "Load test an HTTP endpoint and report throughput, latency and errors", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> Result<()> {
    stampede::logging::init_from_env();

    let cli = Cli::parse();
    cli.command.execute()
}
