//! `stampede` CLI subcommands.
//!
//! Provides `run` (execute a load test) and `init` (generate a starter config).

mod init;
mod run;

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test against an HTTP endpoint
    ///
    /// Settings come from .stampede/loadtest.toml (auto-discovered from the
    /// current directory upwards) or --config, with flags taking precedence.
    /// Prints a summary to the terminal and writes a JSON report to
    /// .stampede/reports/.
    Run(RunArgs),

    /// Generate a starter config file at .stampede/loadtest.toml
    Init {
        /// Target URL written into the [target] table
        url: Option<String>,

        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Flags for `stampede run`. Every value overrides the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Target URL (required unless the config file has a [target] table)
    #[arg(env = "STAMPEDE_URL")]
    pub url: Option<String>,

    /// Path to config file (default: auto-discover .stampede/loadtest.toml)
    #[arg(long, env = "STAMPEDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of requests kept in flight
    #[arg(short, long, env = "STAMPEDE_CONCURRENCY")]
    pub concurrency: Option<u32>,

    /// Test duration in seconds
    #[arg(short, long, env = "STAMPEDE_DURATION")]
    pub duration: Option<u64>,

    /// Show live throughput, latency and host resource usage while running
    #[arg(long)]
    pub monitor: bool,

    /// Interval between live snapshots in milliseconds
    #[arg(long)]
    pub sample_period_ms: Option<u64>,

    /// How the live requests-per-second figure is computed
    #[arg(long, value_enum)]
    pub rate_mode: Option<RateModeArg>,

    /// Window for --rate-mode trailing-window, in milliseconds
    #[arg(long)]
    pub rate_window_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "STAMPEDE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// HTTP method used for every request
    #[arg(long)]
    pub method: Option<String>,

    /// Print the result as JSON instead of the terminal summary
    #[arg(long)]
    pub json: bool,

    /// Disable JSON report output
    #[arg(long)]
    pub no_report: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Command-line spelling of [`stampede::RateMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RateModeArg {
    Instantaneous,
    TrailingWindow,
    Cumulative,
}

impl Command {
    /// Execute the selected subcommand.
    pub fn execute(self) -> Result<()> {
        match self {
            Command::Run(args) => {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run::execute_run(args))
            },
            Command::Init { url, force } => init::execute_init(url, force),
        }
    }
}
