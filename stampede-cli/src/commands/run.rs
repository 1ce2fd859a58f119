//! `stampede run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use stampede::system::SystemSampler;
use stampede::{LoadTestConfig, RateMode, RunController, RunState, TestConfig};
use stampede_cli::display::display_loop;
use stampede_cli::report::{write_report, LoadTestReport, ReportConfig};
use stampede_cli::summary::{render_summary, SummaryContext};

use super::{RateModeArg, RunArgs};

/// Execute the `run` command.
///
/// Loads config (explicit path, auto-discovery, or built-in defaults),
/// applies CLI overrides, runs the test in the background while rendering
/// live snapshots, then prints the summary and writes the report.
pub async fn execute_run(args: RunArgs) -> Result<()> {
    // Step 1: Load config
    let mut config = load_config(args.config.as_deref())?;

    // Step 2: Apply CLI overrides
    let target = apply_overrides(&mut config, &args)?;

    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    // Step 3: Start the run
    let mut sampler = SystemSampler::new();
    sampler.sample_process();

    let controller = Arc::new(RunController::from_config(&config));
    let started = Instant::now();
    let handle = controller
        .spawn(target.clone())
        .map_err(|e| anyhow::anyhow!("Load test failed: {}", e))?;
    let (snapshots, result, cancel) = handle.into_parts();

    let display = if target.enable_monitoring && !args.json {
        Some(tokio::spawn(display_loop(
            snapshots,
            target.duration(),
            args.no_color,
        )))
    } else {
        drop(snapshots);
        eprintln!(
            "Running load test against {} for {}s...",
            target.url, target.duration
        );
        None
    };
    let ctrl_c = tokio::spawn(handle_ctrl_c(cancel));

    let result = result.await;
    ctrl_c.abort();
    if let Some(display) = display {
        let _ = display.await;
    }
    let result = result.map_err(|e| anyhow::anyhow!("Load test failed: {}", e))?;
    let elapsed = started.elapsed();
    let outcome = controller.state();

    // Step 4: Output
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let ctx = SummaryContext {
            config: &target,
            elapsed,
            cancelled: outcome == RunState::Cancelled,
            process: sampler.sample_process(),
        };
        println!("{}", render_summary(&result, &ctx));
    }

    // Step 5: Write JSON report (unless --no-report)
    if !args.no_report {
        let report_config = ReportConfig {
            test: target,
            settings: config.settings,
            monitor: config.monitor,
        };
        let report = LoadTestReport::from_result(&result, report_config, elapsed, outcome);
        let cwd = std::env::current_dir()?;
        match write_report(&report, &cwd) {
            Ok(path) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            },
            Err(e) => {
                eprintln!();
                eprintln!("Warning: Failed to write report: {}", e);
            },
        }
    }

    Ok(())
}

/// Resolve the config file to use.
///
/// An explicit path must exist. Without one, `.stampede/loadtest.toml` is
/// searched for upwards from the current directory, and built-in defaults
/// apply when none is found.
fn load_config(explicit: Option<&Path>) -> Result<LoadTestConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: {}\nUse `stampede init` to create one.",
                    path.display()
                );
            }
            path.to_path_buf()
        },
        None => match discover_config() {
            Some(path) => path,
            None => return Ok(LoadTestConfig::default()),
        },
    };

    eprintln!("Loading config from: {}", path.display());
    LoadTestConfig::load(&path)
        .with_context(|| format!("Failed to load config '{}'", path.display()))
}

/// Apply CLI flag overrides to a loaded config and build the run request.
///
/// The target comes from the config's `[target]` table when present, with
/// the positional URL replacing its `url`.
fn apply_overrides(config: &mut LoadTestConfig, args: &RunArgs) -> Result<TestConfig> {
    let mut target = match (config.target.take(), &args.url) {
        (Some(mut target), Some(url)) => {
            target.url = url.clone();
            target
        },
        (Some(target), None) => target,
        (None, Some(url)) => TestConfig::new(url.clone()),
        (None, None) => anyhow::bail!(
            "No target URL.\n\
             Pass one as `stampede run <URL>`, or add a [target] table to the config file."
        ),
    };

    if let Some(c) = args.concurrency {
        target.concurrency = c;
    }
    if let Some(d) = args.duration {
        target.duration = d;
    }
    if args.monitor {
        target.enable_monitoring = true;
    }

    if let Some(t) = args.timeout_ms {
        config.settings.request_timeout_ms = t;
    }
    if let Some(method) = &args.method {
        config.settings.method = method.clone();
    }

    if let Some(p) = args.sample_period_ms {
        config.monitor.sample_period_ms = p;
    }
    if let Some(rate) = rate_override(config.monitor.rate, args.rate_mode, args.rate_window_ms) {
        config.monitor.rate = rate;
    }

    // Catches bad values from either source before the run starts.
    config.settings.validate()?;
    config.monitor.validate()?;
    Ok(target)
}

/// Resolve `--rate-mode` and `--rate-window-ms` against the configured mode.
///
/// A window on its own implies the trailing-window mode.
fn rate_override(
    current: RateMode,
    mode: Option<RateModeArg>,
    window_ms: Option<u64>,
) -> Option<RateMode> {
    let current_window = match current {
        RateMode::TrailingWindow { window_ms } => Some(window_ms),
        _ => None,
    };
    let trailing = |window: Option<u64>| {
        let window_ms = window
            .or(current_window)
            .unwrap_or(match RateMode::default() {
                RateMode::TrailingWindow { window_ms } => window_ms,
                _ => 5_000,
            });
        RateMode::TrailingWindow { window_ms }
    };

    match (mode, window_ms) {
        (Some(RateModeArg::Instantaneous), w) => {
            warn_ignored_window(w);
            Some(RateMode::Instantaneous)
        },
        (Some(RateModeArg::Cumulative), w) => {
            warn_ignored_window(w);
            Some(RateMode::Cumulative)
        },
        (Some(RateModeArg::TrailingWindow), w) => Some(trailing(w)),
        (None, Some(w)) => Some(trailing(Some(w))),
        (None, None) => None,
    }
}

fn warn_ignored_window(window_ms: Option<u64>) {
    if let Some(w) = window_ms {
        eprintln!("Warning: --rate-window-ms={w} ignored because --rate-mode is not trailing-window");
    }
}

/// Discover `.stampede/loadtest.toml` by walking parent directories.
///
/// Starts from the current working directory and walks up until either
/// the file is found or the filesystem root is reached.
fn discover_config() -> Option<PathBuf> {
    let dir = std::env::current_dir().ok()?;
    discover_config_from(dir)
}

fn discover_config_from(mut dir: PathBuf) -> Option<PathBuf> {
    loop {
        let candidate = dir.join(".stampede").join("loadtest.toml");
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// First Ctrl+C cancels the run, a second one exits immediately.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived second Ctrl+C, aborting immediately.");
    std::process::exit(1);
}
