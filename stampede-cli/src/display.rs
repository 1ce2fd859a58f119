//! k6-style live terminal display for load test progress.
//!
//! Renders a compact, in-place updating line showing requests per second,
//! P95 latency, error count/rate, host CPU and memory, and elapsed time.
//! Updates once per received snapshot, not per request.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use stampede::LiveMetricsSnapshot;

/// k6-style live terminal display for load test progress.
pub struct LiveDisplay {
    status_bar: ProgressBar,
}

impl LiveDisplay {
    /// Create a new live display.
    ///
    /// If `no_color` is true or stderr is not a terminal (piped),
    /// color output is disabled.
    pub fn new(no_color: bool) -> Self {
        let is_terminal = std::io::stderr().is_terminal();
        if no_color || !is_terminal {
            colored::control::set_override(false);
        }

        let status_bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {wide_msg}") {
            status_bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self { status_bar }
    }

    /// Format a single line of live status from a snapshot.
    ///
    /// Color coding:
    /// - Green for healthy metrics
    /// - Red for errors (when failed_requests > 0)
    /// - Yellow for high P95 latency (> 1000ms) and CPU above 90%
    pub fn format_status(snap: &LiveMetricsSnapshot, elapsed: Duration, target: Duration) -> String {
        let error_rate = if snap.total_requests > 0 {
            snap.failed_requests as f64 / snap.total_requests as f64 * 100.0
        } else {
            0.0
        };

        let rps_str = format!("{:.1}", snap.rps);
        let p95_str = format!("{}ms", snap.latency_percentiles.p95);
        let error_str = format!("{} ({:.1}%)", snap.failed_requests, error_rate);
        let cpu_str = format!("{:.0}%", snap.system_metrics.cpu_usage);
        let mem_str = format!("{:.0}%", snap.system_metrics.memory_usage);
        let elapsed_str = format!("{}s/{}s", elapsed.as_secs(), target.as_secs());

        let p95_display = if snap.latency_percentiles.p95 > 1000 {
            p95_str.yellow().to_string()
        } else {
            p95_str.green().to_string()
        };
        let error_display = if snap.failed_requests > 0 {
            error_str.red().to_string()
        } else {
            error_str
        };
        let cpu_display = if snap.system_metrics.cpu_usage > 90.0 {
            cpu_str.yellow().to_string()
        } else {
            cpu_str
        };

        format!(
            "  rps: {}  |  reqs: {}  |  p95: {}  |  errors: {}  |  cpu: {}  mem: {}  |  elapsed: {}",
            rps_str.green(),
            snap.total_requests,
            p95_display,
            error_display,
            cpu_display,
            mem_str,
            elapsed_str
        )
    }

    /// Update the display with the latest snapshot.
    pub fn update(&self, snap: &LiveMetricsSnapshot, elapsed: Duration, target: Duration) {
        self.status_bar
            .set_message(Self::format_status(snap, elapsed, target));
    }

    /// Stop the display and clear the spinner.
    pub fn finish(&self) {
        self.status_bar.finish_and_clear();
    }
}

/// Render snapshots until the run closes the channel.
///
/// Returns the number of snapshots rendered.
pub async fn display_loop(
    mut snapshots: mpsc::UnboundedReceiver<LiveMetricsSnapshot>,
    target: Duration,
    no_color: bool,
) -> u64 {
    let display = LiveDisplay::new(no_color);
    let started = Instant::now();
    let mut rendered = 0;

    eprintln!();
    eprintln!("  Running load test...");
    eprintln!();

    while let Some(snapshot) = snapshots.recv().await {
        display.update(&snapshot, started.elapsed(), target);
        rendered += 1;
    }

    display.finish();
    rendered
}
