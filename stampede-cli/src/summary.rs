//! k6-style terminal summary renderer for load test results.
//!
//! The renderer is a pure function: [`render_summary`] takes structured data
//! and returns a formatted [`String`]. No I/O, no side effects.
//!
//! Color coding is applied via the `colored` crate, which respects the
//! global override set when `--no-color` is active or stdout is piped.

use colored::Colorize;
use std::time::Duration;

use stampede::outcome::Classification;
use stampede::system::ProcessUsage;
use stampede::{TestConfig, TestResult};

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 40;

/// Everything the summary shows besides the engine result itself.
#[derive(Debug, Clone)]
pub struct SummaryContext<'a> {
    pub config: &'a TestConfig,
    /// Wall time of the whole run as observed by the CLI.
    pub elapsed: Duration,
    pub cancelled: bool,
    /// Resource usage of the CLI process at the end of the run.
    pub process: Option<ProcessUsage>,
}

/// Render a k6-style terminal summary.
///
/// # Layout
///
/// ```text
///           /\      |  stampede
///          /  \     |
///     /\  /    \    |  target:      http://localhost:8080/
///    /  \/      \   |  concurrency: 10
///   /    \       \  |  duration:    30s
///  /      \       \ |  monitoring:  on
///
///   http_req_duration.......................: avg=12ms  p50=10ms  p90=20ms  p95=25ms  p99=40ms
///   http_req_success_count..................: 950
///   http_req_failed_count...................: 50
///   http_req_error_rate.....................: 5.0%
///   http_req_throughput.....................: 31.6 req/s
///   http_req_total..........................: 1000
///   elapsed.................................: 30.1s
///
///   errors:
///     timeout_error.........................: 30
///     http_error............................: 20
/// ```
pub fn render_summary(result: &TestResult, ctx: &SummaryContext<'_>) -> String {
    let mut lines = Vec::new();

    lines.push(render_header(ctx.config));

    if ctx.cancelled {
        lines.push(format!("  {}", "run cancelled, partial results".yellow()));
        lines.push(String::new());
    }

    let p = &result.latency_percentiles;
    let latency_value = format!(
        "avg={}ms  p50={}ms  p90={}ms  p95={}ms  p99={}ms",
        result.average_latency.as_millis(),
        p.p50,
        p.p90,
        p.p95,
        p.p99
    );
    let latency_colored = if p.p99 < 1000 {
        latency_value.green().to_string()
    } else {
        latency_value.yellow().to_string()
    };
    lines.push(format_metric_row("http_req_duration", &latency_colored, PAD_WIDTH));

    lines.push(format_metric_row(
        "http_req_success_count",
        &result.successful_requests.to_string().green().to_string(),
        PAD_WIDTH,
    ));

    let failed_str = if result.failed_requests > 0 {
        result.failed_requests.to_string().red().to_string()
    } else {
        result.failed_requests.to_string()
    };
    lines.push(format_metric_row("http_req_failed_count", &failed_str, PAD_WIDTH));

    let error_rate_pct = if result.total_requests > 0 {
        result.failed_requests as f64 / result.total_requests as f64 * 100.0
    } else {
        0.0
    };
    let error_rate_str = format!("{error_rate_pct:.1}%");
    let error_rate_colored = if error_rate_pct > 5.0 {
        error_rate_str.red().to_string()
    } else if error_rate_pct > 1.0 {
        error_rate_str.yellow().to_string()
    } else {
        error_rate_str.green().to_string()
    };
    lines.push(format_metric_row("http_req_error_rate", &error_rate_colored, PAD_WIDTH));

    let throughput_str = format!("{:.1} req/s", result.requests_per_second);
    lines.push(format_metric_row(
        "http_req_throughput",
        &throughput_str.green().to_string(),
        PAD_WIDTH,
    ));

    lines.push(format_metric_row(
        "http_req_total",
        &result.total_requests.to_string(),
        PAD_WIDTH,
    ));

    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", ctx.elapsed.as_secs_f64()),
        PAD_WIDTH,
    ));

    if let Some(process) = ctx.process {
        lines.push(format_metric_row(
            "process_cpu",
            &format!("{:.1}%", process.cpu_percent),
            PAD_WIDTH,
        ));
        lines.push(format_metric_row(
            "process_rss",
            &format!("{:.1} MB", process.memory_rss_mb),
            PAD_WIDTH,
        ));
    }

    // Error breakdown (only when errors exist)
    let mut categories: Vec<(Classification, u64)> = Classification::ALL
        .iter()
        .map(|c| (*c, result.error_stats.count(*c)))
        .filter(|(_, count)| *count > 0)
        .collect();
    if !categories.is_empty() {
        categories.sort_by(|a, b| b.1.cmp(&a.1));
        lines.push(String::new());
        lines.push("  errors:".to_string());
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("  {category}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }

    lines.join("\n")
}

fn render_header(config: &TestConfig) -> String {
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  target:      {}
   /  \/      \   |  concurrency: {}
  /    \       \  |  duration:    {}s
 /      \       \ |  monitoring:  {}
"#,
        "stampede".bold(),
        config.url,
        config.concurrency,
        config.duration,
        if config.enable_monitoring { "on" } else { "off" },
    )
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede::{ErrorStats, LatencyPercentiles};

    /// Disable colors in tests for deterministic assertions.
    fn setup_no_color() {
        colored::control::set_override(false);
    }

    fn sample_result() -> TestResult {
        TestResult {
            total_requests: 1000,
            successful_requests: 950,
            failed_requests: 50,
            requests_per_second: 33.3,
            average_latency: Duration::from_millis(12),
            error_stats: ErrorStats {
                connection_errors: 5,
                timeout_errors: 30,
                http_errors: 15,
                other_errors: 0,
            },
            latency_percentiles: LatencyPercentiles {
                p50: 10,
                p90: 20,
                p95: 25,
                p99: 40,
            },
        }
    }

    fn context(config: &TestConfig) -> SummaryContext<'_> {
        SummaryContext {
            config,
            elapsed: Duration::from_millis(30_100),
            cancelled: false,
            process: None,
        }
    }

    #[test]
    fn test_render_summary_contains_header() {
        setup_no_color();
        let config = TestConfig::new("http://localhost:8080/").with_concurrency(10);
        let output = render_summary(&sample_result(), &context(&config));

        assert!(output.contains("stampede"), "Missing header title");
        assert!(output.contains("http://localhost:8080/"), "Missing target URL");
        assert!(output.contains("concurrency: 10"), "Missing concurrency");
        assert!(output.contains("monitoring:  off"));
    }

    #[test]
    fn test_render_summary_contains_latency_and_throughput() {
        setup_no_color();
        let config = TestConfig::new("http://localhost:8080/");
        let output = render_summary(&sample_result(), &context(&config));

        assert!(output.contains("avg=12ms  p50=10ms  p90=20ms  p95=25ms  p99=40ms"));
        assert!(output.contains("33.3 req/s"));
        assert!(output.contains("5.0%"));
        assert!(output.contains("30.1s"));
    }

    #[test]
    fn test_render_summary_error_breakdown_sorted_desc() {
        setup_no_color();
        let config = TestConfig::new("http://localhost:8080/");
        let output = render_summary(&sample_result(), &context(&config));

        let timeout = output.find("timeout_error").unwrap();
        let http = output.find("http_error").unwrap();
        let connection = output.find("connection_error").unwrap();
        assert!(timeout < http && http < connection);
        assert!(!output.contains("other_error"));
    }

    #[test]
    fn test_render_summary_no_errors_omits_error_section() {
        setup_no_color();
        let result = TestResult {
            successful_requests: 1000,
            failed_requests: 0,
            error_stats: ErrorStats::default(),
            ..sample_result()
        };
        let config = TestConfig::new("http://localhost:8080/");
        let output = render_summary(&result, &context(&config));
        assert!(!output.contains("errors:"));
    }

    #[test]
    fn test_render_summary_cancelled_banner_and_process() {
        setup_no_color();
        let config = TestConfig::new("http://localhost:8080/");
        let ctx = SummaryContext {
            cancelled: true,
            process: Some(ProcessUsage {
                cpu_percent: 12.5,
                memory_rss_mb: 48.0,
            }),
            ..context(&config)
        };
        let output = render_summary(&sample_result(), &ctx);
        assert!(output.contains("partial results"));
        assert!(output.contains("12.5%"));
        assert!(output.contains("48.0 MB"));
    }

    #[test]
    fn test_render_summary_zero_requests() {
        setup_no_color();
        let result = TestResult {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            requests_per_second: 0.0,
            average_latency: Duration::ZERO,
            error_stats: ErrorStats::default(),
            latency_percentiles: LatencyPercentiles::default(),
        };
        let config = TestConfig::new("http://localhost:8080/");
        let output = render_summary(&result, &context(&config));
        assert!(output.contains("0.0%"));
        assert!(output.contains("0.0 req/s"));
    }

    #[test]
    fn test_format_metric_row_dot_padding() {
        let row = format_metric_row("http_req_total", "42", 20);
        assert_eq!(row, "  http_req_total......: 42");
    }
}
