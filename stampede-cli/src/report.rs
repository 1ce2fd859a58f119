//! JSON report serialization for load test results.
//!
//! Produces a schema-versioned JSON report file containing the engine's
//! [`TestResult`] verbatim plus the resolved configuration, so a report is
//! self-contained and reproducible. Designed for CI/CD pipeline consumption.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stampede::outcome::Classification;
use stampede::{EngineSettings, MonitorSettings, RunState, TestConfig, TestResult};

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON report structure.
#[derive(Debug, Serialize)]
pub struct LoadTestReport {
    /// Report format version for parser compatibility.
    pub schema_version: String,
    /// ISO-8601 timestamp when the report was generated.
    pub timestamp: String,
    /// Target URL that was tested.
    pub target_url: String,
    /// Actual wall time of the run in seconds.
    pub duration_secs: f64,
    /// How the run ended.
    pub outcome: RunState,
    /// Full resolved configuration (with CLI overrides applied).
    pub config: ReportConfig,
    /// Engine result, field names unchanged.
    pub result: TestResult,
    /// Error rate as a fraction (0.0..=1.0).
    pub error_rate: f64,
    /// Non-zero error counts keyed by classification.
    pub errors: BTreeMap<String, u64>,
}

/// Resolved configuration embedded in the report.
#[derive(Debug, Serialize)]
pub struct ReportConfig {
    pub test: TestConfig,
    pub settings: EngineSettings,
    pub monitor: MonitorSettings,
}

impl LoadTestReport {
    /// Build a report from a finished run.
    pub fn from_result(
        result: &TestResult,
        config: ReportConfig,
        elapsed: std::time::Duration,
        outcome: RunState,
    ) -> Self {
        let error_rate = if result.total_requests > 0 {
            result.failed_requests as f64 / result.total_requests as f64
        } else {
            0.0
        };

        let errors = Classification::ALL
            .iter()
            .filter(|c| !c.is_success())
            .map(|c| (c.to_string(), result.error_stats.count(*c)))
            .filter(|(_, count)| *count > 0)
            .collect();

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            target_url: config.test.url.clone(),
            duration_secs: elapsed.as_secs_f64(),
            outcome,
            config,
            result: result.clone(),
            error_rate,
            errors,
        }
    }
}

/// Write a JSON report file to the `.stampede/reports/` directory.
///
/// Creates the reports directory if it does not exist. The filename
/// is timestamped: `loadtest-YYYY-MM-DDTHH-MM-SS.json` (hyphens, not
/// colons, for Windows compatibility).
///
/// Returns the path to the written report file.
pub fn write_report(report: &LoadTestReport, base_dir: &Path) -> Result<PathBuf, std::io::Error> {
    let reports_dir = base_dir.join(".stampede").join("reports");

    if !reports_dir.exists() {
        std::fs::create_dir_all(&reports_dir)?;
    }

    let report_path = reports_dir.join(report_filename(&chrono::Utc::now()));

    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(&report_path, json)?;

    Ok(report_path)
}

/// Report filename for a given timestamp.
pub fn report_filename(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    format!("loadtest-{}.json", timestamp.format("%Y-%m-%dT%H-%M-%S"))
}
