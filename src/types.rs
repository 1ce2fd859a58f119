//! Wire types shared with result consumers.
//!
//! Field names on these types are a compatibility contract with the
//! presentation layer that renders them: do not rename them. Latencies are
//! carried as [`Duration`] in Rust and serialized as whole milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::outcome::Classification;

/// Name of the event carrying [`LiveMetricsSnapshot`] payloads.
pub const LOAD_TEST_METRICS_EVENT: &str = "load_test_metrics";

/// Error counts by classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Requests whose connection could not be established.
    pub connection_errors: u64,
    /// Requests that exceeded their timeout.
    pub timeout_errors: u64,
    /// Requests answered with status >= 400.
    pub http_errors: u64,
    /// All other failed requests.
    pub other_errors: u64,
}

impl ErrorStats {
    /// Sum of all error counters.
    pub fn total(&self) -> u64 {
        self.connection_errors + self.timeout_errors + self.http_errors + self.other_errors
    }

    /// Count for a single failure classification (0 for `Success`).
    pub fn count(&self, classification: Classification) -> u64 {
        match classification {
            Classification::Success => 0,
            Classification::ConnectionError => self.connection_errors,
            Classification::TimeoutError => self.timeout_errors,
            Classification::HttpError => self.http_errors,
            Classification::OtherError => self.other_errors,
        }
    }
}

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

/// Terminal result of one run. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// `total_requests / elapsed seconds`.
    pub requests_per_second: f64,
    /// Mean over all completed requests, successes and failures alike.
    #[serde(with = "duration_ms")]
    pub average_latency: Duration,
    pub error_stats: ErrorStats,
    #[serde(default)]
    pub latency_percentiles: LatencyPercentiles,
}

/// Host resource usage as percentages in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

impl SystemMetrics {
    /// Build a reading, clamping both values into `0.0..=100.0`.
    pub fn new(cpu_usage: f64, memory_usage: f64) -> Self {
        Self {
            cpu_usage: clamp_percent(cpu_usage),
            memory_usage: clamp_percent(memory_usage),
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Periodic live view of an in-progress run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetricsSnapshot {
    /// Request rate according to the configured rate mode.
    pub rps: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub system_metrics: SystemMetrics,
    #[serde(with = "duration_ms", default)]
    pub average_latency: Duration,
    #[serde(default)]
    pub latency_percentiles: LatencyPercentiles,
}

/// Serde adapter: [`Duration`] as whole milliseconds (rounded to nearest).
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = (value.as_micros() + 500) / 1000;
        serializer.serialize_u64(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_result() -> TestResult {
        TestResult {
            total_requests: 120,
            successful_requests: 100,
            failed_requests: 20,
            requests_per_second: 60.0,
            average_latency: Duration::from_micros(12_600),
            error_stats: ErrorStats {
                connection_errors: 5,
                timeout_errors: 5,
                http_errors: 8,
                other_errors: 2,
            },
            latency_percentiles: LatencyPercentiles {
                p50: 10,
                p90: 20,
                p95: 25,
                p99: 40,
            },
        }
    }

    #[test]
    fn test_result_field_names() {
        let json = serde_json::to_value(sample_result()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "total_requests",
            "successful_requests",
            "failed_requests",
            "requests_per_second",
            "average_latency",
            "error_stats",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        let errors = json["error_stats"].as_object().unwrap();
        for key in [
            "connection_errors",
            "timeout_errors",
            "http_errors",
            "other_errors",
        ] {
            assert!(errors.contains_key(key), "missing key {key}");
        }
    }

    #[test]
    fn test_average_latency_serialized_as_rounded_millis() {
        let json = serde_json::to_value(sample_result()).unwrap();
        assert_eq!(json["average_latency"], 13);
        assert!(json["requests_per_second"].is_f64());
    }

    #[test]
    fn test_result_deserializes_from_ui_payload() {
        let payload = r#"{
            "total_requests": 3,
            "successful_requests": 2,
            "failed_requests": 1,
            "requests_per_second": 1.5,
            "average_latency": 40,
            "error_stats": {"connection_errors": 1, "timeout_errors": 0, "http_errors": 0, "other_errors": 0}
        }"#;
        let result: TestResult = serde_json::from_str(payload).unwrap();
        assert_eq!(result.average_latency, Duration::from_millis(40));
        assert_eq!(result.latency_percentiles, LatencyPercentiles::default());
    }

    #[test]
    fn test_live_snapshot_field_names() {
        let snapshot = LiveMetricsSnapshot {
            rps: 12.5,
            total_requests: 10,
            successful_requests: 9,
            failed_requests: 1,
            system_metrics: SystemMetrics::new(35.0, 60.0),
            average_latency: Duration::from_millis(8),
            latency_percentiles: LatencyPercentiles::default(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["rps"], 12.5);
        assert_eq!(json["system_metrics"]["cpu_usage"], 35.0);
        assert_eq!(json["system_metrics"]["memory_usage"], 60.0);
        assert_eq!(json["failed_requests"], 1);
    }

    #[test]
    fn test_system_metrics_clamped() {
        let metrics = SystemMetrics::new(140.0, -3.0);
        assert_eq!(metrics.cpu_usage, 100.0);
        assert_eq!(metrics.memory_usage, 0.0);

        let metrics = SystemMetrics::new(f64::NAN, 50.0);
        assert_eq!(metrics.cpu_usage, 0.0);
    }

    #[test]
    fn test_error_stats_total_and_count() {
        let stats = sample_result().error_stats;
        assert_eq!(stats.total(), 20);
        assert_eq!(stats.count(Classification::HttpError), 8);
        assert_eq!(stats.count(Classification::Success), 0);
    }
}
