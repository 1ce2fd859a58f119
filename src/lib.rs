//! # Stampede
//!
//! A concurrent, closed-loop HTTP load testing engine with live throughput
//! and host resource monitoring.
//!
//! `concurrency` workers each keep one request in flight against a target
//! URL for `duration` seconds. Every completed request is classified
//! (success, connection, timeout, HTTP, or other error) and folded into a
//! lock-light aggregate. When monitoring is enabled, a sampler emits a
//! `load_test_metrics` snapshot once per period.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stampede::{run_load_test_with_monitoring, LiveMetricsSnapshot, TestConfig};
//!
//! # async fn demo() -> Result<(), stampede::LoadTestError> {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<LiveMetricsSnapshot>();
//! tokio::spawn(async move {
//!     while let Some(snapshot) = rx.recv().await {
//!         println!("{:.1} rps, cpu {:.0}%", snapshot.rps, snapshot.system_metrics.cpu_usage);
//!     }
//! });
//!
//! let config = TestConfig::new("http://localhost:8080/")
//!     .with_concurrency(50)
//!     .with_duration(30)
//!     .with_monitoring(true);
//! let result = run_load_test_with_monitoring(config, Arc::new(tx)).await?;
//! println!("{}", serde_json::to_string_pretty(&result).unwrap());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`executor`]: one request in, one classified outcome out
//! - [`worker`]: closed-loop worker pool
//! - [`aggregator`]: concurrent counters, running mean, percentiles
//! - [`monitor`]: periodic live snapshots
//! - [`controller`]: run lifecycle and the public entry points

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
#[cfg(feature = "logging")]
pub mod logging;
pub mod monitor;
pub mod outcome;
pub mod system;
pub mod types;
pub mod worker;

pub use config::{EngineSettings, LoadTestConfig, MonitorSettings, RateMode, TestConfig};
pub use controller::{
    run_load_test, run_load_test_with_monitoring, RunController, RunHandle, RunState,
};
pub use error::{ConfigError, LoadTestError, RequestError, RunControlError};
pub use monitor::{FnSink, MetricsSink};
pub use outcome::{Classification, RequestOutcome};
pub use types::{
    ErrorStats, LatencyPercentiles, LiveMetricsSnapshot, SystemMetrics, TestResult,
    LOAD_TEST_METRICS_EVENT,
};
