//! Error types for the load testing engine.
//!
//! Three families, matching how far each one is allowed to travel:
//!
//! - [`ConfigError`] rejects a run before any network activity.
//! - [`RunControlError`] rejects a lifecycle call (second start, cancel while idle).
//! - [`RequestError`] describes a single failed request. It never escapes a
//!   worker; it is folded into the error counters as a [`Classification`].
//!
//! [`LoadTestError`] is what the public entry points return.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::outcome::Classification;

/// Errors raised while parsing, loading, or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The target URL is empty, unparseable, or not an http(s) URL with a host.
    #[error("Invalid target URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Concurrency must be at least 1.
    #[error("Concurrency must be at least 1, got {value}")]
    InvalidConcurrency { value: u32 },

    /// Duration must be between 1 second and [`MAX_DURATION_SECS`](crate::config::MAX_DURATION_SECS).
    #[error("Duration must be between 1 and {max} seconds, got {value}", max = crate::config::MAX_DURATION_SECS)]
    InvalidDuration { value: u64 },

    /// Semantic validation failure in engine or monitor settings.
    #[error("Config validation error: {message}")]
    Validation { message: String },

    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },
}

/// Lifecycle violations reported by the run controller and the aggregator.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum RunControlError {
    /// A run is already active on this controller.
    #[error("A load test is already running on this controller")]
    AlreadyRunning,

    /// Cancellation was requested but no run is active.
    #[error("No load test is running")]
    NotRunning,

    /// The aggregator already produced its final result.
    #[error("Metrics have already been finalized for this run")]
    AlreadyFinalized,
}

/// Top-level error returned by the public entry points.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// The configuration was rejected before the run started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The lifecycle call was rejected.
    #[error(transparent)]
    RunControl(#[from] RunControlError),

    /// The HTTP client could not be constructed, so no request loop can run.
    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },

    /// The background task driving a spawned run panicked or was aborted.
    #[error("Load test task failed: {message}")]
    Task { message: String },
}

impl LoadTestError {
    /// Short machine-readable category used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::RunControl(_) => "run_control",
            Self::Client { .. } => "client",
            Self::Task { .. } => "task",
        }
    }
}

/// Serialized as `{"kind": "...", "message": "..."}` so UI callers receive a
/// structured error instead of a bare string.
impl Serialize for LoadTestError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("LoadTestError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Failure of a single HTTP request.
///
/// Each variant maps onto exactly one failure [`Classification`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The request exceeded its per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// A response arrived with a status code >= 400.
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// Anything else: malformed response, protocol violation, body errors.
    #[error("Request failed: {message}")]
    Other { message: String },
}

impl RequestError {
    /// The error bucket this failure is counted in.
    pub fn classification(&self) -> Classification {
        match self {
            Self::Connection { .. } => Classification::ConnectionError,
            Self::Timeout => Classification::TimeoutError,
            Self::Http { .. } => Classification::HttpError,
            Self::Other { .. } => Classification::OtherError,
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`RequestError`] variant.
    ///
    /// Timeouts are checked first: a connect attempt that times out is
    /// reported as a timeout, not a connection failure.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status().filter(|s| s.as_u16() >= 400) {
            Self::Http {
                status: status.as_u16(),
            }
        } else {
            Self::Other {
                message: err.to_string(),
            }
        }
    }
}
