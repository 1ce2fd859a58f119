//! Run configuration: the per-run [`TestConfig`] request and the
//! TOML-backed engine settings.
//!
//! A [`TestConfig`] is what a caller submits for one run. Its JSON shape is
//! the UI contract (`url`, `concurrency`, `duration`, `enableMonitoring`).
//! [`EngineSettings`] and [`MonitorSettings`] tune how runs execute and can
//! be loaded from a config file.
//!
//! # Example TOML
//!
//! ```toml
//! [target]
//! url = "http://localhost:8080/health"
//! concurrency = 50
//! duration = 30
//! enableMonitoring = true
//!
//! [settings]
//! request_timeout_ms = 5000
//! connect_timeout_ms = 10000
//! method = "GET"
//!
//! [monitor]
//! sample_period_ms = 1000
//! rate = { mode = "trailing_window", window_ms = 5000 }
//! ```
//!
//! Every key is optional except `target.url` when a `[target]` table is present.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Longest accepted run, one year. Keeps deadline arithmetic far from
/// `Instant` overflow and inside the timer's range.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// One load test request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestConfig {
    /// Absolute http(s) URL to load.
    pub url: String,
    /// Number of requests kept in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Run length in seconds.
    #[serde(default = "default_duration")]
    pub duration: u64,
    /// Whether live snapshots are emitted while the run is in progress.
    #[serde(rename = "enableMonitoring", default)]
    pub enable_monitoring: bool,
}

fn default_concurrency() -> u32 {
    1
}

fn default_duration() -> u64 {
    10
}

impl TestConfig {
    /// Create a config for `url` with default concurrency and duration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            concurrency: default_concurrency(),
            duration: default_duration(),
            enable_monitoring: false,
        }
    }

    /// Sets the number of concurrent workers.
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the run duration in seconds.
    pub fn with_duration(mut self, duration_secs: u64) -> Self {
        self.duration = duration_secs;
        self
    }

    /// Enables or disables live monitoring.
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.enable_monitoring = enabled;
        self
    }

    /// The run duration as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    /// Validate the request and return the parsed target URL.
    ///
    /// Checks, in order: URL non-empty, parseable, http(s) scheme with a
    /// host; `concurrency >= 1`; `1 <= duration <= MAX_DURATION_SECS`.
    pub fn validate(&self) -> Result<url::Url, ConfigError> {
        let parsed = parse_target_url(&self.url)?;
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency {
                value: self.concurrency,
            });
        }
        if self.duration == 0 || self.duration > MAX_DURATION_SECS {
            return Err(ConfigError::InvalidDuration {
                value: self.duration,
            });
        }
        Ok(parsed)
    }
}

fn parse_target_url(raw: &str) -> Result<url::Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("URL must not be empty"));
    }
    let parsed = url::Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {},
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("URL has no host"));
    }
    Ok(parsed)
}

/// How the live `rps` figure is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateMode {
    /// Requests completed since the previous tick, divided by the time between ticks.
    Instantaneous,
    /// Requests completed within the trailing window, divided by the window span.
    TrailingWindow {
        #[serde(default = "default_rate_window_ms")]
        window_ms: u64,
    },
    /// Requests completed since the run started, divided by elapsed time.
    Cumulative,
}

impl Default for RateMode {
    fn default() -> Self {
        Self::TrailingWindow {
            window_ms: default_rate_window_ms(),
        }
    }
}

fn default_rate_window_ms() -> u64 {
    5_000
}

/// HTTP execution settings shared by every worker of a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on a single request, in milliseconds.
    pub request_timeout_ms: u64,
    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// HTTP method used for every request.
    pub method: String,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Idle connection lifetime in milliseconds.
    pub pool_idle_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            method: "GET".to_string(),
            pool_max_idle_per_host: 1_000,
            pool_idle_timeout_ms: 30_000,
        }
    }
}

impl EngineSettings {
    /// `request_timeout_ms` as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `connect_timeout_ms` as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `pool_idle_timeout_ms` as a [`Duration`].
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_idle_timeout_ms)
    }

    /// The configured method, parsed.
    pub fn method(&self) -> Result<reqwest::Method, ConfigError> {
        reqwest::Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes()).map_err(
            |_| ConfigError::Validation {
                message: format!("Invalid HTTP method '{}'", self.method),
            },
        )
    }

    /// Validate timeouts and the method.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                message: "settings.request_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                message: "settings.connect_timeout_ms must be greater than 0".to_string(),
            });
        }
        self.method()?;
        Ok(())
    }
}

/// Live monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Interval between live snapshots in milliseconds.
    pub sample_period_ms: u64,
    /// How `rps` is computed.
    pub rate: RateMode,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_period_ms: 1_000,
            rate: RateMode::default(),
        }
    }
}

impl MonitorSettings {
    /// `sample_period_ms` as a [`Duration`].
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Validate the period and the rate window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms == 0 {
            return Err(ConfigError::Validation {
                message: "monitor.sample_period_ms must be greater than 0".to_string(),
            });
        }
        if let RateMode::TrailingWindow { window_ms: 0 } = self.rate {
            return Err(ConfigError::Validation {
                message: "monitor.rate.window_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level config file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoadTestConfig {
    /// Optional default target. Usually supplied on the command line instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TestConfig>,
    /// HTTP execution settings.
    #[serde(default)]
    pub settings: EngineSettings,
    /// Live monitoring settings.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl LoadTestConfig {
    /// Parse a TOML string into a validated [`LoadTestConfig`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`LoadTestConfig`] from a file path.
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Parse`] if the TOML is malformed, or a validation
    /// variant if a value is out of range.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Validate settings, monitor settings, and the target when present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        self.monitor.validate()?;
        if let Some(target) = &self.target {
            target.validate()?;
        }
        Ok(())
    }
}
