//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is left
//! to the embedding process. These helpers cover the common cases.
//! `RUST_LOG` always overrides the mode's default level.

use std::str::FromStr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable selecting the [`LogMode`] in [`init_from_env`].
pub const LOG_MODE_ENV: &str = "STAMPEDE_LOG_MODE";

/// Output profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Human-readable output, `debug` for this crate and `warn` elsewhere.
    Dev,
    /// JSON lines at `warn`.
    Prod,
    /// Compact test-writer output at `warn`.
    Test,
}

impl LogMode {
    /// Level used when `RUST_LOG` is not set.
    pub fn default_level(&self) -> &'static str {
        match self {
            Self::Dev => "stampede=debug,warn",
            Self::Prod | Self::Test => "warn",
        }
    }

    /// `Dev` in debug builds, `Prod` in release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Dev
        } else {
            Self::Prod
        }
    }
}

impl FromStr for LogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown log mode '{other}' (expected dev, prod or test)")),
        }
    }
}

/// Install a global subscriber for `mode`.
///
/// Dev and Prod output goes to stderr so stdout stays free for results.
///
/// Returns `false` if a subscriber was already installed; that is not an error.
pub fn init(mode: LogMode) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| mode.default_level().into());

    let layer = match mode {
        LogMode::Dev => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogMode::Prod => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogMode::Test => tracing_subscriber::fmt::layer()
            .compact()
            .with_test_writer()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
}

/// Install a subscriber using [`LOG_MODE_ENV`], falling back to
/// [`LogMode::for_build`] when it is unset or unrecognized.
pub fn init_from_env() -> bool {
    let mode = std::env::var(LOG_MODE_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(LogMode::for_build);
    init(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("dev", LogMode::Dev)]
    #[case("Production", LogMode::Prod)]
    #[case(" test ", LogMode::Test)]
    fn test_parse_log_mode(#[case] input: &str, #[case] expected: LogMode) {
        assert_eq!(input.parse::<LogMode>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_log_mode() {
        let err = "verbose".parse::<LogMode>().unwrap_err();
        assert!(err.contains("verbose"));
    }

    #[test]
    fn test_default_levels() {
        assert_eq!(LogMode::Dev.default_level(), "stampede=debug,warn");
        assert_eq!(LogMode::Prod.default_level(), "warn");
        assert_eq!(LogMode::Test.default_level(), "warn");
    }

    #[test]
    fn test_second_init_is_not_an_error() {
        let _ = init(LogMode::Test);
        assert!(!init(LogMode::Test));
    }
}
