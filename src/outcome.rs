//! Per-request outcome produced by the executor and consumed by the aggregator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// The bucket assigned to one completed request attempt.
///
/// The [`fmt::Display`] impl produces the snake_case wire name
/// (e.g., `"timeout_error"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A response with status < 400.
    Success,
    /// The connection could not be established.
    ConnectionError,
    /// No response within the per-request timeout.
    TimeoutError,
    /// A response with status >= 400.
    HttpError,
    /// Any failure not covered above.
    OtherError,
}

impl Classification {
    /// All classifications in counter order.
    pub const ALL: [Classification; 5] = [
        Self::Success,
        Self::ConnectionError,
        Self::TimeoutError,
        Self::HttpError,
        Self::OtherError,
    ];

    /// Wire name of the classification.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ConnectionError => "connection_error",
            Self::TimeoutError => "timeout_error",
            Self::HttpError => "http_error",
            Self::OtherError => "other_error",
        }
    }

    /// Returns `true` only for [`Classification::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed request attempt: how long it took and how it ended.
///
/// Consumed exactly once by an [`OutcomeSink`](crate::worker::OutcomeSink);
/// individual outcomes are never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    /// Wall-clock time from dispatch to completion (or failure).
    pub latency: Duration,
    /// Outcome bucket.
    pub classification: Classification,
}

impl RequestOutcome {
    /// Create an outcome with an explicit classification.
    pub fn new(latency: Duration, classification: Classification) -> Self {
        Self {
            latency,
            classification,
        }
    }

    /// Create a success outcome.
    pub fn success(latency: Duration) -> Self {
        Self::new(latency, Classification::Success)
    }

    /// Create a failure outcome from a [`RequestError`].
    pub fn failure(latency: Duration, err: &RequestError) -> Self {
        Self::new(latency, err.classification())
    }

    /// Build an outcome from a request result.
    pub fn from_result(latency: Duration, result: &Result<(), RequestError>) -> Self {
        match result {
            Ok(()) => Self::success(latency),
            Err(err) => Self::failure(latency, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_wire_names() {
        let names: Vec<&str> = Classification::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "success",
                "connection_error",
                "timeout_error",
                "http_error",
                "other_error"
            ]
        );
        assert_eq!(
            serde_json::to_string(&Classification::TimeoutError).unwrap(),
            "\"timeout_error\""
        );
    }

    #[test]
    fn test_only_success_is_success() {
        let successes = Classification::ALL
            .iter()
            .filter(|c| c.is_success())
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_from_result() {
        let ok = RequestOutcome::from_result(Duration::from_millis(5), &Ok(()));
        assert_eq!(ok.classification, Classification::Success);

        let err = RequestOutcome::from_result(
            Duration::from_millis(7),
            &Err(RequestError::Http { status: 404 }),
        );
        assert_eq!(err.classification, Classification::HttpError);
        assert_eq!(err.latency, Duration::from_millis(7));
    }
}
