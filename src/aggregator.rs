//! Lock-light metrics aggregation shared by all workers of a run.
//!
//! [`MetricsAggregator`] is written concurrently by every worker and read
//! concurrently by the monitor sampler and the run controller.
//!
//! # Design
//!
//! - **One atomic per classification**: totals are never stored; they are
//!   derived from the per-class counters at read time, so
//!   `total = successful + failed` and `failed = sum(error_stats)` hold in
//!   every snapshot. Single-class reads via [`MetricsAggregator::count`]
//!   never take the lock.
//! - **Welford running mean**: the mean latency is updated incrementally, so
//!   no individual latency is retained.
//! - **HdrHistogram for percentiles**: 3 significant figures, auto-resize,
//!   microsecond resolution. Counters, extremes, the running mean and the
//!   histogram are all updated in one short critical section, which
//!   snapshots also take.
//! - **Frozen after finalize**: [`MetricsAggregator::finalize`] succeeds once;
//!   later writes are rejected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::error::RunControlError;
use crate::outcome::{Classification, RequestOutcome};
use crate::types::{ErrorStats, LatencyPercentiles, TestResult};
use crate::worker::OutcomeSink;

/// Running latency statistics guarded by a single mutex.
struct LatencyStats {
    count: u64,
    mean_micros: f64,
    histogram: Histogram<u64>,
}

impl LatencyStats {
    fn new() -> Self {
        let mut histogram = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
        histogram.auto(true);
        Self {
            count: 0,
            mean_micros: 0.0,
            histogram,
        }
    }

    fn record(&mut self, micros: u64) {
        self.count += 1;
        self.mean_micros += (micros as f64 - self.mean_micros) / self.count as f64;
        let _ = self.histogram.record(micros);
    }

    fn percentile_ms(&self, quantile: f64) -> u64 {
        if self.histogram.is_empty() {
            return 0;
        }
        micros_to_rounded_ms(self.histogram.value_at_quantile(quantile))
    }

    fn percentiles(&self) -> LatencyPercentiles {
        LatencyPercentiles {
            p50: self.percentile_ms(0.50),
            p90: self.percentile_ms(0.90),
            p95: self.percentile_ms(0.95),
            p99: self.percentile_ms(0.99),
        }
    }
}

fn micros_to_rounded_ms(micros: u64) -> u64 {
    micros.saturating_add(500) / 1000
}

/// Consistent point-in-time view of the aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateSnapshot {
    pub successful_requests: u64,
    pub error_stats: ErrorStats,
    /// Mean over all recorded outcomes, successes and failures alike.
    pub mean_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub latency_percentiles: LatencyPercentiles,
}

impl AggregateSnapshot {
    /// Successful plus failed requests.
    pub fn total_requests(&self) -> u64 {
        self.successful_requests + self.failed_requests()
    }

    /// Sum of all error classes.
    pub fn failed_requests(&self) -> u64 {
        self.error_stats.total()
    }

    /// Fraction of requests that failed (0.0..=1.0).
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.failed_requests() as f64 / total as f64
        }
    }

    /// Convert to a terminal result over `elapsed`.
    ///
    /// `requests_per_second` is zero when `elapsed` is zero.
    pub fn to_result(&self, elapsed: Duration) -> TestResult {
        let total = self.total_requests();
        let secs = elapsed.as_secs_f64();
        let requests_per_second = if secs > 0.0 {
            total as f64 / secs
        } else {
            0.0
        };
        TestResult {
            total_requests: total,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests(),
            requests_per_second,
            average_latency: self.mean_latency,
            error_stats: self.error_stats,
            latency_percentiles: self.latency_percentiles,
        }
    }
}

/// Thread-safe metrics accumulator for one run.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stampede::aggregator::MetricsAggregator;
/// use stampede::outcome::{Classification, RequestOutcome};
///
/// let aggregator = MetricsAggregator::new();
/// aggregator.record(RequestOutcome::success(Duration::from_millis(40)));
/// aggregator.record(RequestOutcome::new(Duration::from_millis(20), Classification::HttpError));
///
/// let snapshot = aggregator.snapshot();
/// assert_eq!(snapshot.total_requests(), 2);
/// assert_eq!(snapshot.mean_latency, Duration::from_millis(30));
///
/// let result = aggregator.finalize(Duration::from_secs(1)).unwrap();
/// assert_eq!(result.requests_per_second, 2.0);
/// assert!(aggregator.finalize(Duration::from_secs(1)).is_err());
/// ```
pub struct MetricsAggregator {
    /// Indexed by [`counter_index`].
    counters: [AtomicU64; 5],
    latency: Mutex<LatencyStats>,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
    finalized: AtomicBool,
}

fn counter_index(classification: Classification) -> usize {
    match classification {
        Classification::Success => 0,
        Classification::ConnectionError => 1,
        Classification::TimeoutError => 2,
        Classification::HttpError => 3,
        Classification::OtherError => 4,
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            latency: Mutex::new(LatencyStats::new()),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
        }
    }

    /// Record one outcome.
    ///
    /// Returns `false` (and records nothing) once the aggregator has been
    /// finalized.
    pub fn record(&self, outcome: RequestOutcome) -> bool {
        let micros = u64::try_from(outcome.latency.as_micros()).unwrap_or(u64::MAX);

        // Counters, min and max only change under the latency lock.
        let mut stats = self.latency.lock();
        if self.finalized.load(Ordering::Acquire) {
            return false;
        }
        stats.record(micros);
        self.counters[counter_index(outcome.classification)].fetch_add(1, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
        true
    }

    /// Count recorded for a single classification.
    pub fn count(&self, classification: Classification) -> u64 {
        self.counters[counter_index(classification)].load(Ordering::Relaxed)
    }

    /// Non-destructive point-in-time read. Never blocks writers for longer
    /// than one latency update.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let stats = self.latency.lock();
        self.snapshot_locked(&stats)
    }

    fn snapshot_locked(&self, stats: &LatencyStats) -> AggregateSnapshot {
        let error_stats = ErrorStats {
            connection_errors: self.count(Classification::ConnectionError),
            timeout_errors: self.count(Classification::TimeoutError),
            http_errors: self.count(Classification::HttpError),
            other_errors: self.count(Classification::OtherError),
        };

        let min = self.min_micros.load(Ordering::Relaxed);
        let min_latency = if min == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_micros(min)
        };

        AggregateSnapshot {
            successful_requests: self.count(Classification::Success),
            error_stats,
            mean_latency: Duration::from_micros(stats.mean_micros.round() as u64),
            min_latency,
            max_latency: Duration::from_micros(self.max_micros.load(Ordering::Relaxed)),
            latency_percentiles: stats.percentiles(),
        }
    }

    /// Freeze the aggregate and produce the run's terminal result.
    ///
    /// Must be called after every writer has stopped. Succeeds exactly once;
    /// later calls return [`RunControlError::AlreadyFinalized`].
    pub fn finalize(&self, elapsed: Duration) -> Result<TestResult, RunControlError> {
        let stats = self.latency.lock();
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(RunControlError::AlreadyFinalized);
        }
        Ok(self.snapshot_locked(&stats).to_result(elapsed))
    }

    /// Returns `true` once [`finalize`](Self::finalize) has succeeded.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}

impl OutcomeSink for MetricsAggregator {
    fn on_outcome(&self, outcome: RequestOutcome) {
        if !self.record(outcome) {
            tracing::debug!(
                classification = %outcome.classification,
                "outcome arrived after finalize, dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsAggregator::new().snapshot();
        assert_eq!(snapshot.total_requests(), 0);
        assert_eq!(snapshot.failed_requests(), 0);
        assert_eq!(snapshot.mean_latency, Duration::ZERO);
        assert_eq!(snapshot.min_latency, Duration::ZERO);
        assert_eq!(snapshot.max_latency, Duration::ZERO);
        assert_eq!(snapshot.latency_percentiles, LatencyPercentiles::default());
        assert_eq!(snapshot.error_rate(), 0.0);
    }

    #[test]
    fn test_record_counts_per_classification() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(RequestOutcome::success(ms(10)));
        aggregator.record(RequestOutcome::success(ms(10)));
        aggregator.record(RequestOutcome::new(ms(1), Classification::ConnectionError));
        aggregator.record(RequestOutcome::new(ms(500), Classification::TimeoutError));
        aggregator.record(RequestOutcome::new(ms(20), Classification::HttpError));
        aggregator.record(RequestOutcome::new(ms(20), Classification::HttpError));
        aggregator.record(RequestOutcome::new(ms(5), Classification::OtherError));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.successful_requests, 2);
        assert_eq!(
            snapshot.error_stats,
            ErrorStats {
                connection_errors: 1,
                timeout_errors: 1,
                http_errors: 2,
                other_errors: 1,
            }
        );
        assert_eq!(snapshot.failed_requests(), 5);
        assert_eq!(snapshot.total_requests(), 7);
        assert_eq!(snapshot.min_latency, ms(1));
        assert_eq!(snapshot.max_latency, ms(500));
    }

    #[test]
    fn test_mean_includes_failures() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(RequestOutcome::success(ms(10)));
        aggregator.record(RequestOutcome::new(ms(30), Classification::TimeoutError));
        aggregator.record(RequestOutcome::new(ms(20), Classification::HttpError));

        assert_eq!(aggregator.snapshot().mean_latency, ms(20));
    }

    #[test]
    fn test_percentiles_monotonic() {
        let aggregator = MetricsAggregator::new();
        for i in 1..=100 {
            aggregator.record(RequestOutcome::success(ms(i)));
        }
        let p = aggregator.snapshot().latency_percentiles;
        assert_eq!(p.p50, 50);
        assert!(p.p50 <= p.p90 && p.p90 <= p.p95 && p.p95 <= p.p99);
        assert_eq!(p.p99, 99);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(RequestOutcome::success(ms(12)));
        aggregator.record(RequestOutcome::new(ms(7), Classification::OtherError));

        let first = aggregator.snapshot();
        let second = aggregator.snapshot();
        assert_eq!(first, second);
    }

    #[test]
    fn test_finalize_computes_rate_and_mean() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..10 {
            aggregator.record(RequestOutcome::success(ms(40)));
        }
        let result = aggregator.finalize(Duration::from_secs(2)).unwrap();
        assert_eq!(result.total_requests, 10);
        assert_eq!(result.requests_per_second, 5.0);
        assert_eq!(result.average_latency, ms(40));
    }

    #[test]
    fn test_finalize_zero_elapsed_guard() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(RequestOutcome::success(ms(1)));
        let result = aggregator.finalize(Duration::ZERO).unwrap();
        assert_eq!(result.requests_per_second, 0.0);
        assert!(result.requests_per_second.is_finite());
    }

    #[test]
    fn test_finalize_only_once() {
        let aggregator = MetricsAggregator::new();
        assert!(!aggregator.is_finalized());
        assert!(aggregator.finalize(ms(100)).is_ok());
        assert!(aggregator.is_finalized());
        assert_eq!(
            aggregator.finalize(ms(100)),
            Err(RunControlError::AlreadyFinalized)
        );
    }

    #[test]
    fn test_record_after_finalize_is_rejected() {
        let aggregator = MetricsAggregator::new();
        assert!(aggregator.record(RequestOutcome::success(ms(5))));
        let result = aggregator.finalize(Duration::from_secs(1)).unwrap();

        assert!(!aggregator.record(RequestOutcome::success(ms(5))));
        aggregator.on_outcome(RequestOutcome::success(ms(5)));
        assert_eq!(aggregator.snapshot().total_requests(), result.total_requests);
    }

    #[test]
    fn test_all_failures_still_well_formed() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..25 {
            aggregator.record(RequestOutcome::new(ms(1), Classification::ConnectionError));
        }
        let result = aggregator.finalize(Duration::from_secs(1)).unwrap();
        assert_eq!(result.successful_requests, 0);
        assert_eq!(result.failed_requests, 25);
        assert_eq!(result.error_stats.connection_errors, 25);
        assert_eq!(result.requests_per_second, 25.0);
    }

    #[test]
    fn test_concurrent_writers_lose_no_updates() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let class = Classification::ALL[((t + i) % 5) as usize];
                        aggregator.record(RequestOutcome::new(ms(i % 50 + 1), class));
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total_requests(), 8_000);
        for class in Classification::ALL {
            assert_eq!(aggregator.count(class), 1_600);
        }
    }

    #[test]
    fn test_error_rate() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(RequestOutcome::success(ms(1)));
        aggregator.record(RequestOutcome::success(ms(1)));
        aggregator.record(RequestOutcome::success(ms(1)));
        aggregator.record(RequestOutcome::new(ms(1), Classification::HttpError));
        assert!((aggregator.snapshot().error_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_counts_match_mean_under_concurrent_writes() {
        let aggregator = Arc::new(MetricsAggregator::new());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let aggregator = aggregator.clone();
                scope.spawn(move || {
                    for i in 0..5_000 {
                        if i % 2 == 0 {
                            aggregator.record(RequestOutcome::success(ms(10)));
                        } else {
                            aggregator
                                .record(RequestOutcome::new(ms(30), Classification::HttpError));
                        }
                    }
                });
            }

            let aggregator = aggregator.clone();
            scope.spawn(move || {
                for _ in 0..2_000 {
                    let snap = aggregator.snapshot();
                    let total = snap.total_requests();
                    if total == 0 {
                        assert_eq!(snap.mean_latency, Duration::ZERO);
                        continue;
                    }
                    // The mean must be the one implied by the counts in the
                    // same snapshot.
                    let expected = (10_000 * snap.successful_requests
                        + 30_000 * snap.error_stats.http_errors) as f64
                        / total as f64;
                    let mean = snap.mean_latency.as_micros() as f64;
                    assert!(
                        (mean - expected).abs() <= 1.0,
                        "mean {mean}us vs {expected}us for {total} requests"
                    );
                    assert!(snap.min_latency >= ms(10) && snap.max_latency <= ms(30));
                }
            });
        });

        assert_eq!(aggregator.snapshot().total_requests(), 20_000);
    }
}
