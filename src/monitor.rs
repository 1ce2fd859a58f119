//! Periodic live-metrics sampling.
//!
//! While a monitored run is in progress, [`MonitorSampler`] wakes once per
//! period, reads the aggregator without mutating it, samples host resources
//! through a [`SystemProbe`], and hands a [`LiveMetricsSnapshot`] to a
//! [`MetricsSink`] under the [`LOAD_TEST_METRICS_EVENT`] name.
//!
//! Timing contract:
//! - the first tick fires one period after start;
//! - no tick fires at or after the run deadline;
//! - the sampler stops as soon as the run's token is cancelled, and it never
//!   emits once the aggregator has been finalized.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::aggregator::MetricsAggregator;
use crate::config::{MonitorSettings, RateMode};
use crate::system::{SystemProbe, SystemSampler};
use crate::types::{LiveMetricsSnapshot, LOAD_TEST_METRICS_EVENT};

/// Receiver of live snapshots.
///
/// Implementations must not block: they are called from the sampler task.
pub trait MetricsSink: Send + Sync {
    /// Deliver one snapshot published under `event`.
    fn emit(&self, event: &str, snapshot: LiveMetricsSnapshot);
}

impl MetricsSink for mpsc::UnboundedSender<LiveMetricsSnapshot> {
    fn emit(&self, event: &str, snapshot: LiveMetricsSnapshot) {
        if self.send(snapshot).is_err() {
            tracing::trace!(event, "snapshot receiver dropped");
        }
    }
}

impl MetricsSink for broadcast::Sender<LiveMetricsSnapshot> {
    fn emit(&self, event: &str, snapshot: LiveMetricsSnapshot) {
        // No subscribers is not an error for a broadcast.
        if self.send(snapshot).is_err() {
            tracing::trace!(event, "no snapshot subscribers");
        }
    }
}

/// Adapts a closure into a [`MetricsSink`].
///
/// ```
/// use stampede::monitor::{FnSink, MetricsSink};
///
/// let sink = FnSink::new(|event: &str, snapshot| {
///     println!("{event}: {} rps", snapshot.rps);
/// });
/// # let _ = &sink as &dyn MetricsSink;
/// ```
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&str, LiveMetricsSnapshot) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> MetricsSink for FnSink<F>
where
    F: Fn(&str, LiveMetricsSnapshot) + Send + Sync,
{
    fn emit(&self, event: &str, snapshot: LiveMetricsSnapshot) {
        (self.0)(event, snapshot)
    }
}

/// Computes the live `rps` figure according to a [`RateMode`].
#[derive(Debug)]
pub struct RateTracker {
    mode: RateMode,
    started: Instant,
    last: (Instant, u64),
    /// `(at, total)` points; the front is the newest point at or before the
    /// window start.
    window: VecDeque<(Instant, u64)>,
}

impl RateTracker {
    /// Starts tracking from `started` with zero completed requests.
    pub fn new(mode: RateMode, started: Instant) -> Self {
        let mut window = VecDeque::new();
        window.push_back((started, 0));
        Self {
            mode,
            started,
            last: (started, 0),
            window,
        }
    }

    /// Feed the running total observed at `now` and return the current rate.
    pub fn observe(&mut self, now: Instant, total: u64) -> f64 {
        let rate = match self.mode {
            RateMode::Instantaneous => {
                let (at, prev) = self.last;
                per_second(total.saturating_sub(prev), now.saturating_duration_since(at))
            },
            RateMode::TrailingWindow { window_ms } => {
                let window = Duration::from_millis(window_ms);
                self.window.push_back((now, total));
                let cutoff = now.checked_sub(window).unwrap_or(self.started);
                while self.window.len() > 1 && self.window[1].0 <= cutoff {
                    self.window.pop_front();
                }
                let (at, base) = self.window.front().copied().unwrap_or((self.started, 0));
                per_second(total.saturating_sub(base), now.saturating_duration_since(at))
            },
            RateMode::Cumulative => {
                per_second(total, now.saturating_duration_since(self.started))
            },
        };
        self.last = (now, total);
        rate
    }
}

fn per_second(count: u64, span: Duration) -> f64 {
    let secs = span.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Configures and starts the sampler task for one run.
pub struct MonitorSampler {
    period: Duration,
    rate_mode: RateMode,
    probe: Option<Box<dyn SystemProbe>>,
}

impl MonitorSampler {
    /// Sampler ticking every `period` with the given rate mode.
    pub fn new(period: Duration, rate_mode: RateMode) -> Self {
        Self {
            period,
            rate_mode,
            probe: None,
        }
    }

    /// Sampler configured from [`MonitorSettings`].
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self::new(settings.sample_period(), settings.rate)
    }

    /// Replace the default `sysinfo` probe.
    pub fn with_probe(mut self, probe: Box<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Spawn the sampler.
    ///
    /// The sampler runs on a child of `cancel`, so stopping it never cancels
    /// the run.
    pub fn start(
        self,
        aggregator: Arc<MetricsAggregator>,
        sink: Arc<dyn MetricsSink>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> MonitorHandle {
        let cancel = cancel.child_token();
        let probe = self
            .probe
            .unwrap_or_else(|| Box::new(SystemSampler::new()) as Box<dyn SystemProbe>);
        let join = tokio::spawn(sample_loop(
            self.period,
            self.rate_mode,
            aggregator,
            probe,
            sink,
            deadline,
            cancel.clone(),
        ));
        MonitorHandle { cancel, join }
    }
}

async fn sample_loop(
    period: Duration,
    rate_mode: RateMode,
    aggregator: Arc<MetricsAggregator>,
    mut probe: Box<dyn SystemProbe>,
    sink: Arc<dyn MetricsSink>,
    deadline: Instant,
    cancel: CancellationToken,
) -> u64 {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rate = RateTracker::new(rate_mode, start);
    let mut emitted = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => break,
            tick = ticker.tick() => {
                if tick >= deadline || aggregator.is_finalized() {
                    break;
                }
                let aggregate = aggregator.snapshot();
                let total = aggregate.total_requests();
                let snapshot = LiveMetricsSnapshot {
                    rps: rate.observe(Instant::now(), total),
                    total_requests: total,
                    successful_requests: aggregate.successful_requests,
                    failed_requests: aggregate.failed_requests(),
                    system_metrics: probe.sample(),
                    average_latency: aggregate.mean_latency,
                    latency_percentiles: aggregate.latency_percentiles,
                };
                sink.emit(LOAD_TEST_METRICS_EVENT, snapshot);
                emitted += 1;
            }
        }
    }

    tracing::debug!(emitted, "monitor sampler stopped");
    emitted
}

/// Handle to a running sampler.
pub struct MonitorHandle {
    cancel: CancellationToken,
    join: JoinHandle<u64>,
}

impl MonitorHandle {
    /// Stop the sampler and wait for it to exit. Returns the number of
    /// snapshots emitted.
    ///
    /// Once this returns, the sink receives nothing more.
    pub async fn stop(self) -> u64 {
        self.cancel.cancel();
        match self.join.await {
            Ok(emitted) => emitted,
            Err(e) => {
                tracing::warn!(error = %e, "monitor sampler task failed");
                0
            },
        }
    }
}
