//! Closed-loop worker pool.
//!
//! Each worker owns one slot of concurrency: it issues a request, hands the
//! outcome to the [`OutcomeSink`], and immediately issues the next one, until
//! the run deadline passes or the pool is cancelled. There is no shared work
//! queue; workers are self-paced.
//!
//! Deadline and cancellation are treated differently:
//! - when the deadline passes mid-request, the request is allowed to finish
//!   and its outcome is counted, then the worker exits;
//! - on cancellation the in-flight request is abandoned and not counted.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineSettings;
use crate::executor::RequestExecutor;
use crate::outcome::RequestOutcome;

/// Receives every completed request outcome.
///
/// Called concurrently from all workers; implementations must be cheap and
/// must not block.
pub trait OutcomeSink: Send + Sync {
    fn on_outcome(&self, outcome: RequestOutcome);
}

/// Per-request timeout policy.
///
/// A request never waits longer than `request_timeout`, and never longer
/// than the time left in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub request_timeout: Duration,
}

impl TimeoutPolicy {
    /// Policy from engine settings.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
        }
    }

    /// Timeout for a request dispatched with `remaining` run time left.
    pub fn for_remaining(&self, remaining: Duration) -> Duration {
        self.request_timeout.min(remaining)
    }
}

/// Main worker loop.
///
/// `active` counts workers currently inside the loop.
pub async fn worker_loop(
    worker_id: u32,
    executor: Arc<dyn RequestExecutor>,
    sink: Arc<dyn OutcomeSink>,
    deadline: Instant,
    timeouts: TimeoutPolicy,
    cancel: CancellationToken,
    active: Arc<AtomicU32>,
) {
    active.fetch_add(1, Ordering::Relaxed);
    let mut completed: u64 = 0;

    loop {
        // Pre-flight checks: never start a request after the deadline.
        if cancel.is_cancelled() {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        let timeout = timeouts.for_remaining(deadline - now);
        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            outcome = executor.execute(timeout) => outcome,
        };

        sink.on_outcome(outcome);
        completed += 1;
    }

    tracing::debug!(worker_id, completed, "worker stopped");
    active.fetch_sub(1, Ordering::Relaxed);
}

/// Spawns and owns the workers of one run.
pub struct WorkerPool;

impl WorkerPool {
    /// Start `concurrency` workers against `executor`, each running until
    /// `deadline` or until `cancel` fires.
    ///
    /// The pool uses a child of `cancel`, so stopping the pool never cancels
    /// the caller's token.
    pub fn start(
        concurrency: u32,
        executor: Arc<dyn RequestExecutor>,
        sink: Arc<dyn OutcomeSink>,
        deadline: Instant,
        timeouts: TimeoutPolicy,
        cancel: &CancellationToken,
    ) -> WorkerPoolHandle {
        let tracker = TaskTracker::new();
        let cancel = cancel.child_token();
        let active = Arc::new(AtomicU32::new(0));

        for worker_id in 0..concurrency {
            tracker.spawn(worker_loop(
                worker_id,
                executor.clone(),
                sink.clone(),
                deadline,
                timeouts,
                cancel.clone(),
                active.clone(),
            ));
        }
        tracker.close();

        tracing::debug!(concurrency, "worker pool started");

        WorkerPoolHandle {
            tracker,
            cancel,
            active,
            spawned: concurrency,
        }
    }
}

/// Handle to a running [`WorkerPool`].
pub struct WorkerPoolHandle {
    tracker: TaskTracker,
    cancel: CancellationToken,
    active: Arc<AtomicU32>,
    spawned: u32,
}

impl WorkerPoolHandle {
    /// Request cooperative shutdown. In-flight requests are abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait until every worker has exited.
    pub async fn drain(self) {
        self.tracker.wait().await;
    }

    /// Workers currently running their loop.
    pub fn active_workers(&self) -> u32 {
        self.active.load(Ordering::Relaxed)
    }

    /// Workers spawned by this pool.
    pub fn spawned_workers(&self) -> u32 {
        self.spawned
    }
}
