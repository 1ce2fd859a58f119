//! Run lifecycle: validation, start, deadline, cancellation, finalization.
//!
//! [`RunController`] owns one run at a time and moves through
//! `Idle -> Running -> {Completed, Cancelled, Failed}`. A terminal state may
//! start a new run. The two entry points callers normally use are
//! [`run_load_test`] and [`run_load_test_with_monitoring`].
//!
//! Shutdown sequence, shared by deadline and cancellation:
//! 1. the worker pool drains (deadline: in-flight requests complete;
//!    cancellation: they are abandoned),
//! 2. the monitor sampler is stopped and joined,
//! 3. the aggregator is finalized into the single [`TestResult`].

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregator::MetricsAggregator;
use crate::config::{EngineSettings, LoadTestConfig, MonitorSettings, TestConfig};
use crate::error::{ConfigError, LoadTestError, RunControlError};
use crate::executor::{build_http_client, HttpExecutor, RequestExecutor};
use crate::monitor::{MetricsSink, MonitorSampler};
use crate::types::{LiveMetricsSnapshot, TestResult};
use crate::worker::{TimeoutPolicy, WorkerPool};

/// Lifecycle state of a [`RunController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    /// `Completed`, `Cancelled` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug)]
struct Slot {
    state: RunState,
    cancel: Option<CancellationToken>,
}

/// Owns the lifecycle of one load test at a time.
#[derive(Debug)]
pub struct RunController {
    settings: EngineSettings,
    monitor: MonitorSettings,
    slot: Mutex<Slot>,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl RunController {
    /// Creates an idle controller with default monitor settings.
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            monitor: MonitorSettings::default(),
            slot: Mutex::new(Slot {
                state: RunState::Idle,
                cancel: None,
            }),
        }
    }

    /// Controller using the `[settings]` and `[monitor]` tables of a config file.
    pub fn from_config(config: &LoadTestConfig) -> Self {
        Self::new(config.settings.clone()).with_monitor_settings(config.monitor.clone())
    }

    /// Sets the live sampling period and rate mode.
    pub fn with_monitor_settings(mut self, monitor: MonitorSettings) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn monitor_settings(&self) -> &MonitorSettings {
        &self.monitor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.slot.lock().state
    }

    /// Request cancellation of the active run.
    ///
    /// The run still returns a [`TestResult`] with the partial counts.
    pub fn cancel(&self) -> Result<(), RunControlError> {
        let slot = self.slot.lock();
        match (&slot.state, &slot.cancel) {
            (RunState::Running, Some(token)) => {
                tracing::info!("load test cancellation requested");
                token.cancel();
                Ok(())
            },
            _ => Err(RunControlError::NotRunning),
        }
    }

    /// Run one load test against the configured HTTP target.
    ///
    /// Live snapshots go to `sink` only when `config.enable_monitoring` is set.
    pub async fn run(
        &self,
        config: &TestConfig,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Result<TestResult, LoadTestError> {
        let (url, cancel) = self.begin(config)?;
        self.execute_http(url, config, cancel, sink).await
    }

    /// Run one load test with a caller-supplied executor.
    pub async fn run_with_executor(
        &self,
        config: &TestConfig,
        executor: Arc<dyn RequestExecutor>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Result<TestResult, LoadTestError> {
        let (_url, cancel) = self.begin(config)?;
        self.execute(config, executor, cancel, sink).await
    }

    /// Start a run in the background.
    ///
    /// Validation and the single-run check happen before this returns, so
    /// configuration and control errors are reported synchronously.
    pub fn spawn(self: &Arc<Self>, config: TestConfig) -> Result<RunHandle, LoadTestError> {
        let (url, cancel) = self.begin(&config)?;
        let (tx, snapshots) = mpsc::unbounded_channel();
        let sink = config
            .enable_monitoring
            .then(|| Arc::new(tx) as Arc<dyn MetricsSink>);

        let controller = Arc::clone(self);
        let run_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            controller
                .execute_http(url, &config, run_cancel, sink)
                .await
        });

        Ok(RunHandle {
            snapshots,
            join,
            cancel,
        })
    }

    /// Validate and move to `Running`.
    ///
    /// A rejected config leaves the state untouched.
    fn begin(&self, config: &TestConfig) -> Result<(url::Url, CancellationToken), LoadTestError> {
        self.settings.validate()?;
        self.monitor.validate()?;
        let url = config.validate()?;

        let mut slot = self.slot.lock();
        if slot.state == RunState::Running {
            return Err(RunControlError::AlreadyRunning.into());
        }
        let cancel = CancellationToken::new();
        slot.state = RunState::Running;
        slot.cancel = Some(cancel.clone());
        Ok((url, cancel))
    }

    fn finish(&self, state: RunState) {
        let mut slot = self.slot.lock();
        slot.state = state;
        slot.cancel = None;
    }

    async fn execute_http(
        &self,
        url: url::Url,
        config: &TestConfig,
        cancel: CancellationToken,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Result<TestResult, LoadTestError> {
        let prepared = self
            .settings
            .method()
            .map_err(LoadTestError::from)
            .and_then(|method| Ok((build_http_client(&self.settings)?, method)));
        let (client, method) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "cannot start load test");
                self.finish(RunState::Failed);
                return Err(e);
            },
        };
        let executor: Arc<dyn RequestExecutor> = Arc::new(HttpExecutor::new(client, url, method));
        self.execute(config, executor, cancel, sink).await
    }

    async fn execute(
        &self,
        config: &TestConfig,
        executor: Arc<dyn RequestExecutor>,
        cancel: CancellationToken,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Result<TestResult, LoadTestError> {
        let mut guard = ActiveRun {
            controller: self,
            cancel: cancel.clone(),
            finished: false,
        };

        tracing::info!(
            url = %config.url,
            concurrency = config.concurrency,
            duration_secs = config.duration,
            monitoring = config.enable_monitoring,
            method = %self.settings.method,
            "load test started"
        );

        let aggregator = Arc::new(MetricsAggregator::new());
        let start = Instant::now();
        let Some(deadline) = start.checked_add(config.duration()) else {
            guard.finished = true;
            self.finish(RunState::Failed);
            return Err(ConfigError::InvalidDuration {
                value: config.duration,
            }
            .into());
        };

        let pool = WorkerPool::start(
            config.concurrency,
            executor,
            aggregator.clone(),
            deadline,
            TimeoutPolicy::from_settings(&self.settings),
            &cancel,
        );

        let monitor = match sink {
            Some(sink) if config.enable_monitoring => Some(
                MonitorSampler::from_settings(&self.monitor).start(
                    aggregator.clone(),
                    sink,
                    deadline,
                    &cancel,
                ),
            ),
            _ => None,
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(active_workers = pool.active_workers(), "deadline reached, draining");
            },
            _ = cancel.cancelled() => {
                tracing::debug!(active_workers = pool.active_workers(), "run cancelled, stopping workers");
            },
        }

        pool.drain().await;
        let snapshots = match monitor {
            Some(monitor) => monitor.stop().await,
            None => 0,
        };

        let elapsed = start.elapsed();
        let result = aggregator.finalize(elapsed)?;
        let state = if cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };

        guard.finished = true;
        self.finish(state);

        tracing::info!(
            state = ?state,
            total_requests = result.total_requests,
            successful_requests = result.successful_requests,
            failed_requests = result.failed_requests,
            requests_per_second = result.requests_per_second,
            average_latency_ms = result.average_latency.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            snapshots,
            "load test finished"
        );

        Ok(result)
    }
}

/// Resets the controller if a run future is dropped before it finishes.
struct ActiveRun<'a> {
    controller: &'a RunController,
    cancel: CancellationToken,
    finished: bool,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
            self.controller.finish(RunState::Cancelled);
        }
    }
}

/// Handle to a run started with [`RunController::spawn`].
pub struct RunHandle {
    snapshots: mpsc::UnboundedReceiver<LiveMetricsSnapshot>,
    join: JoinHandle<Result<TestResult, LoadTestError>>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Next live snapshot, or `None` once the run has stopped sampling (or
    /// monitoring is off).
    pub async fn next_snapshot(&mut self) -> Option<LiveMetricsSnapshot> {
        self.snapshots.recv().await
    }

    /// Request cancellation. The result future still resolves with partial counts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the final result.
    pub async fn result(self) -> Result<TestResult, LoadTestError> {
        join_result(self.join.await)
    }

    /// Split into the snapshot stream, the result future and the cancel token,
    /// so a consumer can render snapshots while awaiting the result.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<LiveMetricsSnapshot>,
        impl Future<Output = Result<TestResult, LoadTestError>> + Send,
        CancellationToken,
    ) {
        let join = self.join;
        (
            self.snapshots,
            async move { join_result(join.await) },
            self.cancel,
        )
    }
}

fn join_result(
    joined: Result<Result<TestResult, LoadTestError>, tokio::task::JoinError>,
) -> Result<TestResult, LoadTestError> {
    joined.unwrap_or_else(|e| {
        Err(LoadTestError::Task {
            message: e.to_string(),
        })
    })
}

/// Run a load test with monitoring disabled.
///
/// # Example
///
/// ```no_run
/// use stampede::{run_load_test, TestConfig};
///
/// # async fn demo() -> Result<(), stampede::LoadTestError> {
/// let config = TestConfig::new("http://localhost:8080/health")
///     .with_concurrency(10)
///     .with_duration(5);
/// let result = run_load_test(config).await?;
/// println!("{} requests, {:.1} rps", result.total_requests, result.requests_per_second);
/// # Ok(())
/// # }
/// ```
pub async fn run_load_test(config: TestConfig) -> Result<TestResult, LoadTestError> {
    let config = config.with_monitoring(false);
    RunController::default().run(&config, None).await
}

/// Run a load test, emitting `load_test_metrics` snapshots to `sink` while it
/// runs when `config.enable_monitoring` is set.
///
/// Every snapshot is delivered before this returns.
pub async fn run_load_test_with_monitoring(
    config: TestConfig,
    sink: Arc<dyn MetricsSink>,
) -> Result<TestResult, LoadTestError> {
    RunController::default().run(&config, Some(sink)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateMode;
    use crate::outcome::RequestOutcome;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Executor that succeeds after a fixed simulated latency.
    struct SleepExecutor(Duration);

    #[async_trait]
    impl RequestExecutor for SleepExecutor {
        async fn execute(&self, _timeout: Duration) -> RequestOutcome {
            tokio::time::sleep(self.0).await;
            RequestOutcome::success(self.0)
        }
    }

    fn sleepy(ms: u64) -> Arc<dyn RequestExecutor> {
        Arc::new(SleepExecutor(Duration::from_millis(ms)))
    }

    fn config(concurrency: u32, duration: u64) -> TestConfig {
        TestConfig::new("http://load.test/").with_concurrency(concurrency).with_duration(duration)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_run_counts_and_rate() {
        let controller = RunController::default();
        assert_eq!(controller.state(), RunState::Idle);

        let result = controller
            .run_with_executor(&config(4, 2), sleepy(100), None)
            .await
            .unwrap();

        assert_eq!(result.total_requests, 80);
        assert_eq!(result.successful_requests, 80);
        assert_eq!(result.failed_requests, 0);
        assert!((result.requests_per_second - 40.0).abs() < 0.5);
        assert_eq!(result.average_latency, Duration::from_millis(100));
        assert_eq!(controller.state(), RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_leaves_state_unchanged() {
        let controller = RunController::default();
        let err = controller
            .run_with_executor(&config(0, 2), sleepy(10), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoadTestError::Config(ConfigError::InvalidConcurrency { value: 0 })
        ));
        assert_eq!(controller.state(), RunState::Idle);

        let err = controller
            .run_with_executor(&TestConfig::new("not a url"), sleepy(10), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
        assert_eq!(controller.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_engine_settings_rejected() {
        let settings = EngineSettings {
            method: "NOT A METHOD".to_string(),
            ..EngineSettings::default()
        };
        let controller = RunController::new(settings);
        let err = controller
            .run_with_executor(&config(1, 1), sleepy(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadTestError::Config(ConfigError::Validation { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle_is_rejected() {
        let controller = RunController::default();
        assert_eq!(controller.cancel(), Err(RunControlError::NotRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_rejected_while_running() {
        let controller = Arc::new(RunController::default());
        let first = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .run_with_executor(&config(2, 10), sleepy(100), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.state(), RunState::Running);

        let err = controller
            .run_with_executor(&config(1, 1), sleepy(10), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoadTestError::RunControl(RunControlError::AlreadyRunning)
        ));
        assert!(matches!(
            controller.spawn(config(1, 1)),
            Err(LoadTestError::RunControl(RunControlError::AlreadyRunning))
        ));

        controller.cancel().unwrap();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(controller.state(), RunState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_partial_counts() {
        let controller = Arc::new(RunController::default());
        let run = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .run_with_executor(&config(2, 10), sleepy(100), None)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(450)).await;
        controller.cancel().unwrap();
        let result = run.await.unwrap().unwrap();

        // Two workers, four completed requests each; the fifth is abandoned.
        assert_eq!(result.total_requests, 8);
        assert_eq!(
            result.total_requests,
            result.successful_requests + result.failed_requests
        );
        assert_eq!(controller.state(), RunState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_allows_new_run() {
        let controller = RunController::default();
        controller
            .run_with_executor(&config(1, 1), sleepy(100), None)
            .await
            .unwrap();
        assert!(controller.state().is_terminal());

        let result = controller
            .run_with_executor(&config(1, 1), sleepy(250), None)
            .await
            .unwrap();
        assert_eq!(result.total_requests, 4);
        assert_eq!(controller.state(), RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_resets_state() {
        let controller = RunController::default();
        {
            let cfg = config(1, 10);
            let run = controller.run_with_executor(&cfg, sleepy(100), None);
            let _ = tokio::time::timeout(Duration::from_millis(300), run).await;
        }
        assert_eq!(controller.state(), RunState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_emits_only_during_run() {
        let controller = RunController::default().with_monitor_settings(MonitorSettings {
            sample_period_ms: 500,
            rate: RateMode::Cumulative,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = controller
            .run_with_executor(
                &config(2, 3).with_monitoring(true),
                sleepy(50),
                Some(Arc::new(tx)),
            )
            .await
            .unwrap();

        let mut snapshots = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            snapshots.push(snapshot);
        }
        assert!((4..=7).contains(&snapshots.len()), "got {}", snapshots.len());
        for pair in snapshots.windows(2) {
            assert!(pair[0].total_requests <= pair[1].total_requests);
        }
        let last = snapshots.last().unwrap();
        assert!(last.total_requests <= result.total_requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_disabled_ignores_sink() {
        let controller = RunController::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        controller
            .run_with_executor(&config(1, 2), sleepy(50), Some(Arc::new(tx)))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawned_handle_streams_snapshots() {
        let controller = Arc::new(RunController::default().with_monitor_settings(
            MonitorSettings {
                sample_period_ms: 250,
                rate: RateMode::Instantaneous,
            },
        ));
        let cfg = TestConfig::new("http://127.0.0.1:1/")
            .with_duration(1)
            .with_monitoring(true);
        let mut handle = controller.spawn(cfg).unwrap();
        let mut count = 0;
        while handle.next_snapshot().await.is_some() {
            count += 1;
        }
        let result = handle.result().await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(result.successful_requests, 0);
        assert_eq!(controller.state(), RunState::Completed);
    }

    #[test]
    fn test_run_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(RunState::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
