//! Bounded-concurrency run executor.
//!
//! Every trigger source funnels into `Runner::submit`. The runner admits a
//! run (subject to the drain flag and the concurrency budget), persists a
//! pending record, checkpoints, and executes the workflow through the
//! injected adapter on its own task. Run status moves strictly forward:
//! `pending -> running -> {succeeded, failed, cancelled}`.

use crate::adapter::{ParsedWorkflow, StepObserver, WorkflowAdapter, WorkflowFetcher};
use crate::error::RunnerError;
use async_trait::async_trait;
use chrono::Utc;
use conductor_core::RunId;
use conductor_store::{Checkpoint, CheckpointStore, Run, RunStatus, StateStore, StoreError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of concurrently-executing runs.
    pub max_parallel: usize,
    /// Default per-run timeout, overridable per submit.
    pub default_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            default_timeout: Duration::from_secs(600),
        }
    }
}

/// Per-submit options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the configured run timeout.
    pub timeout: Option<Duration>,
}

/// Observability hooks for run lifecycle events.
pub trait RunnerMetrics: Send + Sync {
    /// A run was admitted.
    fn run_submitted(&self);
    /// A run reached a terminal status.
    fn run_finished(&self, status: RunStatus);
}

/// Metrics sink that records nothing.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl RunnerMetrics for NoopMetrics {
    fn run_submitted(&self) {}
    fn run_finished(&self, _status: RunStatus) {}
}

/// State shared between the runner handle and its worker tasks.
struct Shared {
    store: Arc<dyn StateStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    draining: AtomicBool,
    active: Mutex<HashMap<RunId, CancellationToken>>,
    drained: Notify,
}

impl Shared {
    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    fn finish(&self, run_id: RunId) {
        let empty = {
            let mut active = self.active.lock().unwrap();
            active.remove(&run_id);
            active.is_empty()
        };
        if empty {
            self.drained.notify_waiters();
        }
    }

    /// Persists a run record, logging storage failures instead of aborting
    /// the run.
    async fn persist(&self, run: &Run) {
        if let Err(e) = self.store.update_run(run).await {
            tracing::warn!(error = %e, run_id = %run.id, "failed to persist run update");
        }
    }
}

/// Writes a checkpoint at every step boundary the adapter reports.
struct CheckpointObserver {
    checkpoints: Arc<dyn CheckpointStore>,
    run_id: RunId,
    workflow: String,
}

#[async_trait]
impl StepObserver for CheckpointObserver {
    async fn on_step(&self, step_id: &str, step_index: u32, context: &HashMap<String, JsonValue>) {
        let checkpoint = Checkpoint {
            run_id: self.run_id,
            workflow: self.workflow.clone(),
            step_id: step_id.to_string(),
            step_index,
            context: context.clone(),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.checkpoints.save(&checkpoint).await {
            tracing::warn!(error = %e, run_id = %self.run_id, "failed to write checkpoint");
        }
    }
}

/// The bounded-concurrency run executor.
pub struct Runner {
    adapter: Arc<dyn WorkflowAdapter>,
    fetcher: Option<Arc<dyn WorkflowFetcher>>,
    metrics: Arc<dyn RunnerMetrics>,
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    default_timeout: Duration,
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn WorkflowAdapter>,
        store: Arc<dyn StateStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            adapter,
            fetcher: None,
            metrics: Arc::new(NoopMetrics),
            shared: Arc::new(Shared {
                store,
                checkpoints,
                draining: AtomicBool::new(false),
                active: Mutex::new(HashMap::new()),
                drained: Notify::new(),
            }),
            semaphore: Arc::new(Semaphore::new(config.max_parallel)),
            default_timeout: config.default_timeout,
        }
    }

    /// Sets the workflow fetcher used to resume interrupted runs.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn WorkflowFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn RunnerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Submits a run, blocking while the runner is at capacity.
    ///
    /// # Errors
    ///
    /// Returns `Draining` once draining has begun, or `InvalidWorkflow` if
    /// the adapter rejects the source.
    pub async fn submit(
        &self,
        workflow: &str,
        source: &[u8],
        inputs: HashMap<String, JsonValue>,
        options: SubmitOptions,
    ) -> Result<Run, RunnerError> {
        if self.shared.is_draining() {
            return Err(RunnerError::Draining);
        }
        let parsed = self.parse(workflow, source)?;
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RunnerError::Draining)?;
        // Draining may have begun while we waited for a permit
        if self.shared.is_draining() {
            return Err(RunnerError::Draining);
        }
        self.admit(parsed, inputs, options, permit).await
    }

    /// Submits a run without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Capacity` when no slot is immediately available, `Draining`
    /// once draining has begun.
    pub async fn try_submit(
        &self,
        workflow: &str,
        source: &[u8],
        inputs: HashMap<String, JsonValue>,
        options: SubmitOptions,
    ) -> Result<Run, RunnerError> {
        if self.shared.is_draining() {
            return Err(RunnerError::Draining);
        }
        let parsed = self.parse(workflow, source)?;
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| RunnerError::Capacity)?;
        self.admit(parsed, inputs, options, permit).await
    }

    fn parse(&self, workflow: &str, source: &[u8]) -> Result<ParsedWorkflow, RunnerError> {
        self.adapter
            .parse(workflow, source)
            .map_err(|e| RunnerError::InvalidWorkflow {
                reason: e.to_string(),
            })
    }

    async fn admit(
        &self,
        parsed: ParsedWorkflow,
        inputs: HashMap<String, JsonValue>,
        options: SubmitOptions,
        permit: OwnedSemaphorePermit,
    ) -> Result<Run, RunnerError> {
        let run = Run::new(parsed.name.clone(), inputs.clone());
        self.shared.store.create_run(&run).await?;

        let checkpoint = Checkpoint::initial(run.id, parsed.name.clone());
        if let Err(e) = self.shared.checkpoints.save(&checkpoint).await {
            tracing::warn!(error = %e, run_id = %run.id, "failed to write initial checkpoint");
        }

        self.spawn_worker(run.clone(), parsed, inputs, None, options, permit);
        Ok(run)
    }

    fn spawn_worker(
        &self,
        run: Run,
        parsed: ParsedWorkflow,
        inputs: HashMap<String, JsonValue>,
        resume_from: Option<Checkpoint>,
        options: SubmitOptions,
        permit: OwnedSemaphorePermit,
    ) {
        let token = CancellationToken::new();
        self.shared
            .active
            .lock()
            .unwrap()
            .insert(run.id, token.clone());
        self.metrics.run_submitted();

        let shared = Arc::clone(&self.shared);
        let adapter = Arc::clone(&self.adapter);
        let metrics = Arc::clone(&self.metrics);
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        tokio::spawn(async move {
            execute_run(
                shared, adapter, metrics, run, parsed, inputs, resume_from, timeout, token, permit,
            )
            .await;
        });
    }

    /// Cooperatively cancels an in-flight run. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` if no run with this id ever existed.
    pub async fn cancel(&self, run_id: RunId) -> Result<(), RunnerError> {
        let token = self.shared.active.lock().unwrap().get(&run_id).cloned();
        if let Some(token) = token {
            token.cancel();
            return Ok(());
        }
        // Not in flight: cancelling a finished run is a no-op, but an
        // unknown id is an error.
        match self.shared.store.get_run(run_id).await {
            Ok(_) => Ok(()),
            Err(StoreError::RunNotFound { .. }) => Err(RunnerError::RunNotFound { run_id }),
            Err(e) => Err(e.into()),
        }
    }

    /// Resumes all interrupted runs found in the checkpoint store.
    ///
    /// Invoked once at startup, before trigger sources start. Checkpoints
    /// without a live run record (or whose run already finished) are
    /// removed. Returns the number of runs resumed.
    ///
    /// # Errors
    ///
    /// Returns `NoFetcher` if checkpoints survive but no workflow fetcher
    /// was configured.
    pub async fn resume_interrupted(&self) -> Result<usize, RunnerError> {
        let interrupted = self.shared.checkpoints.list_interrupted().await?;
        if interrupted.is_empty() {
            return Ok(0);
        }
        let fetcher = self.fetcher.clone().ok_or(RunnerError::NoFetcher)?;

        let mut resumed = 0;
        for run_id in interrupted {
            let Some(checkpoint) = self.shared.checkpoints.load(run_id).await? else {
                continue;
            };

            let run = match self.shared.store.get_run(run_id).await {
                Ok(run) => run,
                Err(StoreError::RunNotFound { .. }) => {
                    tracing::warn!(run_id = %run_id, "checkpoint without run record, removing");
                    self.shared.checkpoints.delete(run_id).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if run.status.is_terminal() {
                self.shared.checkpoints.delete(run_id).await?;
                continue;
            }

            let source = match fetcher.fetch(&checkpoint.workflow).await {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(error = %e, run_id = %run_id, "cannot fetch workflow for resume");
                    continue;
                }
            };
            let parsed = match self.adapter.parse(&checkpoint.workflow, &source) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, run_id = %run_id, "cannot parse workflow for resume");
                    continue;
                }
            };

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| RunnerError::Draining)?;
            let inputs = run.inputs.clone();
            tracing::info!(run_id = %run_id, workflow = %checkpoint.workflow, step = checkpoint.step_index, "resuming interrupted run");
            self.spawn_worker(
                run,
                parsed,
                inputs,
                Some(checkpoint),
                SubmitOptions::default(),
                permit,
            );
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Begins draining: subsequent submits fail, in-flight runs continue.
    pub fn start_draining(&self) {
        self.shared.draining.store(true, Ordering::SeqCst);
        tracing::info!("runner draining");
    }

    /// Blocks until no runs are in flight, or the timeout fires.
    ///
    /// # Errors
    ///
    /// Returns `DrainTimeout` with the number of stragglers.
    pub async fn wait_for_drain(&self, timeout: Duration) -> Result<(), RunnerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.drained.notified();
            let remaining = self.shared.active_count();
            if remaining == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(RunnerError::DrainTimeout {
                    remaining: self.shared.active_count(),
                });
            }
        }
    }

    /// Cancels remaining runs and waits briefly for workers to exit.
    ///
    /// # Errors
    ///
    /// Returns `DrainTimeout` if workers do not finish in time.
    pub async fn stop(&self, timeout: Duration) -> Result<(), RunnerError> {
        self.start_draining();
        let tokens: Vec<CancellationToken> = self
            .shared
            .active
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for token in tokens {
            token.cancel();
        }
        self.wait_for_drain(timeout).await
    }

    /// Number of runs currently in flight.
    #[must_use]
    pub fn active_run_count(&self) -> usize {
        self.shared.active_count()
    }

    /// Returns true once draining has begun.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.shared.is_draining()
    }
}

/// Outcome of an adapter invocation.
enum Outcome {
    Succeeded(JsonValue),
    Failed(String),
    Cancelled,
}

#[allow(clippy::too_many_arguments)]
async fn execute_run(
    shared: Arc<Shared>,
    adapter: Arc<dyn WorkflowAdapter>,
    metrics: Arc<dyn RunnerMetrics>,
    mut run: Run,
    parsed: ParsedWorkflow,
    inputs: HashMap<String, JsonValue>,
    resume_from: Option<Checkpoint>,
    timeout: Duration,
    token: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    run.status = RunStatus::Running;
    run.updated_at = Utc::now();
    shared.persist(&run).await;

    let observer: Arc<dyn StepObserver> = Arc::new(CheckpointObserver {
        checkpoints: Arc::clone(&shared.checkpoints),
        run_id: run.id,
        workflow: parsed.name.clone(),
    });

    // The initial checkpoint has no step id; a post-step checkpoint resumes
    // at the step after the one it recorded.
    let (context, start_step) = match resume_from {
        Some(checkpoint) if !checkpoint.step_id.is_empty() => {
            (checkpoint.context, checkpoint.step_index + 1)
        }
        Some(checkpoint) => (checkpoint.context, 0),
        None => (HashMap::new(), 0),
    };

    // The adapter runs on its own task so a panic is contained as a
    // JoinError instead of taking the worker down.
    let mut handle = tokio::spawn(async move {
        adapter
            .execute(parsed, inputs, context, start_step, observer)
            .await
    });

    let outcome = tokio::select! {
        result = &mut handle => match result {
            Ok(Ok(output)) => Outcome::Succeeded(output),
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(join_error) => Outcome::Failed(format!("workflow panicked: {join_error}")),
        },
        () = token.cancelled() => {
            handle.abort();
            Outcome::Cancelled
        }
        () = tokio::time::sleep(timeout) => {
            handle.abort();
            Outcome::Failed(format!("run timed out after {}s", timeout.as_secs()))
        }
    };

    run.updated_at = Utc::now();
    match outcome {
        Outcome::Succeeded(output) => {
            run.status = RunStatus::Succeeded;
            run.output = Some(output);
            tracing::info!(run_id = %run.id, workflow = %run.workflow, "run succeeded");
        }
        Outcome::Failed(error) => {
            run.status = RunStatus::Failed;
            tracing::warn!(run_id = %run.id, workflow = %run.workflow, error = %error, "run failed");
            run.error = Some(error);
        }
        Outcome::Cancelled => {
            run.status = RunStatus::Cancelled;
            tracing::info!(run_id = %run.id, workflow = %run.workflow, "run cancelled");
        }
    }
    shared.persist(&run).await;

    if let Err(e) = shared.checkpoints.delete(run.id).await {
        tracing::warn!(error = %e, run_id = %run.id, "failed to delete checkpoint");
    }

    metrics.run_finished(run.status);
    shared.finish(run.id);
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MockAdapter, PanickingAdapter};
    use crate::error::FetchError;
    use conductor_store::{MemoryCheckpointStore, MemoryStateStore};

    struct MapFetcher {
        workflows: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl WorkflowFetcher for MapFetcher {
        async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
            self.workflows
                .get(path)
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    path: path.to_string(),
                })
        }
    }

    fn runner_with(adapter: Arc<dyn WorkflowAdapter>, config: RunnerConfig) -> Runner {
        Runner::new(
            adapter,
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryCheckpointStore::new()),
            config,
        )
    }

    async fn wait_for_terminal(runner: &Runner, run_id: RunId) -> Run {
        for _ in 0..200 {
            let run = runner.shared.store.get_run(run_id).await.unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_runs_to_success() {
        let adapter = Arc::new(MockAdapter::succeeding(serde_json::json!({"ok": 1})));
        let runner = runner_with(adapter, RunnerConfig::default());

        let mut inputs = HashMap::new();
        inputs.insert("pr".to_string(), serde_json::json!(7));
        let run = runner
            .submit("w.yaml", b"src", inputs.clone(), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.inputs, inputs);

        let finished = wait_for_terminal(&runner, run.id).await;
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.output, Some(serde_json::json!({"ok": 1})));
    }

    #[tokio::test]
    async fn checkpoint_removed_after_success() {
        let adapter = Arc::new(MockAdapter::succeeding(JsonValue::Null));
        let runner = runner_with(adapter, RunnerConfig::default());

        let run = runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        wait_for_terminal(&runner, run.id).await;

        let checkpoint = runner.shared.checkpoints.load(run.id).await.unwrap();
        assert!(checkpoint.is_none());
    }

    #[tokio::test]
    async fn adapter_failure_marks_run_failed() {
        let adapter = Arc::new(MockAdapter::failing());
        let runner = runner_with(adapter, RunnerConfig::default());

        let run = runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        let finished = wait_for_terminal(&runner, run.id).await;
        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("mock failure"));
    }

    #[tokio::test]
    async fn adapter_panic_is_contained() {
        let adapter = Arc::new(PanickingAdapter);
        let runner = runner_with(adapter, RunnerConfig::default());

        let run = runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        let finished = wait_for_terminal(&runner, run.id).await;
        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn cancel_marks_run_cancelled() {
        let adapter =
            Arc::new(MockAdapter::succeeding(JsonValue::Null).with_step_delay(Duration::from_secs(30)));
        let runner = runner_with(adapter, RunnerConfig::default());

        let run = runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        runner.cancel(run.id).await.unwrap();

        let finished = wait_for_terminal(&runner, run.id).await;
        assert_eq!(finished.status, RunStatus::Cancelled);

        // Cancelling again is a no-op
        runner.cancel(run.id).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_an_error() {
        let adapter = Arc::new(MockAdapter::succeeding(JsonValue::Null));
        let runner = runner_with(adapter, RunnerConfig::default());

        let result = runner.cancel(RunId::new()).await;
        assert!(matches!(result, Err(RunnerError::RunNotFound { .. })));
    }

    #[tokio::test]
    async fn run_timeout_fails_the_run() {
        let adapter =
            Arc::new(MockAdapter::succeeding(JsonValue::Null).with_step_delay(Duration::from_secs(60)));
        let runner = runner_with(adapter, RunnerConfig::default());

        let run = runner
            .submit(
                "w.yaml",
                b"src",
                HashMap::new(),
                SubmitOptions {
                    timeout: Some(Duration::from_millis(50)),
                },
            )
            .await
            .unwrap();
        let finished = wait_for_terminal(&runner, run.id).await;
        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn try_submit_rejects_at_capacity() {
        let adapter =
            Arc::new(MockAdapter::succeeding(JsonValue::Null).with_step_delay(Duration::from_secs(30)));
        let runner = runner_with(
            adapter,
            RunnerConfig {
                max_parallel: 1,
                ..RunnerConfig::default()
            },
        );

        runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();

        let result = runner
            .try_submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await;
        assert!(matches!(result, Err(RunnerError::Capacity)));
    }

    #[tokio::test]
    async fn draining_rejects_new_submits() {
        let adapter = Arc::new(MockAdapter::succeeding(JsonValue::Null));
        let runner = runner_with(adapter, RunnerConfig::default());

        runner.start_draining();
        assert!(runner.is_draining());

        let result = runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await;
        assert!(matches!(result, Err(RunnerError::Draining)));
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight_runs() {
        let adapter = Arc::new(
            MockAdapter::succeeding(JsonValue::Null).with_step_delay(Duration::from_millis(100)),
        );
        let runner = runner_with(
            adapter,
            RunnerConfig {
                max_parallel: 2,
                ..RunnerConfig::default()
            },
        );

        let a = runner
            .submit("a.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        let b = runner
            .submit("b.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();

        runner.start_draining();
        runner.wait_for_drain(Duration::from_secs(10)).await.unwrap();
        assert_eq!(runner.active_run_count(), 0);

        // Both in-flight runs completed rather than being cancelled
        for run_id in [a.id, b.id] {
            let run = runner.shared.store.get_run(run_id).await.unwrap();
            assert_eq!(run.status, RunStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn drain_times_out_with_stragglers() {
        let adapter =
            Arc::new(MockAdapter::succeeding(JsonValue::Null).with_step_delay(Duration::from_secs(30)));
        let runner = runner_with(adapter, RunnerConfig::default());

        runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        runner.start_draining();

        let result = runner.wait_for_drain(Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(RunnerError::DrainTimeout { remaining: 1 })
        ));
    }

    #[tokio::test]
    async fn stop_cancels_stragglers() {
        let adapter =
            Arc::new(MockAdapter::succeeding(JsonValue::Null).with_step_delay(Duration::from_secs(30)));
        let runner = runner_with(adapter, RunnerConfig::default());

        let run = runner
            .submit("w.yaml", b"src", HashMap::new(), SubmitOptions::default())
            .await
            .unwrap();
        runner.stop(Duration::from_secs(5)).await.unwrap();

        let finished = runner.shared.store.get_run(run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn resume_interrupted_continues_from_checkpoint() {
        let store = Arc::new(MemoryStateStore::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let adapter = Arc::new(
            MockAdapter::succeeding(serde_json::json!({"resumed": true}))
                .with_steps(vec!["fetch", "transform", "publish"]),
        );

        // Simulate a run interrupted after its second step
        let run = Run::new("w.yaml", HashMap::new());
        store.create_run(&run).await.unwrap();
        let mut running = run.clone();
        running.status = RunStatus::Running;
        store.update_run(&running).await.unwrap();
        checkpoints
            .save(&Checkpoint {
                run_id: run.id,
                workflow: "w.yaml".to_string(),
                step_id: "transform".to_string(),
                step_index: 1,
                context: HashMap::new(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut workflows = HashMap::new();
        workflows.insert("w.yaml".to_string(), b"src".to_vec());
        let runner = Runner::new(
            adapter,
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            RunnerConfig::default(),
        )
        .with_fetcher(Arc::new(MapFetcher { workflows }));

        let resumed = runner.resume_interrupted().await.unwrap();
        assert_eq!(resumed, 1);

        let finished = wait_for_terminal(&runner, run.id).await;
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.output, Some(serde_json::json!({"resumed": true})));
        assert!(checkpoints.load(run.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_removes_orphaned_checkpoints() {
        let store = Arc::new(MemoryStateStore::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let orphan = RunId::new();
        checkpoints
            .save(&Checkpoint::initial(orphan, "gone.yaml"))
            .await
            .unwrap();

        let runner = Runner::new(
            Arc::new(MockAdapter::succeeding(JsonValue::Null)),
            store,
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            RunnerConfig::default(),
        )
        .with_fetcher(Arc::new(MapFetcher {
            workflows: HashMap::new(),
        }));

        let resumed = runner.resume_interrupted().await.unwrap();
        assert_eq!(resumed, 0);
        assert!(checkpoints.load(orphan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_without_fetcher_is_an_error() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        checkpoints
            .save(&Checkpoint::initial(RunId::new(), "w.yaml"))
            .await
            .unwrap();

        let runner = Runner::new(
            Arc::new(MockAdapter::succeeding(JsonValue::Null)),
            Arc::new(MemoryStateStore::new()),
            checkpoints,
            RunnerConfig::default(),
        );

        let result = runner.resume_interrupted().await;
        assert!(matches!(result, Err(RunnerError::NoFetcher)));
    }
}
