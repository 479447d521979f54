//! The controller owns every subsystem and wires them together.
//!
//! No globals: the `Controller` is built from configuration, handed to the
//! HTTP layer behind an `Arc`, and torn down in a fixed order on
//! shutdown. Trigger sources reach the runner only through the
//! run-submission seam.

use crate::config::{Backend, Config};
use crate::error::ApiError;
use crate::metrics::Metrics;
use async_trait::async_trait;
use conductor_auth::KeySet;
use conductor_core::{Clock, RunId, RunSubmitter, SubmitError, SystemClock};
use conductor_poll::{
    pollers_from_env, IntegrationRateLimiter, MemoryPollStateManager, PollStateManager,
    PollTriggerService, SqlitePollStateManager,
};
use conductor_runner::{
    DirectoryFetcher, EchoAdapter, FetchError, Runner, RunnerConfig, RunnerError, SubmitOptions,
    WorkflowFetcher,
};
use conductor_scheduler::{CronExpr, ScheduleEntry, Scheduler};
use conductor_store::{
    FileCheckpointStore, LeaderElector, MemoryCheckpointStore, MemoryStateStore, Run,
    SqliteStateStore, StateStore,
};
use conductor_trigger::{
    CompiledEndpoint, CompiledRoute, Endpoint, RateLimiter, WebhookRoute,
};
use conductor_watcher::{EventFilter, FileWatch, FileWatcherService};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// A fatal error while building or starting the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub reason: String,
}

impl StartupError {
    fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "startup failed: {}", self.reason)
    }
}

impl std::error::Error for StartupError {}

/// Submits runs by fetching workflow source and handing it to the runner.
struct ControllerSubmitter {
    runner: Arc<Runner>,
    fetcher: Arc<dyn WorkflowFetcher>,
}

#[async_trait]
impl RunSubmitter for ControllerSubmitter {
    async fn submit(
        &self,
        workflow: &str,
        inputs: HashMap<String, JsonValue>,
    ) -> Result<RunId, SubmitError> {
        let source = self
            .fetcher
            .fetch(workflow)
            .await
            .map_err(|e| SubmitError::new(e.to_string()))?;
        let run = self
            .runner
            .submit(workflow, &source, inputs, SubmitOptions::default())
            .await
            .map_err(|e| SubmitError::new(e.to_string()))?;
        Ok(run.id)
    }
}

/// The assembled controller.
pub struct Controller {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub store: Arc<dyn StateStore>,
    pub runner: Arc<Runner>,
    pub fetcher: Arc<dyn WorkflowFetcher>,
    pub key_set: KeySet,
    pub rate_limiter: Arc<RateLimiter>,
    pub poll_service: Arc<PollTriggerService>,
    submitter: Arc<dyn RunSubmitter>,
    webhooks: RwLock<HashMap<String, CompiledRoute>>,
    endpoints: RwLock<HashMap<String, CompiledEndpoint>>,
    schedules: Mutex<Vec<ScheduleEntry>>,
    scheduler: Mutex<Arc<Scheduler>>,
    scheduler_active: AtomicBool,
    watches: Mutex<Vec<FileWatch>>,
    watcher: Mutex<Arc<FileWatcherService>>,
    watcher_started: AtomicBool,
    elector: Option<Arc<LeaderElector>>,
}

impl Controller {
    /// Builds every subsystem from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` when a persistence backend cannot be opened.
    pub async fn build(config: Config) -> Result<Arc<Self>, StartupError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Arc::new(Metrics::new());

        let (store, checkpoints, poll_states): (
            Arc<dyn StateStore>,
            Arc<dyn conductor_store::CheckpointStore>,
            Arc<dyn PollStateManager>,
        ) = match config.controller.backend {
            Backend::Memory => (
                Arc::new(MemoryStateStore::new()),
                Arc::new(MemoryCheckpointStore::new()),
                Arc::new(MemoryPollStateManager::new()),
            ),
            Backend::Sqlite => {
                let state_dir = &config.controller.state_dir;
                tokio::fs::create_dir_all(state_dir)
                    .await
                    .map_err(StartupError::new)?;
                let store = SqliteStateStore::connect(&state_dir.join("state.db"))
                    .await
                    .map_err(StartupError::new)?;
                let checkpoints = FileCheckpointStore::open(state_dir.join("checkpoints"))
                    .await
                    .map_err(StartupError::new)?;
                let poll_states = SqlitePollStateManager::connect(&state_dir.join("poll.db"))
                    .await
                    .map_err(StartupError::new)?;
                (Arc::new(store), Arc::new(checkpoints), Arc::new(poll_states))
            }
        };

        let fetcher: Arc<dyn WorkflowFetcher> =
            Arc::new(DirectoryFetcher::new(&config.controller.workflows_dir));
        let runner = Arc::new(
            Runner::new(
                Arc::new(EchoAdapter),
                Arc::clone(&store),
                checkpoints,
                RunnerConfig {
                    max_parallel: config.controller.max_parallel,
                    default_timeout: Duration::from_secs(config.controller.run_timeout_secs),
                },
            )
            .with_fetcher(Arc::clone(&fetcher))
            .with_metrics(Arc::clone(&metrics) as Arc<dyn conductor_runner::RunnerMetrics>),
        );

        let submitter: Arc<dyn RunSubmitter> = Arc::new(ControllerSubmitter {
            runner: Arc::clone(&runner),
            fetcher: Arc::clone(&fetcher),
        });

        let scheduler = Arc::new(
            Scheduler::new(
                config.schedules.clone(),
                Arc::clone(&submitter),
                Arc::clone(&clock),
            )
            .map_err(StartupError::new)?,
        );

        let mut webhooks = HashMap::new();
        for route in &config.webhooks {
            let compiled = CompiledRoute::compile(route.clone(), |var| std::env::var(var).ok())
                .map_err(StartupError::new)?;
            webhooks.insert(route.path.clone(), compiled);
        }

        let mut endpoints = HashMap::new();
        for endpoint in &config.endpoints {
            let compiled =
                CompiledEndpoint::compile(endpoint.clone()).map_err(StartupError::new)?;
            endpoints.insert(endpoint.name.clone(), compiled);
        }

        let watcher = Arc::new(
            FileWatcherService::new(
                config.file_watchers.clone(),
                Arc::clone(&submitter),
                Arc::clone(&clock),
            )
            .map_err(StartupError::new)?,
        );

        let poll_service = Arc::new(PollTriggerService::new(
            pollers_from_env(),
            poll_states,
            Arc::clone(&submitter),
            Arc::new(IntegrationRateLimiter::new(
                Arc::clone(&clock),
                HashMap::new(),
            )),
            Arc::clone(&clock),
        ));

        let elector = match (
            config.distributed.enabled,
            config.distributed.database_url.as_deref(),
        ) {
            (true, Some(database_url)) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(2)
                    .connect_lazy(database_url)
                    .map_err(StartupError::new)?;
                Some(Arc::new(LeaderElector::new(pool)))
            }
            _ => None,
        };

        let key_set = KeySet::new(config.auth.api_keys.clone());
        let controller = Arc::new(Self {
            clock: Arc::clone(&clock),
            metrics,
            store,
            runner,
            fetcher,
            key_set,
            rate_limiter: Arc::new(RateLimiter::new(clock)),
            poll_service,
            submitter,
            webhooks: RwLock::new(webhooks),
            endpoints: RwLock::new(endpoints),
            schedules: Mutex::new(config.schedules.clone()),
            scheduler: Mutex::new(scheduler),
            scheduler_active: AtomicBool::new(false),
            watches: Mutex::new(config.file_watchers.clone()),
            watcher: Mutex::new(watcher),
            watcher_started: AtomicBool::new(false),
            elector,
            config,
        });
        Ok(controller)
    }

    /// Starts the trigger sources: resume, polls, watches, and the
    /// scheduler (leader-gated in distributed mode). Subsystem failures
    /// disable that subsystem with a warning rather than failing startup.
    pub async fn start(self: &Arc<Self>) {
        match self.runner.resume_interrupted().await {
            Ok(0) => {}
            Ok(resumed) => tracing::info!(resumed, "resumed interrupted runs"),
            Err(e) => tracing::warn!(error = %e, "resume of interrupted runs failed"),
        }

        for trigger in &self.config.poll_triggers {
            if let Err(e) = self.poll_service.register(trigger.clone()).await {
                tracing::warn!(
                    trigger_id = %trigger.trigger_id(),
                    error = %e,
                    "poll trigger disabled"
                );
            }
        }

        {
            let watcher = self.watcher.lock().unwrap();
            match watcher.start() {
                Ok(()) => {
                    self.watcher_started.store(true, Ordering::SeqCst);
                }
                Err(e) => tracing::warn!(error = %e, "file watcher disabled"),
            }
        }

        match &self.elector {
            Some(elector) => {
                let weak = Arc::downgrade(self);
                elector.on_leadership_change(move |leader| {
                    if let Some(controller) = weak.upgrade() {
                        controller.on_leadership_change(leader);
                    }
                });
                if let Err(e) = elector.start() {
                    tracing::warn!(error = %e, "leader election disabled, scheduler will not run");
                }
            }
            None => {
                self.scheduler_active.store(true, Ordering::SeqCst);
                self.scheduler.lock().unwrap().start();
            }
        }
    }

    fn on_leadership_change(&self, leader: bool) {
        self.scheduler_active.store(leader, Ordering::SeqCst);
        let scheduler = self.scheduler.lock().unwrap();
        if leader {
            tracing::info!("leadership gained, arming schedules");
            scheduler.start();
        } else {
            tracing::info!("leadership lost, disarming schedules");
            scheduler.stop();
        }
    }

    /// Returns true while this instance would arm schedule timers.
    #[must_use]
    pub fn is_scheduler_leader(&self) -> bool {
        self.scheduler_active.load(Ordering::SeqCst)
    }

    /// Graceful shutdown: drain, cancel stragglers, stop trigger sources,
    /// release leadership.
    pub async fn shutdown(&self) {
        self.runner.start_draining();
        let drain_timeout = Duration::from_secs(self.config.controller.drain_timeout_secs);
        match self.runner.wait_for_drain(drain_timeout).await {
            Ok(()) => tracing::info!("all in-flight runs completed"),
            Err(RunnerError::DrainTimeout { remaining }) => {
                tracing::warn!(unfinished = remaining, "drain timed out, cancelling stragglers");
                if let Err(e) = self.runner.stop(Duration::from_secs(5)).await {
                    tracing::warn!(error = %e, "straggler cancellation did not finish");
                }
            }
            Err(e) => tracing::warn!(error = %e, "drain failed"),
        }

        self.scheduler.lock().unwrap().stop();
        self.poll_service.stop();
        self.watcher.lock().unwrap().stop();
        if let Some(elector) = &self.elector {
            elector.stop().await;
        }
        tracing::info!("controller shut down");
    }

    /// Fetches workflow source and submits a run.
    ///
    /// # Errors
    ///
    /// 404 for an unknown workflow, 503 while draining.
    pub async fn submit_run(
        &self,
        workflow: &str,
        inputs: HashMap<String, JsonValue>,
        timeout: Option<Duration>,
    ) -> Result<Run, ApiError> {
        let source = self.fetcher.fetch(workflow).await.map_err(|e| match e {
            FetchError::NotFound { .. } => ApiError::not_found(e.to_string()),
            other => ApiError::internal(other.to_string()),
        })?;
        let run = self
            .runner
            .submit(workflow, &source, inputs, SubmitOptions { timeout })
            .await?;
        Ok(run)
    }

    // Webhook routes

    /// Looks up the compiled route for a request path.
    #[must_use]
    pub fn lookup_webhook(&self, path: &str) -> Option<CompiledRoute> {
        self.webhooks.read().unwrap().get(path).cloned()
    }

    /// All configured webhook route definitions.
    #[must_use]
    pub fn webhook_routes(&self) -> Vec<WebhookRoute> {
        let mut routes: Vec<WebhookRoute> = self
            .webhooks
            .read()
            .unwrap()
            .values()
            .map(|compiled| compiled.route().clone())
            .collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    /// Registers a webhook route.
    ///
    /// # Errors
    ///
    /// 400 on validation failure, 409 on a duplicate path.
    pub fn add_webhook(&self, route: WebhookRoute) -> Result<(), ApiError> {
        let compiled = CompiledRoute::compile(route.clone(), |var| std::env::var(var).ok())?;
        let mut webhooks = self.webhooks.write().unwrap();
        if webhooks.contains_key(&route.path) {
            return Err(ApiError::conflict(format!(
                "webhook path already registered: {}",
                route.path
            )));
        }
        webhooks.insert(route.path.clone(), compiled);
        tracing::info!(path = %route.path, workflow = %route.workflow, "webhook route added");
        Ok(())
    }

    /// Removes a webhook route by path.
    ///
    /// # Errors
    ///
    /// 404 for an unknown path.
    pub fn remove_webhook(&self, path: &str) -> Result<(), ApiError> {
        let mut webhooks = self.webhooks.write().unwrap();
        if webhooks.remove(path).is_none() {
            return Err(ApiError::not_found(format!("no webhook route at {path}")));
        }
        tracing::info!(path, "webhook route removed");
        Ok(())
    }

    // Endpoints

    /// Looks up a compiled endpoint by name.
    #[must_use]
    pub fn lookup_endpoint(&self, name: &str) -> Option<CompiledEndpoint> {
        self.endpoints.read().unwrap().get(name).cloned()
    }

    /// All configured endpoint definitions.
    #[must_use]
    pub fn endpoint_definitions(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .endpoints
            .read()
            .unwrap()
            .values()
            .map(|compiled| compiled.endpoint().clone())
            .collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        endpoints
    }

    /// Registers an endpoint.
    ///
    /// # Errors
    ///
    /// 400 on validation failure, 409 on a duplicate name.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> Result<(), ApiError> {
        let compiled = CompiledEndpoint::compile(endpoint.clone())?;
        let mut endpoints = self.endpoints.write().unwrap();
        if endpoints.contains_key(&endpoint.name) {
            return Err(ApiError::conflict(format!(
                "endpoint already registered: {}",
                endpoint.name
            )));
        }
        endpoints.insert(endpoint.name.clone(), compiled);
        tracing::info!(name = %endpoint.name, workflow = %endpoint.workflow, "endpoint added");
        Ok(())
    }

    /// Removes an endpoint by name.
    ///
    /// # Errors
    ///
    /// 404 for an unknown name.
    pub fn remove_endpoint(&self, name: &str) -> Result<(), ApiError> {
        let mut endpoints = self.endpoints.write().unwrap();
        if endpoints.remove(name).is_none() {
            return Err(ApiError::not_found(format!("no endpoint named {name}")));
        }
        tracing::info!(name, "endpoint removed");
        Ok(())
    }

    // Schedules

    /// All configured schedule entries.
    #[must_use]
    pub fn schedule_entries(&self) -> Vec<ScheduleEntry> {
        self.schedules.lock().unwrap().clone()
    }

    /// Registers a schedule entry and re-arms the scheduler.
    ///
    /// # Errors
    ///
    /// 400 on an invalid cron expression or timezone, 409 on a duplicate
    /// name.
    pub fn add_schedule(&self, entry: ScheduleEntry) -> Result<(), ApiError> {
        CronExpr::parse(&entry.cron).map_err(|e| ApiError::bad_request(e.to_string()))?;
        if let Some(tz) = entry.timezone.as_deref() {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|_| ApiError::bad_request(format!("invalid timezone: {tz}")))?;
        }

        let mut schedules = self.schedules.lock().unwrap();
        if schedules.iter().any(|existing| existing.name == entry.name) {
            return Err(ApiError::conflict(format!(
                "schedule already registered: {}",
                entry.name
            )));
        }
        schedules.push(entry.clone());
        let entries = schedules.clone();
        drop(schedules);

        self.swap_scheduler(entries)?;
        tracing::info!(name = %entry.name, cron = %entry.cron, "schedule added");
        Ok(())
    }

    /// Removes a schedule entry by name and re-arms the scheduler.
    ///
    /// # Errors
    ///
    /// 404 for an unknown name.
    pub fn remove_schedule(&self, name: &str) -> Result<(), ApiError> {
        let mut schedules = self.schedules.lock().unwrap();
        let before = schedules.len();
        schedules.retain(|entry| entry.name != name);
        if schedules.len() == before {
            return Err(ApiError::not_found(format!("no schedule named {name}")));
        }
        let entries = schedules.clone();
        drop(schedules);

        self.swap_scheduler(entries)?;
        tracing::info!(name, "schedule removed");
        Ok(())
    }

    fn swap_scheduler(&self, entries: Vec<ScheduleEntry>) -> Result<(), ApiError> {
        let replacement = Scheduler::new(
            entries,
            Arc::clone(&self.submitter),
            Arc::clone(&self.clock),
        )
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let mut scheduler = self.scheduler.lock().unwrap();
        scheduler.stop();
        let replacement = Arc::new(replacement);
        if self.scheduler_active.load(Ordering::SeqCst) {
            replacement.start();
        }
        *scheduler = replacement;
        Ok(())
    }

    // File watches

    /// All configured file watches.
    #[must_use]
    pub fn file_watches(&self) -> Vec<FileWatch> {
        self.watches.lock().unwrap().clone()
    }

    /// Registers a file watch and restarts the watch service.
    ///
    /// # Errors
    ///
    /// 400 on validation failure, 409 on a duplicate name.
    pub fn add_file_watch(&self, watch: FileWatch) -> Result<(), ApiError> {
        EventFilter::compile(&watch).map_err(|e| ApiError::bad_request(e.to_string()))?;

        let mut watches = self.watches.lock().unwrap();
        if watches.iter().any(|existing| existing.name == watch.name) {
            return Err(ApiError::conflict(format!(
                "file watch already registered: {}",
                watch.name
            )));
        }
        watches.push(watch.clone());
        let all = watches.clone();
        drop(watches);

        self.swap_watcher(all)?;
        tracing::info!(name = %watch.name, "file watch added");
        Ok(())
    }

    /// Removes a file watch by name and restarts the watch service.
    ///
    /// # Errors
    ///
    /// 404 for an unknown name.
    pub fn remove_file_watch(&self, name: &str) -> Result<(), ApiError> {
        let mut watches = self.watches.lock().unwrap();
        let before = watches.len();
        watches.retain(|watch| watch.name != name);
        if watches.len() == before {
            return Err(ApiError::not_found(format!("no file watch named {name}")));
        }
        let all = watches.clone();
        drop(watches);

        self.swap_watcher(all)?;
        tracing::info!(name, "file watch removed");
        Ok(())
    }

    fn swap_watcher(&self, watches: Vec<FileWatch>) -> Result<(), ApiError> {
        let replacement = FileWatcherService::new(
            watches,
            Arc::clone(&self.submitter),
            Arc::clone(&self.clock),
        )
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let mut watcher = self.watcher.lock().unwrap();
        watcher.stop();
        let replacement = Arc::new(replacement);
        if self.watcher_started.load(Ordering::SeqCst) {
            if let Err(e) = replacement.start() {
                tracing::warn!(error = %e, "file watcher restart failed");
            }
        }
        *watcher = replacement;
        Ok(())
    }
}
