//! The poll-trigger service.
//!
//! For every registered trigger the service runs a jittered timer loop:
//! wait for the integration's rate limiter, poll, deduplicate returned
//! events against persistent state, fire the workflow once per new event,
//! and persist the advanced state. Consecutive failures degrade the
//! trigger and eventually trip the circuit breaker, which pauses polling
//! until an operator reset.

use crate::error::PollError;
use crate::manager::PollStateManager;
use crate::poller::{IntegrationPoller, PollQuery};
use crate::rate_limit::IntegrationRateLimiter;
use crate::sanitize::{redact_error, strip_sensitive_fields};
use crate::state::{
    PollHealth, PollState, ERROR_PAUSE_THRESHOLD, ERROR_WARN_THRESHOLD, MAX_SEEN_EVENTS,
    SEEN_EVENTS_TTL_HOURS,
};
use crate::validate::validate_query;
use chrono::{DateTime, Utc};
use conductor_core::{Clock, RunSubmitter};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Floor on poll intervals regardless of configuration.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default per-invocation poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

fn default_interval_secs() -> u64 {
    60
}

/// How a trigger seeds `last_poll_time` when it has no persisted state.
/// A persisted position always wins over the configured mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum StartMode {
    /// Start from now; historical events are not replayed.
    #[default]
    IgnoreHistorical,
    /// Resume from the persisted position (same as the default when no
    /// state exists).
    SinceLast,
    /// Start from `duration_secs` in the past.
    Backfill { duration_secs: u64 },
}

/// A poll trigger registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollTrigger {
    /// Workflow fired for each new event.
    pub workflow: String,
    /// Integration to poll.
    pub integration: String,
    /// Poll interval in seconds; clamped to [`MIN_POLL_INTERVAL`].
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Integration-specific query parameters. Validated at registration.
    #[serde(default)]
    pub query: PollQuery,
    /// Startup seeding behavior.
    #[serde(default)]
    pub start: StartMode,
}

impl PollTrigger {
    /// The trigger's unique id.
    #[must_use]
    pub fn trigger_id(&self) -> String {
        format!("{}:{}", self.workflow, self.integration)
    }
}

/// Externally-visible trigger status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollTriggerStatus {
    pub trigger_id: String,
    pub workflow: String,
    pub integration: String,
    pub health: PollHealth,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_poll_time: Option<DateTime<Utc>>,
}

struct TriggerEntry {
    config: PollTrigger,
    token: CancellationToken,
    paused: bool,
}

struct ServiceInner {
    pollers: HashMap<String, Arc<dyn IntegrationPoller>>,
    states: Arc<dyn PollStateManager>,
    submitter: Arc<dyn RunSubmitter>,
    limiter: Arc<IntegrationRateLimiter>,
    clock: Arc<dyn Clock>,
    poll_timeout: Duration,
    triggers: Mutex<HashMap<String, TriggerEntry>>,
}

/// What a completed poll cycle asks the timer loop to do next.
enum CycleOutcome {
    Continue,
    Pause,
    Cancelled,
}

/// Periodically polls registered integrations and fires workflows for new
/// events.
pub struct PollTriggerService {
    inner: Arc<ServiceInner>,
}

impl PollTriggerService {
    /// Creates the service over a set of integration pollers.
    #[must_use]
    pub fn new(
        pollers: Vec<Arc<dyn IntegrationPoller>>,
        states: Arc<dyn PollStateManager>,
        submitter: Arc<dyn RunSubmitter>,
        limiter: Arc<IntegrationRateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pollers = pollers
            .into_iter()
            .map(|poller| (poller.name().to_string(), poller))
            .collect();
        Self {
            inner: Arc::new(ServiceInner {
                pollers,
                states,
                submitter,
                limiter,
                clock,
                poll_timeout: DEFAULT_POLL_TIMEOUT,
                triggers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a trigger and starts its timer, unless persisted state
    /// shows its circuit breaker already tripped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` before any poll is issued, `UnknownIntegration`
    /// for an unconfigured poller, or `TriggerExists` on a duplicate id.
    pub async fn register(&self, config: PollTrigger) -> Result<String, PollError> {
        validate_query(&config.query)?;
        if !self.inner.pollers.contains_key(&config.integration) {
            return Err(PollError::UnknownIntegration {
                integration: config.integration.clone(),
            });
        }

        let trigger_id = config.trigger_id();
        if self.inner.triggers.lock().unwrap().contains_key(&trigger_id) {
            return Err(PollError::TriggerExists { trigger_id });
        }

        let state = load_or_seed(&self.inner, &trigger_id, &config).await?;
        let paused = state.error_count >= ERROR_PAUSE_THRESHOLD;
        let token = CancellationToken::new();

        if paused {
            tracing::warn!(
                trigger_id = %trigger_id,
                error_count = state.error_count,
                "poll trigger registered paused; operator reset required"
            );
        } else {
            spawn_trigger_loop(&self.inner, trigger_id.clone(), config.clone(), token.clone());
        }

        let mut triggers = self.inner.triggers.lock().unwrap();
        // Re-check: a concurrent register may have won while state loaded
        if triggers.contains_key(&trigger_id) {
            token.cancel();
            return Err(PollError::TriggerExists { trigger_id });
        }
        triggers.insert(
            trigger_id.clone(),
            TriggerEntry {
                config,
                token,
                paused,
            },
        );
        Ok(trigger_id)
    }

    /// Unregisters a trigger, stopping its timer. Persisted state remains
    /// so a later registration resumes where this one left off.
    ///
    /// # Errors
    ///
    /// Returns `TriggerNotFound` for an unknown id.
    pub fn unregister(&self, trigger_id: &str) -> Result<(), PollError> {
        let mut triggers = self.inner.triggers.lock().unwrap();
        let entry = triggers
            .remove(trigger_id)
            .ok_or_else(|| PollError::TriggerNotFound {
                trigger_id: trigger_id.to_string(),
            })?;
        entry.token.cancel();
        Ok(())
    }

    /// Operator reset: clears persisted state and restarts polling from a
    /// fresh seed.
    ///
    /// # Errors
    ///
    /// Returns `TriggerNotFound` for an unknown id.
    pub async fn reset(&self, trigger_id: &str) -> Result<(), PollError> {
        let config = {
            let triggers = self.inner.triggers.lock().unwrap();
            let entry = triggers
                .get(trigger_id)
                .ok_or_else(|| PollError::TriggerNotFound {
                    trigger_id: trigger_id.to_string(),
                })?;
            entry.token.cancel();
            entry.config.clone()
        };

        self.inner.states.delete(trigger_id).await?;
        load_or_seed(&self.inner, trigger_id, &config).await?;

        let token = CancellationToken::new();
        spawn_trigger_loop(
            &self.inner,
            trigger_id.to_string(),
            config.clone(),
            token.clone(),
        );
        let mut triggers = self.inner.triggers.lock().unwrap();
        triggers.insert(
            trigger_id.to_string(),
            TriggerEntry {
                config,
                token,
                paused: false,
            },
        );
        tracing::info!(trigger_id, "poll trigger reset, polling resumed");
        Ok(())
    }

    /// Runs one poll cycle immediately, outside the timer.
    ///
    /// # Errors
    ///
    /// Returns `TriggerNotFound`, `TriggerPaused`, or a state-persistence
    /// failure. Integration failures are absorbed into the trigger's error
    /// count, not returned.
    pub async fn poll_now(&self, trigger_id: &str) -> Result<usize, PollError> {
        let (config, token, paused) = {
            let triggers = self.inner.triggers.lock().unwrap();
            let entry = triggers
                .get(trigger_id)
                .ok_or_else(|| PollError::TriggerNotFound {
                    trigger_id: trigger_id.to_string(),
                })?;
            (entry.config.clone(), entry.token.clone(), entry.paused)
        };
        if paused {
            return Err(PollError::TriggerPaused {
                trigger_id: trigger_id.to_string(),
            });
        }

        let (outcome, fired) = poll_cycle(&self.inner, trigger_id, &config, &token).await?;
        if matches!(outcome, CycleOutcome::Pause) {
            self.mark_paused(trigger_id);
        }
        Ok(fired)
    }

    fn mark_paused(&self, trigger_id: &str) {
        let mut triggers = self.inner.triggers.lock().unwrap();
        if let Some(entry) = triggers.get_mut(trigger_id) {
            entry.paused = true;
            entry.token.cancel();
        }
    }

    /// Status of every registered trigger.
    pub async fn status(&self) -> Vec<PollTriggerStatus> {
        let snapshot: Vec<(String, PollTrigger, bool)> = {
            let triggers = self.inner.triggers.lock().unwrap();
            triggers
                .iter()
                .map(|(id, entry)| (id.clone(), entry.config.clone(), entry.paused))
                .collect()
        };

        let mut statuses = Vec::with_capacity(snapshot.len());
        for (trigger_id, config, paused) in snapshot {
            let state = self.inner.states.load(&trigger_id).await.ok().flatten();
            let (health, error_count, last_error, last_poll_time) = match &state {
                Some(state) => (
                    if paused { PollHealth::Paused } else { state.health() },
                    state.error_count,
                    state.last_error.clone(),
                    Some(state.last_poll_time),
                ),
                None => (PollHealth::Healthy, 0, None, None),
            };
            statuses.push(PollTriggerStatus {
                trigger_id,
                workflow: config.workflow,
                integration: config.integration,
                health,
                error_count,
                last_error,
                last_poll_time,
            });
        }
        statuses.sort_by(|a, b| a.trigger_id.cmp(&b.trigger_id));
        statuses
    }

    /// Stops every trigger timer.
    pub fn stop(&self) {
        let triggers = self.inner.triggers.lock().unwrap();
        for entry in triggers.values() {
            entry.token.cancel();
        }
        tracing::info!(triggers = triggers.len(), "poll service stopped");
    }
}

impl Drop for PollTriggerService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Loads persisted state, or seeds fresh state per the start mode.
async fn load_or_seed(
    inner: &ServiceInner,
    trigger_id: &str,
    config: &PollTrigger,
) -> Result<PollState, PollError> {
    if let Some(state) = inner.states.load(trigger_id).await? {
        return Ok(state);
    }
    let now = inner.clock.now();
    let start = match config.start {
        StartMode::IgnoreHistorical | StartMode::SinceLast => now,
        StartMode::Backfill { duration_secs } => {
            now - chrono::Duration::seconds(duration_secs as i64)
        }
    };
    let state = PollState::new(trigger_id, &config.workflow, &config.integration, start);
    inner.states.save(&state).await?;
    Ok(state)
}

fn spawn_trigger_loop(
    inner: &Arc<ServiceInner>,
    trigger_id: String,
    config: PollTrigger,
    token: CancellationToken,
) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        trigger_loop(inner, trigger_id, config, token).await;
    });
}

async fn trigger_loop(
    inner: Arc<ServiceInner>,
    trigger_id: String,
    config: PollTrigger,
    token: CancellationToken,
) {
    let base = Duration::from_secs(config.interval_secs).max(MIN_POLL_INTERVAL);
    loop {
        // +-10% jitter to avoid thundering herds across triggers
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        let interval = Duration::from_secs_f64(base.as_secs_f64() * factor);
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        match poll_cycle(&inner, &trigger_id, &config, &token).await {
            Ok((CycleOutcome::Continue, _)) => {}
            Ok((CycleOutcome::Pause, _)) => {
                let mut triggers = inner.triggers.lock().unwrap();
                if let Some(entry) = triggers.get_mut(&trigger_id) {
                    entry.paused = true;
                }
                return;
            }
            Ok((CycleOutcome::Cancelled, _)) => return,
            Err(e) => {
                tracing::warn!(trigger_id = %trigger_id, error = %e, "poll cycle could not persist state");
            }
        }
    }
}

fn event_id(event: &JsonValue) -> Option<String> {
    match event.get("id") {
        Some(JsonValue::String(id)) => Some(id.clone()),
        Some(JsonValue::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

/// Fields tried, in order, for an event timestamp.
const TIMESTAMP_FIELDS: &[&str] = &["created_at", "timestamp", "updated_at", "time"];

fn event_timestamp(event: &JsonValue) -> Option<DateTime<Utc>> {
    for field in TIMESTAMP_FIELDS {
        if let Some(text) = event.get(*field).and_then(JsonValue::as_str) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
        }
    }
    None
}

/// One full poll cycle: rate limit, poll, dedup, fire, persist.
///
/// Only state-persistence failures surface as errors; integration failures
/// feed the circuit breaker.
async fn poll_cycle(
    inner: &Arc<ServiceInner>,
    trigger_id: &str,
    config: &PollTrigger,
    cancel: &CancellationToken,
) -> Result<(CycleOutcome, usize), PollError> {
    let poller = inner
        .pollers
        .get(&config.integration)
        .cloned()
        .ok_or_else(|| PollError::UnknownIntegration {
            integration: config.integration.clone(),
        })?;

    let poll_time = inner.clock.now();
    let attempt = tokio::time::timeout(inner.poll_timeout, async {
        if !inner
            .limiter
            .wait_if_needed(&config.integration, cancel)
            .await
        {
            return None;
        }
        let state = match load_or_seed(inner, trigger_id, config).await {
            Ok(state) => state,
            Err(e) => return Some(Err(e)),
        };
        let result = poller.poll(&state, &config.query).await;
        Some(Ok((state, result)))
    })
    .await;

    let (mut state, result) = match attempt {
        Err(_elapsed) => {
            let state = load_or_seed(inner, trigger_id, config).await?;
            (
                state,
                Err(PollError::Timeout {
                    secs: inner.poll_timeout.as_secs(),
                }),
            )
        }
        Ok(None) => return Ok((CycleOutcome::Cancelled, 0)),
        Ok(Some(Err(e))) => return Err(e),
        Ok(Some(Ok((state, result)))) => (state, result),
    };

    match result {
        Err(e) => {
            if let PollError::RateLimitedByIntegration { retry_after_secs } = &e {
                inner.limiter.record_rate_limited(
                    &config.integration,
                    retry_after_secs.map(Duration::from_secs),
                );
            }
            if matches!(e, PollError::AuthFailed { .. }) {
                tracing::error!(
                    trigger_id,
                    integration = %config.integration,
                    error = %e,
                    "integration credentials rejected"
                );
            }

            state.error_count += 1;
            state.last_error = Some(redact_error(&e.to_string()));
            state.updated_at = inner.clock.now();
            inner.states.save(&state).await?;

            if state.error_count >= ERROR_PAUSE_THRESHOLD {
                tracing::error!(
                    trigger_id,
                    integration = %config.integration,
                    error_count = state.error_count,
                    "circuit breaker tripped, pausing poll trigger"
                );
                return Ok((CycleOutcome::Pause, 0));
            }
            if state.error_count >= ERROR_WARN_THRESHOLD {
                tracing::error!(
                    trigger_id,
                    integration = %config.integration,
                    error_count = state.error_count,
                    last_error = state.last_error.as_deref().unwrap_or(""),
                    "poll trigger degraded"
                );
            }
            Ok((CycleOutcome::Continue, 0))
        }
        Ok(outcome) => {
            inner.limiter.record_success(&config.integration);
            state.error_count = 0;
            state.last_error = None;

            let mut fired = 0;
            for event in &outcome.events {
                let Some(id) = event_id(event) else {
                    tracing::debug!(trigger_id, "skipping event without id");
                    continue;
                };
                if !state.record_event(&id, inner.clock.now()) {
                    continue;
                }
                if let Some(timestamp) = event_timestamp(event) {
                    state.advance_high_water_mark(timestamp);
                }

                let mut sanitized = event.clone();
                strip_sensitive_fields(&mut sanitized, &config.integration);
                let mut inputs = HashMap::new();
                inputs.insert("event".to_string(), sanitized);
                inputs.insert("_source".to_string(), JsonValue::String("poll".to_string()));
                inputs.insert(
                    "_integration".to_string(),
                    JsonValue::String(config.integration.clone()),
                );
                inputs.insert(
                    "_trigger".to_string(),
                    JsonValue::String(trigger_id.to_string()),
                );

                match inner.submitter.submit(&config.workflow, inputs).await {
                    Ok(run_id) => {
                        fired += 1;
                        tracing::info!(
                            trigger_id,
                            event_id = %id,
                            run_id = %run_id,
                            "poll event fired workflow"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            trigger_id,
                            event_id = %id,
                            error = %e,
                            "workflow fire failed, continuing with remaining events"
                        );
                    }
                }
            }

            let now = inner.clock.now();
            state.last_poll_time = poll_time;
            state.cursor = outcome.cursor;
            state.updated_at = now;
            state.prune_seen(
                now,
                chrono::Duration::hours(SEEN_EVENTS_TTL_HOURS),
                MAX_SEEN_EVENTS,
            );
            inner.states.save(&state).await?;
            Ok((CycleOutcome::Continue, fired))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MemoryPollStateManager;
    use crate::poller::testing::ScriptedPoller;
    use crate::poller::PollOutcome;
    use crate::rate_limit::IntegrationLimits;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use conductor_core::{ManualClock, RunId, SubmitError};

    struct RecordingSubmitter {
        calls: Mutex<Vec<(String, HashMap<String, JsonValue>)>>,
        fail_first: Mutex<u32>,
    }

    impl RecordingSubmitter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
            })
        }

        fn failing_first(n: u32) -> Arc<Self> {
            let submitter = Self::new();
            *submitter.fail_first.lock().unwrap() = n;
            submitter
        }

        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RunSubmitter for RecordingSubmitter {
        async fn submit(
            &self,
            workflow: &str,
            inputs: HashMap<String, JsonValue>,
        ) -> Result<RunId, SubmitError> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(SubmitError::new("runner unavailable"));
            }
            drop(fail);
            self.calls
                .lock()
                .unwrap()
                .push((workflow.to_string(), inputs));
            Ok(RunId::new())
        }
    }

    struct Fixture {
        service: PollTriggerService,
        submitter: Arc<RecordingSubmitter>,
        states: Arc<MemoryPollStateManager>,
        poller: Arc<ScriptedPoller>,
        clock: Arc<ManualClock>,
    }

    fn fixture(script: Vec<Result<PollOutcome, PollError>>) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let states = Arc::new(MemoryPollStateManager::new());
        let submitter = RecordingSubmitter::new();
        let poller = Arc::new(ScriptedPoller::new("pagerduty", script));
        let service = build_service(&clock, &states, &submitter, &poller);
        Fixture {
            service,
            submitter,
            states,
            poller,
            clock,
        }
    }

    fn build_service(
        clock: &Arc<ManualClock>,
        states: &Arc<MemoryPollStateManager>,
        submitter: &Arc<RecordingSubmitter>,
        poller: &Arc<ScriptedPoller>,
    ) -> PollTriggerService {
        let mut limits = HashMap::new();
        limits.insert(
            "pagerduty".to_string(),
            IntegrationLimits {
                min_interval: Duration::from_millis(0),
                per_minute_budget: None,
            },
        );
        let limiter = Arc::new(IntegrationRateLimiter::new(
            Arc::clone(clock) as Arc<dyn Clock>,
            limits,
        ));
        PollTriggerService::new(
            vec![Arc::clone(poller) as Arc<dyn IntegrationPoller>],
            Arc::clone(states) as Arc<dyn PollStateManager>,
            Arc::clone(submitter) as Arc<dyn RunSubmitter>,
            limiter,
            Arc::clone(clock) as Arc<dyn Clock>,
        )
    }

    fn trigger() -> PollTrigger {
        PollTrigger {
            workflow: "oncall.yaml".to_string(),
            integration: "pagerduty".to_string(),
            interval_secs: 86_400, // the timer never fires during tests
            query: PollQuery::new(),
            start: StartMode::default(),
        }
    }

    #[tokio::test]
    async fn register_rejects_injection_queries_before_polling() {
        let f = fixture(vec![]);
        let mut config = trigger();
        config.query.insert(
            "assignee".to_string(),
            serde_json::json!("alice; DROP TABLE x"),
        );

        let result = f.service.register(config).await;
        assert!(matches!(result, Err(PollError::InvalidQuery { .. })));
        assert_eq!(f.poller.poll_count(), 0);
        assert!(f.service.status().await.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_unknown_integration() {
        let f = fixture(vec![]);
        let mut config = trigger();
        config.integration = "github".to_string();

        let result = f.service.register(config).await;
        assert!(matches!(result, Err(PollError::UnknownIntegration { .. })));
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let f = fixture(vec![]);
        f.service.register(trigger()).await.unwrap();
        let result = f.service.register(trigger()).await;
        assert!(matches!(result, Err(PollError::TriggerExists { .. })));
    }

    #[tokio::test]
    async fn new_events_fire_once_each() {
        let f = fixture(vec![
            Ok(ScriptedPoller::events(&["e1", "e2"])),
            Ok(ScriptedPoller::events(&["e1", "e2", "e3"])),
        ]);
        let id = f.service.register(trigger()).await.unwrap();

        let fired = f.service.poll_now(&id).await.unwrap();
        assert_eq!(fired, 2);

        // The repeated events are deduplicated; only e3 fires
        let fired = f.service.poll_now(&id).await.unwrap();
        assert_eq!(fired, 1);
        assert_eq!(f.submitter.count(), 3);
    }

    #[tokio::test]
    async fn dedup_survives_restart() {
        let states = Arc::new(MemoryPollStateManager::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));

        // First controller lifetime: two events fire
        let submitter = RecordingSubmitter::new();
        let poller = Arc::new(ScriptedPoller::new(
            "pagerduty",
            vec![Ok(ScriptedPoller::events(&["e1", "e2"]))],
        ));
        let service = build_service(&clock, &states, &submitter, &poller);
        let mut config = trigger();
        config.start = StartMode::SinceLast;
        let id = service.register(config.clone()).await.unwrap();
        assert_eq!(service.poll_now(&id).await.unwrap(), 2);
        drop(service);

        // Restart: same state manager, new service; only e3 is new
        let submitter2 = RecordingSubmitter::new();
        let poller2 = Arc::new(ScriptedPoller::new(
            "pagerduty",
            vec![Ok(ScriptedPoller::events(&["e1", "e2", "e3"]))],
        ));
        let service2 = build_service(&clock, &states, &submitter2, &poller2);
        let id2 = service2.register(config).await.unwrap();
        assert_eq!(service2.poll_now(&id2).await.unwrap(), 1);
        assert_eq!(submitter2.count(), 1);
    }

    #[tokio::test]
    async fn error_count_resets_on_success() {
        let f = fixture(vec![
            Err(PollError::Transient {
                reason: "503".to_string(),
            }),
            Err(PollError::Transient {
                reason: "503".to_string(),
            }),
            Ok(ScriptedPoller::events(&["e1"])),
        ]);
        let id = f.service.register(trigger()).await.unwrap();

        f.service.poll_now(&id).await.unwrap();
        f.service.poll_now(&id).await.unwrap();
        let state = f.states.load(&id).await.unwrap().unwrap();
        assert_eq!(state.error_count, 2);
        assert!(state.last_error.is_some());

        f.service.poll_now(&id).await.unwrap();
        let state = f.states.load(&id).await.unwrap().unwrap();
        assert_eq!(state.error_count, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.health(), PollHealth::Healthy);
    }

    #[tokio::test]
    async fn circuit_breaker_pauses_after_ten_failures() {
        let f = fixture(vec![Err(PollError::Transient {
            reason: "500".to_string(),
        })]);
        let id = f.service.register(trigger()).await.unwrap();

        for _ in 0..10 {
            f.service.poll_now(&id).await.unwrap();
        }

        let statuses = f.service.status().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].health, PollHealth::Paused);
        assert_eq!(statuses[0].error_count, 10);

        // Paused triggers refuse to poll
        let result = f.service.poll_now(&id).await;
        assert!(matches!(result, Err(PollError::TriggerPaused { .. })));
        assert_eq!(f.poller.poll_count(), 10);
    }

    #[tokio::test]
    async fn reset_resumes_a_paused_trigger() {
        // Ten failures trip the breaker, then polls succeed
        let mut script: Vec<Result<PollOutcome, PollError>> = (0..10)
            .map(|_| {
                Err(PollError::Transient {
                    reason: "500".to_string(),
                })
            })
            .collect();
        script.push(Ok(ScriptedPoller::events(&["e1"])));
        let f = fixture(script);
        let id = f.service.register(trigger()).await.unwrap();

        for _ in 0..10 {
            f.service.poll_now(&id).await.unwrap();
        }
        assert!(matches!(
            f.service.poll_now(&id).await,
            Err(PollError::TriggerPaused { .. })
        ));

        f.service.reset(&id).await.unwrap();
        let statuses = f.service.status().await;
        assert_eq!(statuses[0].health, PollHealth::Healthy);
        assert_eq!(statuses[0].error_count, 0);

        assert_eq!(f.service.poll_now(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn registration_with_paused_state_stays_paused() {
        let states = Arc::new(MemoryPollStateManager::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let config = trigger();

        // Persisted state with a tripped breaker
        let mut state = PollState::new(config.trigger_id(), &config.workflow, "pagerduty", clock.now());
        state.error_count = ERROR_PAUSE_THRESHOLD;
        states.save(&state).await.unwrap();

        let submitter = RecordingSubmitter::new();
        let poller = Arc::new(ScriptedPoller::new("pagerduty", vec![]));
        let service = build_service(&clock, &states, &submitter, &poller);
        let id = service.register(config).await.unwrap();

        assert!(matches!(
            service.poll_now(&id).await,
            Err(PollError::TriggerPaused { .. })
        ));
        assert_eq!(service.status().await[0].health, PollHealth::Paused);
    }

    #[tokio::test]
    async fn events_without_ids_are_skipped() {
        let f = fixture(vec![Ok(PollOutcome {
            events: vec![
                serde_json::json!({"title": "no id"}),
                serde_json::json!({"id": "e1", "title": "has id"}),
            ],
            cursor: None,
        })]);
        let id = f.service.register(trigger()).await.unwrap();

        assert_eq!(f.service.poll_now(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn event_timestamps_advance_high_water_mark() {
        let f = fixture(vec![Ok(PollOutcome {
            events: vec![
                serde_json::json!({"id": "e1", "created_at": "2024-06-01T12:10:00Z"}),
                serde_json::json!({"id": "e2", "created_at": "2024-06-01T12:05:00Z"}),
            ],
            cursor: Some("page-2".to_string()),
        })]);
        let id = f.service.register(trigger()).await.unwrap();
        f.service.poll_now(&id).await.unwrap();

        let state = f.states.load(&id).await.unwrap().unwrap();
        assert_eq!(
            state.high_water_mark,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 10, 0).unwrap())
        );
        assert_eq!(state.cursor, Some("page-2".to_string()));
        assert_eq!(state.last_poll_time, f.clock.now());
    }

    #[tokio::test]
    async fn sensitive_fields_are_stripped_before_firing() {
        let f = fixture(vec![Ok(PollOutcome {
            events: vec![serde_json::json!({
                "id": "e1",
                "title": "incident",
                "api_key": "secret",
                "details": {"auth_token": "secret"}
            })],
            cursor: None,
        })]);
        let id = f.service.register(trigger()).await.unwrap();
        f.service.poll_now(&id).await.unwrap();

        let calls = f.submitter.calls.lock().unwrap();
        let event = &calls[0].1["event"];
        assert!(event.get("api_key").is_none());
        assert!(event["details"].get("auth_token").is_none());
        assert_eq!(event["title"], "incident");
        assert_eq!(calls[0].1["_source"], "poll");
        assert_eq!(calls[0].1["_integration"], "pagerduty");
    }

    #[tokio::test]
    async fn fire_failures_do_not_abort_the_cycle() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let states = Arc::new(MemoryPollStateManager::new());
        let submitter = RecordingSubmitter::failing_first(1);
        let poller = Arc::new(ScriptedPoller::new(
            "pagerduty",
            vec![Ok(ScriptedPoller::events(&["e1", "e2", "e3"]))],
        ));
        let service = build_service(&clock, &states, &submitter, &poller);
        let id = service.register(trigger()).await.unwrap();

        // e1's fire fails; e2 and e3 still fire
        assert_eq!(service.poll_now(&id).await.unwrap(), 2);

        // All three are recorded as seen, so nothing re-fires
        let state = states.load(&id).await.unwrap().unwrap();
        assert_eq!(state.seen_events.len(), 3);
    }

    #[tokio::test]
    async fn backfill_seeds_last_poll_time_into_the_past() {
        let f = fixture(vec![Ok(PollOutcome::default())]);
        let mut config = trigger();
        config.workflow = "backfill.yaml".to_string();
        config.start = StartMode::Backfill {
            duration_secs: 3600,
        };

        let id = f.service.register(config).await.unwrap();
        let state = f.states.load(&id).await.unwrap().unwrap();
        assert_eq!(state.last_poll_time, f.clock.now() - chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn unregister_keeps_persisted_state() {
        let f = fixture(vec![Ok(ScriptedPoller::events(&["e1"]))]);
        let id = f.service.register(trigger()).await.unwrap();
        f.service.poll_now(&id).await.unwrap();

        f.service.unregister(&id).unwrap();
        assert!(f.service.status().await.is_empty());
        assert!(f.states.load(&id).await.unwrap().is_some());

        assert!(matches!(
            f.service.unregister(&id),
            Err(PollError::TriggerNotFound { .. })
        ));
    }
}
