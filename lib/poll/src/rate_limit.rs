//! Adaptive per-integration rate limiting.
//!
//! Each integration has a minimum interval between polls, an optional
//! per-minute request budget, and exponential backoff state driven by 429
//! responses. A poll is allowed only when backoff has expired, the minimum
//! interval has elapsed, and the budget is not exhausted.

use chrono::{DateTime, Duration, Utc};
use conductor_core::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Base backoff after the first 429.
const BACKOFF_BASE_SECS: i64 = 30;

/// Backoff ceiling.
const BACKOFF_MAX_SECS: i64 = 600;

/// Static limits for one integration.
#[derive(Debug, Clone, Copy)]
pub struct IntegrationLimits {
    /// Minimum spacing between polls.
    pub min_interval: std::time::Duration,
    /// Optional request budget per minute.
    pub per_minute_budget: Option<u32>,
}

impl Default for IntegrationLimits {
    fn default() -> Self {
        Self {
            min_interval: std::time::Duration::from_secs(1),
            per_minute_budget: None,
        }
    }
}

#[derive(Debug, Default)]
struct IntegrationState {
    last_poll: Option<DateTime<Utc>>,
    window_start: Option<DateTime<Utc>>,
    window_count: u32,
    backoff_count: u32,
    backoff_until: Option<DateTime<Utc>>,
}

/// Rate limiter shared by all poll triggers of an integration.
pub struct IntegrationRateLimiter {
    clock: Arc<dyn Clock>,
    limits: HashMap<String, IntegrationLimits>,
    default_limits: IntegrationLimits,
    states: Mutex<HashMap<String, IntegrationState>>,
}

impl IntegrationRateLimiter {
    /// Creates a limiter with per-integration overrides.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, limits: HashMap<String, IntegrationLimits>) -> Self {
        Self {
            clock,
            limits,
            default_limits: IntegrationLimits::default(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn limits_for(&self, integration: &str) -> IntegrationLimits {
        self.limits
            .get(integration)
            .copied()
            .unwrap_or(self.default_limits)
    }

    /// Returns `Ok(())` if a poll may proceed now (and accounts for it),
    /// or the duration to wait.
    pub fn allow(&self, integration: &str) -> Result<(), std::time::Duration> {
        let now = self.clock.now();
        let limits = self.limits_for(integration);
        let mut states = self.states.lock().unwrap();
        let state = states.entry(integration.to_string()).or_default();

        if let Some(until) = state.backoff_until {
            if now < until {
                return Err((until - now).to_std().unwrap_or_default());
            }
        }

        if let Some(last) = state.last_poll {
            let min_interval = Duration::from_std(limits.min_interval).unwrap_or_default();
            let next_allowed = last + min_interval;
            if now < next_allowed {
                return Err((next_allowed - now).to_std().unwrap_or_default());
            }
        }

        if let Some(budget) = limits.per_minute_budget {
            match state.window_start {
                Some(started) if now - started < Duration::seconds(60) => {
                    if state.window_count >= budget {
                        let wait = started + Duration::seconds(60) - now;
                        return Err(wait.to_std().unwrap_or_default());
                    }
                }
                _ => {
                    state.window_start = Some(now);
                    state.window_count = 0;
                }
            }
            state.window_count += 1;
        }

        state.last_poll = Some(now);
        Ok(())
    }

    /// Blocks until `allow` succeeds or the token is cancelled. Returns
    /// false on cancellation.
    pub async fn wait_if_needed(&self, integration: &str, cancel: &CancellationToken) -> bool {
        loop {
            match self.allow(integration) {
                Ok(()) => return true,
                Err(wait) => {
                    tokio::select! {
                        () = cancel.cancelled() => return false,
                        () = tokio::time::sleep(wait.max(std::time::Duration::from_millis(10))) => {}
                    }
                }
            }
        }
    }

    /// Records a successful poll, clearing any backoff.
    pub fn record_success(&self, integration: &str) {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(integration.to_string()).or_default();
        state.backoff_count = 0;
        state.backoff_until = None;
    }

    /// Records a 429 from the integration. Backoff doubles per consecutive
    /// hit, capped at ten minutes, or follows a larger `Retry-After`.
    pub fn record_rate_limited(&self, integration: &str, retry_after: Option<std::time::Duration>) {
        let now = self.clock.now();
        let mut states = self.states.lock().unwrap();
        let state = states.entry(integration.to_string()).or_default();

        state.backoff_count += 1;
        let exponential =
            (BACKOFF_BASE_SECS << (state.backoff_count - 1).min(31)).min(BACKOFF_MAX_SECS);
        let retry_after_secs = retry_after.map_or(0, |d| d.as_secs() as i64);
        let backoff_secs = exponential.max(retry_after_secs);
        state.backoff_until = Some(now + Duration::seconds(backoff_secs));
        tracing::warn!(
            integration,
            backoff_secs,
            consecutive = state.backoff_count,
            "integration rate limited, backing off"
        );
    }

    /// Current backoff deadline, if any. Observability only.
    #[must_use]
    pub fn backoff_until(&self, integration: &str) -> Option<DateTime<Utc>> {
        self.states
            .lock()
            .unwrap()
            .get(integration)
            .and_then(|s| s.backoff_until)
    }
}
