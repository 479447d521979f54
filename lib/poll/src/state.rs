//! Per-trigger poll state.
//!
//! Deduplication is timestamp-first: `last_poll_time` is handed to the
//! integration as the "since" filter on every poll, and `seen_events`
//! catches events the window would otherwise replay. The state row is the
//! authoritative record; it survives restarts and is pruned on every
//! successful poll.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default retention for seen-event ids.
pub const SEEN_EVENTS_TTL_HOURS: i64 = 24;

/// Default cap on the seen-event map.
pub const MAX_SEEN_EVENTS: usize = 10_000;

/// Consecutive errors before the trigger is logged at error level.
pub const ERROR_WARN_THRESHOLD: u32 = 5;

/// Consecutive errors before the circuit breaker pauses the trigger.
pub const ERROR_PAUSE_THRESHOLD: u32 = 10;

/// Health of a poll trigger, derived from its consecutive-error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollHealth {
    /// No recent failures.
    Healthy,
    /// Failing but still polling.
    Degraded,
    /// Circuit breaker tripped; polling stopped until operator reset.
    Paused,
}

/// Authoritative per-trigger poll state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollState {
    /// Unique trigger id, conventionally `<workflow>:<integration>`.
    pub trigger_id: String,
    /// Workflow fired for new events.
    pub workflow: String,
    /// Integration this trigger polls.
    pub integration: String,
    /// Primary dedup: passed to the integration as the "since" filter.
    pub last_poll_time: DateTime<Utc>,
    /// Newest event timestamp observed; may run ahead of `last_poll_time`
    /// when events arrive out of order.
    pub high_water_mark: Option<DateTime<Utc>>,
    /// Secondary dedup: event id to first-seen unix seconds.
    pub seen_events: std::collections::HashMap<String, i64>,
    /// Opaque integration pagination continuation.
    pub cursor: Option<String>,
    /// Last (sanitized) error message.
    pub last_error: Option<String>,
    /// Consecutive-failure counter for the circuit breaker.
    pub error_count: u32,
    /// When the state row was created.
    pub created_at: DateTime<Utc>,
    /// When the state row was last written.
    pub updated_at: DateTime<Utc>,
}

impl PollState {
    /// Creates fresh state with `last_poll_time` seeded to `start`.
    #[must_use]
    pub fn new(
        trigger_id: impl Into<String>,
        workflow: impl Into<String>,
        integration: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            workflow: workflow.into(),
            integration: integration.into(),
            last_poll_time: start,
            high_water_mark: None,
            seen_events: std::collections::HashMap::new(),
            cursor: None,
            last_error: None,
            error_count: 0,
            created_at: start,
            updated_at: start,
        }
    }

    /// Health bucket derived from the error counter.
    #[must_use]
    pub fn health(&self) -> PollHealth {
        if self.error_count >= ERROR_PAUSE_THRESHOLD {
            PollHealth::Paused
        } else if self.error_count > 0 {
            PollHealth::Degraded
        } else {
            PollHealth::Healthy
        }
    }

    /// Records an event id; returns false if it was already known.
    pub fn record_event(&mut self, event_id: &str, now: DateTime<Utc>) -> bool {
        if self.seen_events.contains_key(event_id) {
            return false;
        }
        self.seen_events
            .insert(event_id.to_string(), now.timestamp());
        true
    }

    /// Advances the high-water mark if `timestamp` is newer.
    pub fn advance_high_water_mark(&mut self, timestamp: DateTime<Utc>) {
        match self.high_water_mark {
            Some(mark) if mark >= timestamp => {}
            _ => self.high_water_mark = Some(timestamp),
        }
    }

    /// Prunes `seen_events` by TTL, then by count (oldest first).
    pub fn prune_seen(&mut self, now: DateTime<Utc>, ttl: Duration, max_entries: usize) {
        let cutoff = (now - ttl).timestamp();
        self.seen_events.retain(|_, first_seen| *first_seen > cutoff);

        if self.seen_events.len() > max_entries {
            let mut entries: Vec<(String, i64)> = self.seen_events.drain().collect();
            entries.sort_by_key(|(_, first_seen)| *first_seen);
            let excess = entries.len() - max_entries;
            self.seen_events = entries.into_iter().skip(excess).collect();
        }
    }
}
