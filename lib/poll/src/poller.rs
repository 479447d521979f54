//! The pluggable integration-poller seam.
//!
//! A poller knows how to ask one third-party service for events since a
//! given time. Implementations are registered at startup based on which
//! credentials the environment provides; the poll service treats the set
//! polymorphically.

use crate::error::PollError;
use crate::state::PollState;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Trigger query parameters, validated before registration.
pub type PollQuery = HashMap<String, JsonValue>;

/// The result of one poll invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    /// Events returned by the integration. Each should carry an `id`
    /// field; events without one are skipped by the service.
    pub events: Vec<JsonValue>,
    /// Pagination continuation to persist for the next poll.
    pub cursor: Option<String>,
}

/// Polls one third-party integration for events.
#[async_trait]
pub trait IntegrationPoller: Send + Sync {
    /// The integration's name, e.g. `pagerduty`.
    fn name(&self) -> &'static str;

    /// Fetches events since `state.last_poll_time`.
    ///
    /// Implementations must honor the state's `last_poll_time` as the
    /// API's "since" filter and may consume `state.cursor` to continue
    /// pagination.
    async fn poll(&self, state: &PollState, query: &PollQuery) -> Result<PollOutcome, PollError>;
}
