//! Periodic third-party polling triggers for conductor.
//!
//! This crate provides:
//!
//! - **The poll service**: jittered per-trigger timers, timestamp-first
//!   deduplication, a consecutive-failure circuit breaker
//! - **Poll state**: the persistent per-trigger record (memory or SQLite)
//! - **Rate limiting**: per-integration minimum intervals, budgets, and
//!   429-driven exponential backoff
//! - **Integration pollers**: PagerDuty, Slack, Jira, and Datadog, built
//!   from environment credentials
//! - **Defenses**: query validation against injection, sensitive-field
//!   stripping, and credential redaction in error messages

pub mod error;
pub mod integrations;
pub mod manager;
pub mod poller;
pub mod rate_limit;
pub mod sanitize;
pub mod service;
pub mod state;
pub mod validate;

pub use error::PollError;
pub use integrations::{
    pollers_from_env, DatadogPoller, JiraPoller, PagerDutyPoller, SlackPoller,
};
pub use manager::{MemoryPollStateManager, PollStateManager, SqlitePollStateManager};
pub use poller::{IntegrationPoller, PollOutcome, PollQuery};
pub use rate_limit::{IntegrationLimits, IntegrationRateLimiter};
pub use sanitize::{redact_error, strip_sensitive_fields};
pub use service::{
    PollTrigger, PollTriggerService, PollTriggerStatus, StartMode, MIN_POLL_INTERVAL,
};
pub use state::{PollHealth, PollState};
pub use validate::validate_query;
