//! Webhook and endpoint trigger handling for conductor.
//!
//! This crate provides:
//!
//! - **Webhook routes**: path-bound bindings with per-source signature
//!   verification (GitHub, Slack, generic) and payload mapping
//! - **Endpoints**: named invocation points with scopes, default inputs,
//!   and per-endpoint rate limits
//! - **Rate limiting**: named token buckets with an injected clock
//!
//! The HTTP wiring lives in the server binary; everything here is
//! framework-agnostic so it can be tested without a listener.

pub mod endpoint;
pub mod error;
pub mod mapping;
pub mod rate_limit;
pub mod signature;
pub mod webhook;

pub use endpoint::{CompiledEndpoint, Endpoint};
pub use error::TriggerError;
pub use mapping::{InputMapping, MappingExpr};
pub use rate_limit::{RateLimit, RateLimitDecision, RateLimiter};
pub use webhook::{CompiledRoute, WebhookOutcome, WebhookRequest, WebhookRoute, WebhookSource};

use std::fmt;
use std::str::FromStr;

/// The kind of a managed trigger, used by trigger listing and CRUD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Webhook,
    Schedule,
    Endpoint,
    FileWatcher,
    Poll,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
            Self::Endpoint => "endpoint",
            Self::FileWatcher => "file_watcher",
            Self::Poll => "poll",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TriggerKind {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" | "webhooks" => Ok(Self::Webhook),
            "schedule" | "schedules" => Ok(Self::Schedule),
            "endpoint" | "endpoints" => Ok(Self::Endpoint),
            "file_watcher" | "file-watchers" | "file_watchers" => Ok(Self::FileWatcher),
            "poll" => Ok(Self::Poll),
            other => Err(TriggerError::InvalidConfig {
                reason: format!("invalid trigger type: {other}"),
            }),
        }
    }
}
