//! Error types for the poll crate.

use std::fmt;

/// Errors from poll triggers and integration pollers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// A query parameter failed validation.
    InvalidQuery { reason: String },
    /// No poller is registered for the integration.
    UnknownIntegration { integration: String },
    /// A trigger with this id is already registered.
    TriggerExists { trigger_id: String },
    /// No trigger with this id is registered.
    TriggerNotFound { trigger_id: String },
    /// The trigger's circuit breaker has tripped; reset required.
    TriggerPaused { trigger_id: String },
    /// Poll-state persistence failed.
    StateFailed { reason: String },
    /// The integration answered 429.
    RateLimitedByIntegration { retry_after_secs: Option<u64> },
    /// The integration rejected our credentials.
    AuthFailed { reason: String },
    /// A transient integration failure (network, 5xx).
    Transient { reason: String },
    /// The poll did not finish within its budget.
    Timeout { secs: u64 },
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidQuery { reason } => write!(f, "invalid poll query: {reason}"),
            Self::UnknownIntegration { integration } => {
                write!(f, "unknown integration: {integration}")
            }
            Self::TriggerExists { trigger_id } => {
                write!(f, "poll trigger already registered: {trigger_id}")
            }
            Self::TriggerNotFound { trigger_id } => {
                write!(f, "poll trigger not found: {trigger_id}")
            }
            Self::TriggerPaused { trigger_id } => {
                write!(f, "poll trigger is paused: {trigger_id}")
            }
            Self::StateFailed { reason } => write!(f, "poll state persistence failed: {reason}"),
            Self::RateLimitedByIntegration { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "integration rate limited, retry after {secs}s"),
                None => write!(f, "integration rate limited"),
            },
            Self::AuthFailed { reason } => write!(f, "integration auth failed: {reason}"),
            Self::Transient { reason } => write!(f, "integration request failed: {reason}"),
            Self::Timeout { secs } => write!(f, "poll timed out after {secs}s"),
        }
    }
}

impl std::error::Error for PollError {}

impl From<sqlx::Error> for PollError {
    fn from(e: sqlx::Error) -> Self {
        Self::StateFailed {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for PollError {
    fn from(e: serde_json::Error) -> Self {
        Self::StateFailed {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PollError::UnknownIntegration {
            integration: "pagerduty".to_string(),
        };
        assert!(err.to_string().contains("pagerduty"));

        let err = PollError::RateLimitedByIntegration {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30s"));
    }
}
