//! Error types for the trigger crate.

use std::fmt;

/// Errors from webhook and endpoint handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// Trigger definition failed validation.
    InvalidConfig { reason: String },
    /// Request signature did not verify.
    SignatureInvalid { reason: String },
    /// The request payload could not be parsed.
    InvalidPayload { reason: String },
    /// The caller lacks a required scope.
    MissingScope { scope: String },
    /// The endpoint's rate limit is exhausted.
    RateLimited { retry_after_secs: u64 },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid trigger config: {reason}"),
            Self::SignatureInvalid { reason } => {
                write!(f, "signature verification failed: {reason}")
            }
            Self::InvalidPayload { reason } => write!(f, "invalid payload: {reason}"),
            Self::MissingScope { scope } => write!(f, "missing required scope: {scope}"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
        }
    }
}

impl std::error::Error for TriggerError {}
