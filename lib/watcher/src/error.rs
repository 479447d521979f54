//! Error types for the watcher crate.

use std::fmt;

/// Errors from file-watch configuration and subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherError {
    /// Watch definition failed validation.
    InvalidConfig { name: String, reason: String },
    /// The OS watch subscription failed.
    SubscribeFailed { name: String, reason: String },
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { name, reason } => {
                write!(f, "invalid file watch '{name}': {reason}")
            }
            Self::SubscribeFailed { name, reason } => {
                write!(f, "file watch '{name}' subscription failed: {reason}")
            }
        }
    }
}

impl std::error::Error for WatcherError {}
