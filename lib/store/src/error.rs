//! Error types for the store crate.

use conductor_core::RunId;
use std::fmt;

/// Errors from run-record and key/value storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Run not found.
    RunNotFound { run_id: RunId },
    /// A terminal run status was about to be overwritten.
    TerminalStatus { run_id: RunId, status: String },
    /// Backend connection failed.
    ConnectionFailed { reason: String },
    /// Query or statement execution failed.
    QueryFailed { reason: String },
    /// Serialization of a stored value failed.
    Serialization { reason: String },
    /// Filesystem operation failed.
    Io { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::TerminalStatus { run_id, status } => {
                write!(f, "run {run_id} is already terminal ({status})")
            }
            Self::ConnectionFailed { reason } => {
                write!(f, "store connection failed: {reason}")
            }
            Self::QueryFailed { reason } => write!(f, "store query failed: {reason}"),
            Self::Serialization { reason } => write!(f, "store serialization failed: {reason}"),
            Self::Io { reason } => write!(f, "store io failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::QueryFailed {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            reason: e.to_string(),
        }
    }
}

/// Errors from the leader elector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderError {
    /// Database connection failed.
    ConnectionFailed { reason: String },
    /// Lock acquisition or release query failed.
    LockFailed { reason: String },
    /// The elector is already running.
    AlreadyStarted,
}

impl fmt::Display for LeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "leader elector connection failed: {reason}")
            }
            Self::LockFailed { reason } => write!(f, "advisory lock operation failed: {reason}"),
            Self::AlreadyStarted => write!(f, "leader elector already started"),
        }
    }
}

impl std::error::Error for LeaderError {}
