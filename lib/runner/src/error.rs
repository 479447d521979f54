//! Error types for the runner crate.

use conductor_core::RunId;
use conductor_store::StoreError;
use std::fmt;

/// Errors from run submission and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The runner is draining; no new runs are admitted.
    Draining,
    /// The runner is at capacity (non-blocking submit only).
    Capacity,
    /// The workflow source could not be parsed.
    InvalidWorkflow { reason: String },
    /// Run not found.
    RunNotFound { run_id: RunId },
    /// Storage operation failed.
    Store(StoreError),
    /// In-flight runs did not finish within the drain timeout.
    DrainTimeout { remaining: usize },
    /// No workflow fetcher is configured, so interrupted runs cannot be
    /// resumed.
    NoFetcher,
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draining => write!(f, "runner is draining"),
            Self::Capacity => write!(f, "runner is at capacity"),
            Self::InvalidWorkflow { reason } => write!(f, "invalid workflow: {reason}"),
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::Store(e) => write!(f, "run storage failed: {e}"),
            Self::DrainTimeout { remaining } => {
                write!(f, "drain timed out with {remaining} runs in flight")
            }
            Self::NoFetcher => write!(f, "no workflow fetcher configured"),
        }
    }
}

impl std::error::Error for RunnerError {}

impl From<StoreError> for RunnerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors from the workflow adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The workflow source is malformed.
    ParseFailed { reason: String },
    /// A step failed during execution.
    StepFailed { step_id: String, reason: String },
    /// The adapter could not run the workflow at all.
    ExecutionFailed { reason: String },
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailed { reason } => write!(f, "workflow parse failed: {reason}"),
            Self::StepFailed { step_id, reason } => {
                write!(f, "step {step_id} failed: {reason}")
            }
            Self::ExecutionFailed { reason } => write!(f, "workflow execution failed: {reason}"),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Errors from the workflow fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No workflow exists at the given path.
    NotFound { path: String },
    /// The workflow could not be read.
    ReadFailed { path: String, reason: String },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "workflow not found: {path}"),
            Self::ReadFailed { path, reason } => {
                write!(f, "failed to read workflow {path}: {reason}")
            }
        }
    }
}

impl std::error::Error for FetchError {}
