//! The run-submission seam.
//!
//! Every trigger source (scheduler, webhooks, file watcher, poll service)
//! funnels into this one narrow trait instead of owning the runner,
//! breaking what would otherwise be cyclic references between the
//! controller's subsystems.

use crate::id::RunId;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Error from a run submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitError {
    /// Why the submission was rejected.
    pub reason: String,
}

impl SubmitError {
    /// Creates a submit error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run submission failed: {}", self.reason)
    }
}

impl std::error::Error for SubmitError {}

/// Submits workflow runs on behalf of a trigger source.
#[async_trait]
pub trait RunSubmitter: Send + Sync {
    /// Submits a run of `workflow` with the given inputs.
    async fn submit(
        &self,
        workflow: &str,
        inputs: HashMap<String, JsonValue>,
    ) -> Result<RunId, SubmitError>;
}
