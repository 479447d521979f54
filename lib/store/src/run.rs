//! Run records and the run status machine.
//!
//! A `Run` is a single execution attempt of a workflow. Status transitions
//! are strictly forward: `pending -> running -> {succeeded, failed,
//! cancelled}`. Terminal states are absorbing.

use chrono::{DateTime, Utc};
use conductor_core::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted but not yet executing.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled by the operator or shutdown.
    Cancelled,
}

impl RunStatus {
    /// Returns true for terminal (absorbing) states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if a transition from `self` to `next` is legal.
    ///
    /// Transitions only move forward; terminal states admit nothing.
    #[must_use]
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Succeeded | Self::Failed | Self::Cancelled
            ),
            Self::Running => matches!(next, Self::Succeeded | Self::Failed | Self::Cancelled),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A single execution attempt of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier. Never reused.
    pub id: RunId,
    /// Path or name identifying the workflow.
    pub workflow: String,
    /// Inputs the run was submitted with.
    pub inputs: HashMap<String, JsonValue>,
    /// Current status.
    pub status: RunStatus,
    /// Final output, when succeeded.
    pub output: Option<JsonValue>,
    /// Error message, when failed.
    pub error: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Creates a new pending run.
    #[must_use]
    pub fn new(workflow: impl Into<String>, inputs: HashMap<String, JsonValue>) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            workflow: workflow.into(),
            inputs,
            status: RunStatus::Pending,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
