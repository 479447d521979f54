//! File watch definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// The filesystem event kinds a watch can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        };
        write!(f, "{s}")
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_recursive() -> bool {
    true
}

fn default_use_default_excludes() -> bool {
    true
}

/// A filesystem-event-triggered workflow binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWatch {
    /// Unique watch name.
    pub name: String,
    /// Root paths to watch.
    pub paths: Vec<PathBuf>,
    /// Workflow to submit.
    pub workflow: String,
    /// Event kinds to react to. Empty means all.
    #[serde(default)]
    pub events: Vec<WatchEventKind>,
    /// Include globs; when non-empty, at least one must match.
    #[serde(default)]
    pub include: Vec<String>,
    /// Exclude globs; none may match.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Whether the built-in editor/VCS noise excludes apply.
    #[serde(default = "default_use_default_excludes")]
    pub default_excludes: bool,
    /// Quiet window before pending events are flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Submit one run carrying all pending events instead of one per event.
    #[serde(default)]
    pub batch_mode: bool,
    /// Cap on submissions per minute; excess events are dropped.
    #[serde(default)]
    pub max_triggers_per_minute: Option<u32>,
    /// Watch subdirectories.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Maximum directory depth below each root, when recursive.
    #[serde(default)]
    pub max_depth: Option<u32>,
    /// Static inputs merged into every submission.
    #[serde(default)]
    pub inputs: HashMap<String, JsonValue>,
}

impl FileWatch {
    /// Returns true if the watch reacts to `kind`.
    #[must_use]
    pub fn wants(&self, kind: WatchEventKind) -> bool {
        self.events.is_empty() || self.events.contains(&kind)
    }
}

/// A single filtered filesystem event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// Affected path.
    pub path: PathBuf,
    /// What happened.
    pub kind: WatchEventKind,
}
