//! Path filtering for file watches.
//!
//! Filtering runs in three stages: built-in excludes for editor and VCS
//! noise (unless the watch opts out), then include globs (at least one must
//! match when any are configured), then exclude globs (none may match).
//! The glob dialect is globset's: `*` stays within a path segment, `**`
//! crosses segments, `?` matches one character, `[class]` matches a class.

use crate::error::WatcherError;
use crate::watch::FileWatch;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Glob patterns excluded by default: editor temp/backup files and VCS
/// metadata.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/*.swp",
    "**/*.swo",
    "**/*~",
    "**/.DS_Store",
    "**/4913",
    "**/*.tmp",
];

fn build_globset(patterns: &[String], name: &str) -> Result<GlobSet, WatcherError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| WatcherError::InvalidConfig {
            name: name.to_string(),
            reason: format!("invalid glob '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| WatcherError::InvalidConfig {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Compiled include/exclude filter for one watch.
#[derive(Debug, Clone)]
pub struct EventFilter {
    roots: Vec<PathBuf>,
    include: Option<GlobSet>,
    exclude: GlobSet,
    default_excludes: Option<GlobSet>,
    max_depth: Option<u32>,
}

impl EventFilter {
    /// Compiles the filter from a watch definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unparseable glob.
    pub fn compile(watch: &FileWatch) -> Result<Self, WatcherError> {
        if watch.paths.is_empty() {
            return Err(WatcherError::InvalidConfig {
                name: watch.name.clone(),
                reason: "at least one watch path is required".to_string(),
            });
        }
        let include = if watch.include.is_empty() {
            None
        } else {
            Some(build_globset(&watch.include, &watch.name)?)
        };
        let exclude = build_globset(&watch.exclude, &watch.name)?;
        let default_excludes = if watch.default_excludes {
            let patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect();
            Some(build_globset(&patterns, &watch.name)?)
        } else {
            None
        };
        Ok(Self {
            roots: watch.paths.clone(),
            include,
            exclude,
            default_excludes,
            max_depth: watch.max_depth,
        })
    }

    /// Returns true if an event at `path` passes all filter stages.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        if let Some(defaults) = &self.default_excludes {
            if defaults.is_match(path) {
                return false;
            }
        }
        if self.exceeds_depth(path) {
            return false;
        }
        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }
        !self.exclude.is_match(path)
    }

    fn exceeds_depth(&self, path: &Path) -> bool {
        let Some(max_depth) = self.max_depth else {
            return false;
        };
        for root in &self.roots {
            if let Ok(relative) = path.strip_prefix(root) {
                // Depth counts directories below the root; the file's own
                // component does not count.
                let depth = relative.components().count().saturating_sub(1) as u32;
                return depth > max_depth;
            }
        }
        false
    }
}
