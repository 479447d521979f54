//! Filesystem-event workflow triggers for conductor.
//!
//! This crate provides:
//!
//! - **Watch definitions**: roots, event kinds, include/exclude globs,
//!   debounce, batch mode, and per-minute caps
//! - **Filtering**: built-in editor/VCS noise excludes plus user globs
//! - **The watch service**: OS notification subscription, debounced
//!   flushing, and run submission

pub mod error;
pub mod filter;
pub mod watch;
pub mod watcher;

pub use error::WatcherError;
pub use filter::EventFilter;
pub use watch::{FileEvent, FileWatch, WatchEventKind};
pub use watcher::FileWatcherService;
