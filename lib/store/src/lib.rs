//! Persistence for the conductor controller.
//!
//! This crate provides:
//!
//! - **Run records**: the `Run` entity and its status machine
//! - **State store**: key/value and run persistence (memory or SQLite)
//! - **Checkpoints**: atomic, restart-safe run snapshots
//! - **Leader election**: advisory-lock coordination over shared Postgres

pub mod checkpoint;
pub mod error;
pub mod leader;
pub mod run;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use error::{LeaderError, StoreError};
pub use leader::LeaderElector;
pub use run::{Run, RunStatus};
pub use store::{MemoryStateStore, SqliteStateStore, StateStore};
