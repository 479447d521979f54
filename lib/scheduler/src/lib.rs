//! Cron scheduling for conductor workflow triggers.
//!
//! This crate provides:
//!
//! - **Cron expressions**: the five-field dialect with aliases, parsed and
//!   evaluated in an entry's timezone
//! - **Scheduler**: per-entry timers submitting through the `RunSubmitter`
//!   seam, started and stopped with leadership in distributed mode

pub mod cron;
pub mod error;
pub mod scheduler;

pub use cron::CronExpr;
pub use error::{ScheduleError, SchedulerError};
pub use scheduler::{ScheduleEntry, Scheduler};
