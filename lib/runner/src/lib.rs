//! Bounded-concurrency workflow run executor.
//!
//! This crate provides:
//!
//! - **Runner**: admission, execution, cancellation, drain, and resume of
//!   workflow runs
//! - **Adapter seam**: the `WorkflowAdapter` trait the external workflow
//!   engine plugs into, plus mock implementations for tests
//! - **Fetcher seam**: workflow source lookup for resuming interrupted runs

pub mod adapter;
pub mod error;
pub mod runner;

pub use adapter::{
    DirectoryFetcher, EchoAdapter, MockAdapter, ParsedWorkflow, StepObserver, WorkflowAdapter,
    WorkflowFetcher,
};
pub use error::{AdapterError, FetchError, RunnerError};
pub use runner::{NoopMetrics, Runner, RunnerConfig, RunnerMetrics, SubmitOptions};
