//! API-key authentication for the conductor control plane.
//!
//! This crate holds the framework-agnostic credential logic: the key set,
//! timing-safe comparison, bearer extraction, and the user context
//! attached to authenticated requests. The axum middleware wiring lives in
//! the server binary.

pub mod error;
pub mod key;

pub use error::AuthError;
pub use key::{extract_bearer, timing_safe_eq, ApiKey, KeySet, UserContext};
