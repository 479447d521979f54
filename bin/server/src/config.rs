//! Controller configuration.
//!
//! Loaded at startup from a YAML file plus `CONDUCTOR_`-prefixed
//! environment overrides via the `config` crate. Validation failures are
//! configuration errors: the process exits with code 2 before any
//! listener binds.

use conductor_auth::ApiKey;
use conductor_poll::PollTrigger;
use conductor_scheduler::{CronExpr, ScheduleEntry};
use conductor_trigger::{CompiledEndpoint, CompiledRoute, Endpoint, WebhookRoute};
use conductor_watcher::{EventFilter, FileWatch};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration load or validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub reason: String,
}

impl ConfigError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Which persistence backend holds runs, checkpoints, and poll state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Nothing survives a restart; for tests and one-shot use.
    Memory,
    /// SQLite files under `state_dir`.
    #[default]
    Sqlite,
}

fn default_listen() -> String {
    "127.0.0.1:8420".to_string()
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("workflows")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_max_parallel() -> usize {
    4
}

fn default_run_timeout_secs() -> u64 {
    600
}

fn default_drain_timeout_secs() -> u64 {
    30
}

/// Core controller settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// TCP listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Optional unix socket path for the local control plane.
    #[serde(default)]
    pub unix_socket: Option<PathBuf>,
    /// Directory workflows are fetched from.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    /// Directory for state databases and checkpoints.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Persistence backend.
    #[serde(default)]
    pub backend: Backend,
    /// Maximum concurrently-executing runs.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Default per-run timeout.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// How long shutdown waits for in-flight runs.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            unix_socket: None,
            workflows_dir: default_workflows_dir(),
            state_dir: default_state_dir(),
            backend: Backend::default(),
            max_parallel: default_max_parallel(),
            run_timeout_secs: default_run_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

fn default_allow_unix_socket() -> bool {
    true
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Whether API-key auth is enforced on the TCP listener.
    #[serde(default)]
    pub enabled: bool,
    /// Whether unix-socket requests bypass authentication.
    #[serde(default = "default_allow_unix_socket")]
    pub allow_unix_socket: bool,
    /// Configured credentials.
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_unix_socket: default_allow_unix_socket(),
            api_keys: Vec::new(),
        }
    }
}

/// Multi-instance coordination settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistributedConfig {
    /// Enables leader election; the scheduler then runs only on the
    /// leader.
    #[serde(default)]
    pub enabled: bool,
    /// Shared Postgres the advisory lock lives on.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Observability settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter, e.g. `info,conductor_poll=debug`. Overridden by
    /// `RUST_LOG`.
    #[serde(default)]
    pub log_filter: Option<String>,
}

/// The full controller configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub distributed: DistributedConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub webhooks: Vec<WebhookRoute>,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub file_watchers: Vec<FileWatch>,
    #[serde(default)]
    pub poll_triggers: Vec<PollTrigger>,
}

impl Config {
    /// Loads configuration from an optional YAML file plus `CONDUCTOR_`
    /// environment overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unreadable or invalid configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .map_err(|e| ConfigError::new(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::new(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every trigger definition before any subsystem starts.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.max_parallel == 0 {
            return Err(ConfigError::new("controller.max_parallel must be at least 1"));
        }
        if self.distributed.enabled && self.distributed.database_url.is_none() {
            return Err(ConfigError::new(
                "distributed.database_url is required when distributed.enabled",
            ));
        }
        if self.auth.enabled && self.auth.api_keys.is_empty() {
            return Err(ConfigError::new(
                "auth.enabled requires at least one entry in auth.api_keys",
            ));
        }

        let mut seen = HashSet::new();
        for route in &self.webhooks {
            if !seen.insert(route.path.clone()) {
                return Err(ConfigError::new(format!(
                    "duplicate webhook path: {}",
                    route.path
                )));
            }
            CompiledRoute::compile(route.clone(), |var| std::env::var(var).ok())
                .map_err(|e| ConfigError::new(e.to_string()))?;
        }

        let mut seen = HashSet::new();
        for entry in &self.schedules {
            if !seen.insert(entry.name.clone()) {
                return Err(ConfigError::new(format!(
                    "duplicate schedule name: {}",
                    entry.name
                )));
            }
            CronExpr::parse(&entry.cron).map_err(|e| {
                ConfigError::new(format!("schedule '{}': {e}", entry.name))
            })?;
            if let Some(tz) = entry.timezone.as_deref() {
                tz.parse::<chrono_tz::Tz>().map_err(|_| {
                    ConfigError::new(format!(
                        "schedule '{}': invalid timezone: {tz}",
                        entry.name
                    ))
                })?;
            }
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name.clone()) {
                return Err(ConfigError::new(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
            CompiledEndpoint::compile(endpoint.clone())
                .map_err(|e| ConfigError::new(e.to_string()))?;
        }

        let mut seen = HashSet::new();
        for watch in &self.file_watchers {
            if !seen.insert(watch.name.clone()) {
                return Err(ConfigError::new(format!(
                    "duplicate file watch name: {}",
                    watch.name
                )));
            }
            EventFilter::compile(watch).map_err(|e| ConfigError::new(e.to_string()))?;
        }

        let mut seen = HashSet::new();
        for trigger in &self.poll_triggers {
            let id = trigger.trigger_id();
            if !seen.insert(id.clone()) {
                return Err(ConfigError::new(format!("duplicate poll trigger: {id}")));
            }
            conductor_poll::validate_query(&trigger.query)
                .map_err(|e| ConfigError::new(format!("poll trigger '{id}': {e}")))?;
        }

        Ok(())
    }
}
