//! Run-record and key/value persistence.
//!
//! The `StateStore` trait is the only way runs reach disk. Two backends are
//! provided: an in-memory store for tests and single-shot invocations, and a
//! SQLite store (WAL journaling, 5s busy timeout) for production.

use crate::error::StoreError;
use crate::run::{Run, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::RunId;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

/// Persistent storage for run records and controller key/value state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Inserts a new run record.
    async fn create_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Fetches a run by id.
    async fn get_run(&self, run_id: RunId) -> Result<Run, StoreError>;

    /// Lists the most recent runs, newest first.
    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError>;

    /// Persists an updated run record.
    ///
    /// Rejects updates that would move a run out of a terminal status.
    async fn update_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Stores an opaque value under a key.
    async fn set_value(&self, key: &str, value: &JsonValue) -> Result<(), StoreError>;

    /// Fetches a value by key.
    async fn get_value(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;
}

/// Validates a status change against the run currently on record.
///
/// Same-status writes are allowed so callers can update output or error
/// fields without a transition.
fn check_transition(existing: &Run, next: RunStatus) -> Result<(), StoreError> {
    if existing.status == next {
        return Ok(());
    }
    if !existing.status.can_transition_to(next) {
        return Err(StoreError::TerminalStatus {
            run_id: existing.id,
            status: existing.status.to_string(),
        });
    }
    Ok(())
}

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    runs: RwLock<HashMap<RunId, Run>>,
    values: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryStateStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.write().unwrap().insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Run, StoreError> {
        self.runs
            .read()
            .unwrap()
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound { run_id })
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError> {
        let mut runs: Vec<Run> = self.runs.read().unwrap().values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().unwrap();
        let existing = runs
            .get(&run.id)
            .ok_or(StoreError::RunNotFound { run_id: run.id })?;
        check_transition(existing, run.status)?;
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn set_value(&self, key: &str, value: &JsonValue) -> Result<(), StoreError> {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.values.read().unwrap().get(key).cloned())
    }
}

/// SQLite-backed state store.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Opens (creating if necessary) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be applied.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Returns the underlying connection pool.
    ///
    /// Shared with the checkpoint store so both live in one database file.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS runs (
                run_id     TEXT PRIMARY KEY,
                workflow   TEXT NOT NULL,
                status     TEXT NOT NULL,
                inputs     TEXT NOT NULL,
                output     TEXT,
                error      TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS controller_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<Run, StoreError> {
        let id: String = row.try_get("run_id")?;
        let status: String = row.try_get("status")?;
        let inputs: String = row.try_get("inputs")?;
        let output: Option<String> = row.try_get("output")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Run {
            id: RunId::from_str(&id).map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })?,
            workflow: row.try_get("workflow")?,
            status: status.parse().map_err(|e: String| StoreError::Serialization { reason: e })?,
            inputs: serde_json::from_str(&inputs)?,
            output: output.map(|o| serde_json::from_str(&o)).transpose()?,
            error: row.try_get("error")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO runs (run_id, workflow, status, inputs, output, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(run.id.to_string())
        .bind(&run.workflow)
        .bind(run.status.to_string())
        .bind(serde_json::to_string(&run.inputs)?)
        .bind(run.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&run.error)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Run, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RunNotFound { run_id })?;
        Self::row_to_run(&row)
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY created_at DESC, run_id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let existing = self.get_run(run.id).await?;
        check_transition(&existing, run.status)?;

        sqlx::query(
            r"
            UPDATE runs
            SET status = ?, output = ?, error = ?, updated_at = ?
            WHERE run_id = ?
            ",
        )
        .bind(run.status.to_string())
        .bind(run.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&run.error)
        .bind(run.updated_at.to_rfc3339())
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_value(&self, key: &str, value: &JsonValue) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO controller_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let row = sqlx::query("SELECT value FROM controller_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&value)?))
            }
            None => Ok(None),
        }
    }
}
