//! Poll-state persistence.
//!
//! One row per trigger, saved atomically as a single upsert. The SQLite
//! backend uses WAL journaling with a 5s busy timeout; the in-memory
//! backend backs tests.

use crate::error::PollError;
use crate::state::PollState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

/// Stores per-trigger poll state.
#[async_trait]
pub trait PollStateManager: Send + Sync {
    /// Loads state for a trigger, if any was saved.
    async fn load(&self, trigger_id: &str) -> Result<Option<PollState>, PollError>;

    /// Saves (inserting or replacing) a trigger's state.
    async fn save(&self, state: &PollState) -> Result<(), PollError>;

    /// Deletes a trigger's state. Idempotent.
    async fn delete(&self, trigger_id: &str) -> Result<(), PollError>;

    /// Lists all saved states.
    async fn list(&self) -> Result<Vec<PollState>, PollError>;
}

/// In-memory poll-state manager for tests.
#[derive(Debug, Default)]
pub struct MemoryPollStateManager {
    states: RwLock<HashMap<String, PollState>>,
}

impl MemoryPollStateManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStateManager for MemoryPollStateManager {
    async fn load(&self, trigger_id: &str) -> Result<Option<PollState>, PollError> {
        Ok(self.states.read().unwrap().get(trigger_id).cloned())
    }

    async fn save(&self, state: &PollState) -> Result<(), PollError> {
        self.states
            .write()
            .unwrap()
            .insert(state.trigger_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, trigger_id: &str) -> Result<(), PollError> {
        self.states.write().unwrap().remove(trigger_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PollState>, PollError> {
        let mut states: Vec<PollState> = self.states.read().unwrap().values().cloned().collect();
        states.sort_by(|a, b| a.trigger_id.cmp(&b.trigger_id));
        Ok(states)
    }
}

/// SQLite-backed poll-state manager.
#[derive(Debug, Clone)]
pub struct SqlitePollStateManager {
    pool: SqlitePool,
}

impl SqlitePollStateManager {
    /// Opens (creating if necessary) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StateFailed` if the database cannot be opened or the
    /// schema applied.
    pub async fn connect(path: &Path) -> Result<Self, PollError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| PollError::StateFailed {
                reason: e.to_string(),
            })?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS poll_state (
                trigger_id      TEXT PRIMARY KEY,
                workflow_path   TEXT NOT NULL,
                integration     TEXT NOT NULL,
                last_poll_time  TEXT NOT NULL,
                high_water_mark TEXT,
                seen_events     TEXT NOT NULL,
                cursor          TEXT,
                last_error      TEXT,
                error_count     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            ",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<PollState, PollError> {
        let last_poll_time: String = row.try_get("last_poll_time")?;
        let high_water_mark: Option<String> = row.try_get("high_water_mark")?;
        let seen_events: String = row.try_get("seen_events")?;
        let error_count: i64 = row.try_get("error_count")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(PollState {
            trigger_id: row.try_get("trigger_id")?,
            workflow: row.try_get("workflow_path")?,
            integration: row.try_get("integration")?,
            last_poll_time: parse_timestamp(&last_poll_time)?,
            high_water_mark: high_water_mark.as_deref().map(parse_timestamp).transpose()?,
            seen_events: serde_json::from_str(&seen_events)?,
            cursor: row.try_get("cursor")?,
            last_error: row.try_get("last_error")?,
            error_count: error_count.max(0) as u32,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PollError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PollError::StateFailed {
            reason: e.to_string(),
        })
}

#[async_trait]
impl PollStateManager for SqlitePollStateManager {
    async fn load(&self, trigger_id: &str) -> Result<Option<PollState>, PollError> {
        let row = sqlx::query("SELECT * FROM poll_state WHERE trigger_id = ?")
            .bind(trigger_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn save(&self, state: &PollState) -> Result<(), PollError> {
        sqlx::query(
            r"
            INSERT INTO poll_state (
                trigger_id, workflow_path, integration, last_poll_time,
                high_water_mark, seen_events, cursor, last_error,
                error_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trigger_id) DO UPDATE SET
                workflow_path = excluded.workflow_path,
                integration = excluded.integration,
                last_poll_time = excluded.last_poll_time,
                high_water_mark = excluded.high_water_mark,
                seen_events = excluded.seen_events,
                cursor = excluded.cursor,
                last_error = excluded.last_error,
                error_count = excluded.error_count,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&state.trigger_id)
        .bind(&state.workflow)
        .bind(&state.integration)
        .bind(state.last_poll_time.to_rfc3339())
        .bind(state.high_water_mark.map(|t| t.to_rfc3339()))
        .bind(serde_json::to_string(&state.seen_events)?)
        .bind(&state.cursor)
        .bind(&state.last_error)
        .bind(i64::from(state.error_count))
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, trigger_id: &str) -> Result<(), PollError> {
        sqlx::query("DELETE FROM poll_state WHERE trigger_id = ?")
            .bind(trigger_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PollState>, PollError> {
        let rows = sqlx::query("SELECT * FROM poll_state ORDER BY trigger_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PollState {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut state = PollState::new("w.yaml:pagerduty", "w.yaml", "pagerduty", now);
        state.record_event("e1", now);
        state.record_event("e2", now);
        state.cursor = Some("page-2".to_string());
        state.error_count = 2;
        state.last_error = Some("transient".to_string());
        state.high_water_mark = Some(now);
        state
    }

    async fn sqlite() -> (tempfile::TempDir, SqlitePollStateManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqlitePollStateManager::connect(&dir.path().join("poll.db"))
            .await
            .unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn memory_roundtrip() {
        let manager = MemoryPollStateManager::new();
        let state = sample();

        manager.save(&state).await.unwrap();
        let loaded = manager.load(&state.trigger_id).await.unwrap();
        assert_eq!(loaded, Some(state.clone()));

        manager.delete(&state.trigger_id).await.unwrap();
        assert!(manager.load(&state.trigger_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_save_then_load_yields_equal_state() {
        let (_dir, manager) = sqlite().await;
        let state = sample();

        manager.save(&state).await.unwrap();
        let loaded = manager.load(&state.trigger_id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn sqlite_save_is_an_upsert() {
        let (_dir, manager) = sqlite().await;
        let mut state = sample();
        manager.save(&state).await.unwrap();

        state.error_count = 0;
        state.last_error = None;
        state.record_event("e3", state.last_poll_time);
        manager.save(&state).await.unwrap();

        let loaded = manager.load(&state.trigger_id).await.unwrap().unwrap();
        assert_eq!(loaded.error_count, 0);
        assert_eq!(loaded.seen_events.len(), 3);

        let all = manager.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn sqlite_missing_state_is_none() {
        let (_dir, manager) = sqlite().await;
        assert!(manager.load("missing").await.unwrap().is_none());
        manager.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_list_orders_by_trigger_id() {
        let (_dir, manager) = sqlite().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        manager
            .save(&PollState::new("b:slack", "b", "slack", now))
            .await
            .unwrap();
        manager
            .save(&PollState::new("a:jira", "a", "jira", now))
            .await
            .unwrap();

        let all = manager.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].trigger_id, "a:jira");
        assert_eq!(all[1].trigger_id, "b:slack");
    }
}
