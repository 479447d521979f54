//! Cron-driven workflow scheduling.
//!
//! The scheduler holds a set of `ScheduleEntry` bindings. While started, a
//! task per enabled entry sleeps until the entry's next fire time, submits
//! the workflow through the `RunSubmitter` seam, and re-arms. In a
//! multi-instance deployment the controller starts the scheduler on gaining
//! leadership and stops it on loss; followers hold the definitions but
//! never submit.

use crate::cron::CronExpr;
use crate::error::{ScheduleError, SchedulerError};
use chrono_tz::Tz;
use conductor_core::{Clock, RunSubmitter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A cron-triggered workflow binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Unique entry name.
    pub name: String,
    /// Cron expression or alias.
    pub cron: String,
    /// IANA timezone for evaluation. Defaults to UTC.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Workflow to submit.
    pub workflow: String,
    /// Static inputs passed on every fire.
    #[serde(default)]
    pub inputs: HashMap<String, JsonValue>,
    /// Whether this entry is armed when the scheduler runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A validated entry ready for arming.
#[derive(Debug, Clone)]
struct ArmedEntry {
    entry: ScheduleEntry,
    expr: CronExpr,
    tz: Tz,
}

fn validate_entry(entry: &ScheduleEntry) -> Result<ArmedEntry, SchedulerError> {
    let expr = CronExpr::parse(&entry.cron).map_err(|e| SchedulerError::InvalidEntry {
        name: entry.name.clone(),
        reason: e.to_string(),
    })?;
    let tz = match entry.timezone.as_deref() {
        Some(tz_name) => tz_name.parse::<Tz>().map_err(|_| {
            SchedulerError::InvalidEntry {
                name: entry.name.clone(),
                reason: ScheduleError::InvalidTimezone {
                    timezone: tz_name.to_string(),
                }
                .to_string(),
            }
        })?,
        None => Tz::UTC,
    };
    Ok(ArmedEntry {
        entry: entry.clone(),
        expr,
        tz,
    })
}

/// Fires schedule entries at their cron times.
pub struct Scheduler {
    entries: Vec<ArmedEntry>,
    submitter: Arc<dyn RunSubmitter>,
    clock: Arc<dyn Clock>,
    armed: Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl Scheduler {
    /// Creates a scheduler, validating every entry up front.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntry` for a bad cron expression or timezone.
    pub fn new(
        entries: Vec<ScheduleEntry>,
        submitter: Arc<dyn RunSubmitter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let entries = entries
            .iter()
            .map(validate_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entries,
            submitter,
            clock,
            armed: Mutex::new(None),
        })
    }

    /// Arms a timer per enabled entry. Idempotent.
    pub fn start(&self) {
        let mut armed = self.armed.lock().unwrap();
        if armed.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let mut handles = Vec::new();
        for entry in &self.entries {
            if !entry.entry.enabled {
                continue;
            }
            let entry = entry.clone();
            let submitter = Arc::clone(&self.submitter);
            let clock = Arc::clone(&self.clock);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                fire_loop(entry, submitter, clock, token).await;
            }));
        }
        tracing::info!(entries = handles.len(), "scheduler started");
        *armed = Some((token, handles));
    }

    /// Stops all timers. Idempotent.
    pub fn stop(&self) {
        let mut armed = self.armed.lock().unwrap();
        if let Some((token, handles)) = armed.take() {
            token.cancel();
            for handle in handles {
                handle.abort();
            }
            tracing::info!("scheduler stopped");
        }
    }

    /// Returns true while timers are armed.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.armed.lock().unwrap().is_some()
    }

    /// The schedule entries this scheduler holds.
    #[must_use]
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.iter().map(|e| e.entry.clone()).collect()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fire_loop(
    armed: ArmedEntry,
    submitter: Arc<dyn RunSubmitter>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
) {
    // Fires are computed from the previous fire time, never re-reading
    // "now" backwards, so each entry's instants are strictly increasing.
    let mut after = clock.now();
    loop {
        let Some(fire_at) = armed.expr.next_after(after, armed.tz) else {
            tracing::warn!(
                entry = %armed.entry.name,
                cron = %armed.entry.cron,
                "schedule can never fire, disarming"
            );
            return;
        };

        let now = clock.now();
        let delay = (fire_at - now).to_std().unwrap_or_default();
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        tracing::debug!(entry = %armed.entry.name, workflow = %armed.entry.workflow, "schedule fired");
        match submitter
            .submit(&armed.entry.workflow, armed.entry.inputs.clone())
            .await
        {
            Ok(run_id) => {
                tracing::info!(
                    entry = %armed.entry.name,
                    workflow = %armed.entry.workflow,
                    run_id = %run_id,
                    "scheduled run submitted"
                );
            }
            Err(e) => {
                tracing::warn!(
                    entry = %armed.entry.name,
                    workflow = %armed.entry.workflow,
                    error = %e,
                    "scheduled submit failed"
                );
            }
        }
        after = fire_at;
    }
}
