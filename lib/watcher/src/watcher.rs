//! Filesystem watch service.
//!
//! One task per watch receives raw OS notifications, filters them, and
//! collects survivors into a pending set keyed by path. Each arrival
//! resets the debounce timer; when the quiet window elapses the pending
//! set flushes as either one batched submission or one submission per
//! event, subject to the per-minute cap.

use crate::error::WatcherError;
use crate::filter::EventFilter;
use crate::watch::{FileEvent, FileWatch, WatchEventKind};
use chrono::{DateTime, Utc};
use conductor_core::{Clock, RunSubmitter};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maps an OS notification kind onto the watch event vocabulary.
fn map_kind(kind: &notify::EventKind) -> Option<WatchEventKind> {
    use notify::event::ModifyKind;
    match kind {
        notify::EventKind::Create(_) => Some(WatchEventKind::Created),
        notify::EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Renamed),
        notify::EventKind::Modify(_) => Some(WatchEventKind::Modified),
        notify::EventKind::Remove(_) => Some(WatchEventKind::Deleted),
        _ => None,
    }
}

/// Watches filesystem roots and submits workflow runs for matching events.
pub struct FileWatcherService {
    watches: Vec<(FileWatch, EventFilter)>,
    submitter: Arc<dyn RunSubmitter>,
    clock: Arc<dyn Clock>,
    dropped: Arc<AtomicU64>,
    running: Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl FileWatcherService {
    /// Creates the service, compiling every watch's filter up front.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad glob or an empty path list.
    pub fn new(
        watches: Vec<FileWatch>,
        submitter: Arc<dyn RunSubmitter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WatcherError> {
        let watches = watches
            .into_iter()
            .map(|watch| {
                let filter = EventFilter::compile(&watch)?;
                Ok((watch, filter))
            })
            .collect::<Result<Vec<_>, WatcherError>>()?;
        Ok(Self {
            watches,
            submitter,
            clock,
            dropped: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        })
    }

    /// Subscribes to OS notifications and starts the per-watch loops.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeFailed` if a root cannot be watched.
    pub fn start(&self) -> Result<(), WatcherError> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let mut handles = Vec::new();
        for (watch, filter) in &self.watches {
            let (tx, rx) = mpsc::unbounded_channel();
            let os_watcher = subscribe(watch, tx)?;
            let state = WatchState {
                watch: watch.clone(),
                filter: filter.clone(),
                submitter: Arc::clone(&self.submitter),
                clock: Arc::clone(&self.clock),
                dropped: Arc::clone(&self.dropped),
            };
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                // The OS watcher must outlive the loop or events stop
                let _os_watcher = os_watcher;
                watch_loop(state, rx, token).await;
            }));
        }
        tracing::info!(watches = handles.len(), "file watcher started");
        *running = Some((token, handles));
        Ok(())
    }

    /// Stops all watch loops.
    pub fn stop(&self) {
        let mut running = self.running.lock().unwrap();
        if let Some((token, handles)) = running.take() {
            token.cancel();
            for handle in handles {
                handle.abort();
            }
            tracing::info!("file watcher stopped");
        }
    }

    /// Number of events dropped by per-minute rate caps.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FileWatcherService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn subscribe(
    watch: &FileWatch,
    tx: mpsc::UnboundedSender<FileEvent>,
) -> Result<RecommendedWatcher, WatcherError> {
    let mut os_watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                if let Some(kind) = map_kind(&event.kind) {
                    for path in event.paths {
                        let _ = tx.send(FileEvent { path, kind });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "filesystem notification error");
            }
        }
    })
    .map_err(|e| WatcherError::SubscribeFailed {
        name: watch.name.clone(),
        reason: e.to_string(),
    })?;

    let mode = if watch.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    for root in &watch.paths {
        os_watcher
            .watch(root, mode)
            .map_err(|e| WatcherError::SubscribeFailed {
                name: watch.name.clone(),
                reason: format!("{}: {e}", root.display()),
            })?;
    }
    Ok(os_watcher)
}

struct WatchState {
    watch: FileWatch,
    filter: EventFilter,
    submitter: Arc<dyn RunSubmitter>,
    clock: Arc<dyn Clock>,
    dropped: Arc<AtomicU64>,
}

/// Tracks submissions within the current one-minute window.
struct RateWindow {
    started: Option<DateTime<Utc>>,
    count: u32,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            started: None,
            count: 0,
        }
    }

    /// Returns how many of `wanted` submissions the cap admits right now.
    fn admit(&mut self, cap: Option<u32>, wanted: u32, now: DateTime<Utc>) -> u32 {
        let Some(cap) = cap else { return wanted };
        match self.started {
            Some(started) if (now - started) < chrono::Duration::seconds(60) => {}
            _ => {
                self.started = Some(now);
                self.count = 0;
            }
        }
        let admitted = wanted.min(cap.saturating_sub(self.count));
        self.count += admitted;
        admitted
    }
}

async fn watch_loop(
    state: WatchState,
    mut rx: mpsc::UnboundedReceiver<FileEvent>,
    token: CancellationToken,
) {
    let debounce = Duration::from_millis(state.watch.debounce_ms);
    let mut pending: BTreeMap<std::path::PathBuf, FileEvent> = BTreeMap::new();
    let mut deadline: Option<tokio::time::Instant> = None;
    let mut window = RateWindow::new();

    loop {
        tokio::select! {
            () = token.cancelled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                if !state.watch.wants(event.kind) {
                    continue;
                }
                if !state.filter.matches(&event.path) {
                    continue;
                }
                pending.insert(event.path.clone(), event);
                deadline = Some(tokio::time::Instant::now() + debounce);
            }
            () = sleep_until_opt(deadline), if deadline.is_some() => {
                deadline = None;
                let events: Vec<FileEvent> = std::mem::take(&mut pending).into_values().collect();
                if !events.is_empty() {
                    flush(&state, &mut window, events).await;
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn event_json(event: &FileEvent) -> JsonValue {
    serde_json::json!({
        "path": event.path.display().to_string(),
        "event": event.kind.to_string(),
    })
}

async fn flush(state: &WatchState, window: &mut RateWindow, events: Vec<FileEvent>) {
    let now = state.clock.now();
    let cap = state.watch.max_triggers_per_minute;

    if state.watch.batch_mode {
        if window.admit(cap, 1, now) == 0 {
            state.dropped.fetch_add(events.len() as u64, Ordering::Relaxed);
            tracing::warn!(
                watch = %state.watch.name,
                dropped = events.len(),
                "rate cap dropped batched file events"
            );
            return;
        }
        let mut inputs = state.watch.inputs.clone();
        inputs.insert(
            "events".to_string(),
            JsonValue::Array(events.iter().map(event_json).collect()),
        );
        inputs.insert(
            "_watch".to_string(),
            JsonValue::String(state.watch.name.clone()),
        );
        submit(state, inputs).await;
        return;
    }

    let admitted = window.admit(cap, events.len() as u32, now) as usize;
    let dropped = events.len() - admitted;
    if dropped > 0 {
        state.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        tracing::warn!(
            watch = %state.watch.name,
            dropped,
            "rate cap dropped file events"
        );
    }
    for event in events.into_iter().take(admitted) {
        let mut inputs = state.watch.inputs.clone();
        inputs.insert(
            "path".to_string(),
            JsonValue::String(event.path.display().to_string()),
        );
        inputs.insert(
            "event".to_string(),
            JsonValue::String(event.kind.to_string()),
        );
        inputs.insert(
            "_watch".to_string(),
            JsonValue::String(state.watch.name.clone()),
        );
        submit(state, inputs).await;
    }
}

async fn submit(state: &WatchState, inputs: HashMap<String, JsonValue>) {
    match state.submitter.submit(&state.watch.workflow, inputs).await {
        Ok(run_id) => {
            tracing::info!(
                watch = %state.watch.name,
                workflow = %state.watch.workflow,
                run_id = %run_id,
                "file event submitted run"
            );
        }
        Err(e) => {
            tracing::warn!(
                watch = %state.watch.name,
                workflow = %state.watch.workflow,
                error = %e,
                "file event submission failed"
            );
        }
    }
}
