//! Single-leader election over a shared Postgres database.
//!
//! Every candidate periodically attempts a non-blocking
//! `pg_try_advisory_lock` on a fixed lock id. The lock is session-scoped, so
//! the elector holds one dedicated connection for as long as it is leader;
//! losing that connection loses the lock, and the next verification tick
//! demotes. Leadership changes are edge-triggered: subscribers are invoked
//! serially, only on change.

use crate::error::LeaderError;
use sqlx::postgres::PgPool;
use sqlx::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Callback invoked on leadership change. `true` means leadership gained.
pub type LeadershipCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Default advisory lock id shared by all conductor instances.
pub const DEFAULT_LOCK_ID: i64 = 0x636f_6e64; // "cond"

/// Default tick between acquisition attempts and held-lock verification.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Tracks leadership state and fires edge-triggered callbacks.
#[derive(Default)]
pub(crate) struct LeadershipState {
    is_leader: AtomicBool,
    callbacks: Mutex<Vec<LeadershipCallback>>,
}

impl LeadershipState {
    pub(crate) fn subscribe(&self, callback: LeadershipCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Records the observed state; fires callbacks only when it changed.
    pub(crate) fn observe(&self, leader: bool) {
        let previous = self.is_leader.swap(leader, Ordering::SeqCst);
        if previous == leader {
            return;
        }
        let callbacks = self.callbacks.lock().unwrap().clone();
        for callback in callbacks {
            callback(leader);
        }
    }
}

/// Elects at most one leader across all conductor instances sharing a
/// Postgres database.
pub struct LeaderElector {
    pool: PgPool,
    lock_id: i64,
    tick: Duration,
    state: Arc<LeadershipState>,
    stop: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElector {
    /// Creates an elector using the default lock id and tick.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_options(pool, DEFAULT_LOCK_ID, DEFAULT_TICK)
    }

    /// Creates an elector with an explicit lock id and tick interval.
    #[must_use]
    pub fn with_options(pool: PgPool, lock_id: i64, tick: Duration) -> Self {
        Self {
            pool,
            lock_id,
            tick,
            state: Arc::new(LeadershipState::default()),
            stop: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Registers a leadership-change subscriber.
    ///
    /// Callbacks run serially from the election loop, only on change, in
    /// the order (gained, lost, gained, ...).
    pub fn on_leadership_change(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.state.subscribe(Arc::new(callback));
    }

    /// Returns true while this instance holds leadership.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Starts the election loop.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if called twice.
    pub fn start(&self) -> Result<(), LeaderError> {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return Err(LeaderError::AlreadyStarted);
        }

        let pool = self.pool.clone();
        let lock_id = self.lock_id;
        let tick = self.tick;
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);

        *handle = Some(tokio::spawn(async move {
            election_loop(pool, lock_id, tick, state, stop).await;
        }));
        Ok(())
    }

    /// Stops the election loop, releasing the lock if held.
    pub async fn stop(&self) {
        self.stop.notify_one();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn election_loop(
    pool: PgPool,
    lock_id: i64,
    tick: Duration,
    state: Arc<LeadershipState>,
    stop: Arc<Notify>,
) {
    // The advisory lock is bound to this connection's session. Held only
    // while leader; dropped (and thus released server-side) on demotion.
    let mut conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>> = None;
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.notified() => break,
            _ = interval.tick() => {}
        }

        if state.is_leader() {
            // The lock lives exactly as long as the session: a live
            // connection still holds it, a dead one has lost it.
            let alive = match conn.as_mut() {
                Some(conn) => conn.ping().await.is_ok(),
                None => false,
            };
            if !alive {
                tracing::warn!(lock_id, "leadership lost: election connection died");
                conn = None;
                state.observe(false);
            }
            continue;
        }

        match try_acquire(&pool, lock_id).await {
            Ok(Some(acquired_conn)) => {
                tracing::info!(lock_id, "leadership acquired");
                conn = Some(acquired_conn);
                state.observe(true);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, lock_id, "leader election attempt failed");
            }
        }
    }

    if state.is_leader() {
        if let Some(mut conn) = conn.take() {
            let released: Result<(bool,), sqlx::Error> =
                sqlx::query_as("SELECT pg_advisory_unlock($1)")
                    .bind(lock_id)
                    .fetch_one(&mut *conn)
                    .await;
            if let Err(e) = released {
                tracing::warn!(error = %e, lock_id, "failed to release advisory lock");
            }
        }
        state.observe(false);
    }
}

/// Attempts a non-blocking lock acquisition on a fresh connection.
///
/// Returns the connection now holding the lock, or `None` when another
/// instance is leader.
async fn try_acquire(
    pool: &PgPool,
    lock_id: i64,
) -> Result<Option<sqlx::pool::PoolConnection<sqlx::Postgres>>, LeaderError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| LeaderError::ConnectionFailed {
            reason: e.to_string(),
        })?;

    let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .bind(lock_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| LeaderError::LockFailed {
            reason: e.to_string(),
        })?;

    Ok(acquired.then_some(conn))
}
