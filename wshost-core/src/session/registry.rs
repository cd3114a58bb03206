//! SessionRegistry for tracking the live sessions of one endpoint
//!
//! The map is the only lock-protected resource. Structural changes hold the
//! write lock just for the insert/remove; broadcast, close-all, ping and sweep
//! copy the `Arc`s under the read lock and do their I/O after releasing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::error::{RegistryError, SessionError, StateError};
use crate::host::behavior::Behavior;
use crate::host::state::{EndpointState, ServerState};

use super::connection::{CloseCode, Payload};
use super::state::Session;
use super::sweep;

/// Map state shared with the background sweeper
pub(crate) struct Shared<B> {
    /// Active sessions indexed by ID
    pub(crate) sessions: RwLock<HashMap<String, Arc<Session<B>>>>,
    /// Set while a sweep is running
    pub(crate) sweeping: AtomicBool,
    /// Signalled whenever a removal leaves the map empty
    pub(crate) drained: Notify,
}

impl<B> Shared<B> {
    fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sweeping: AtomicBool::new(false),
            drained: Notify::new(),
        }
    }

    pub(crate) async fn snapshot(&self) -> Vec<(String, Arc<Session<B>>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), Arc::clone(session)))
            .collect()
    }

    /// Remove `ids` under a single write lock, returning how many were present
    pub(crate) async fn remove_many(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write().await;
        let removed = ids.iter().filter(|id| sessions.remove(*id).is_some()).count();
        if removed > 0 && sessions.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Drop every session without closing it
    pub(crate) async fn clear(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        self.drained.notify_waiters();
        count
    }

    /// Resolves once the map is empty
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            let _ = notified.as_mut().enable();
            if self.sessions.read().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl<B: Behavior> Shared<B> {
    /// Close every session concurrently, then evict those whose connection
    /// went away.
    pub(crate) async fn close_all(&self, code: CloseCode, reason: &str) {
        let snapshot = self.snapshot().await;
        if snapshot.is_empty() {
            return;
        }
        info!(count = snapshot.len(), %code, "closing all sessions");

        let _ = join_all(snapshot.iter().map(|(_, session)| session.close(code, reason))).await;

        let closed: Vec<String> = snapshot
            .into_iter()
            .filter(|(_, session)| !session.is_alive())
            .map(|(id, _)| id)
            .collect();
        let _ = self.remove_many(&closed).await;
    }
}

/// Result of delivering one payload to every session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of sessions that accepted the payload
    pub delivered: usize,
    /// Sessions whose delivery failed
    pub failed: Vec<String>,
}

impl BroadcastReport {
    /// Fold another report into this one
    pub fn merge(&mut self, other: BroadcastReport) {
        self.delivered += other.delivered;
        self.failed.extend(other.failed);
    }
}

/// Background sweep task and its cancellation handle
struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Concurrent-safe registry of the sessions of one endpoint
///
/// SessionRegistry provides:
/// - Session admission with unique IDs (only while started)
/// - Lookup, removal and snapshot iteration
/// - Broadcast and close-all with per-session failure isolation
/// - A periodic sweep evicting sessions whose connection is gone
/// - Bounded drain on shutdown
pub struct SessionRegistry<B> {
    shared: Arc<Shared<B>>,
    state: Arc<EndpointState>,
    keep_clean: watch::Sender<bool>,
    sweep_interval: watch::Sender<Duration>,
    wait_time: Mutex<Duration>,
    max_sessions: Mutex<Option<usize>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<B: Behavior> SessionRegistry<B> {
    /// Create an empty registry in [`ServerState::Ready`]
    pub fn new(config: &HostConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            state: Arc::new(EndpointState::new()),
            keep_clean: watch::Sender::new(config.keep_clean),
            sweep_interval: watch::Sender::new(config.sweep_interval()),
            wait_time: Mutex::new(config.wait_time()),
            max_sessions: Mutex::new(config.max_sessions),
            sweeper: Mutex::new(None),
        }
    }

    /// Lifecycle state shared with the owning host
    pub fn state(&self) -> &EndpointState {
        &self.state
    }

    // ==================== Configuration ====================

    /// Whether the periodic sweep is enabled
    pub fn keep_clean(&self) -> bool {
        *self.keep_clean.borrow()
    }

    /// Shutdown drain bound
    pub fn wait_time(&self) -> Duration {
        *self.wait_time.lock()
    }

    /// Period between sweeps
    pub fn sweep_interval(&self) -> Duration {
        *self.sweep_interval.borrow()
    }

    /// Session cap, if any
    pub fn max_sessions(&self) -> Option<usize> {
        *self.max_sessions.lock()
    }

    /// Toggle the sweep. A running sweeper stops scheduling on `false`
    /// (letting an in-flight sweep finish) and restarts its timer on `true`.
    pub(crate) fn set_keep_clean(&self, value: bool) {
        let _ = self.keep_clean.send_replace(value);
    }

    pub(crate) fn set_wait_time(&self, value: Duration) {
        *self.wait_time.lock() = value;
    }

    pub(crate) fn set_sweep_interval(&self, value: Duration) {
        let _ = self.sweep_interval.send_replace(value);
    }

    pub(crate) fn set_max_sessions(&self, value: Option<usize>) {
        *self.max_sessions.lock() = value;
    }

    pub(crate) fn apply_config(&self, config: &HostConfig) {
        self.set_keep_clean(config.keep_clean);
        self.set_wait_time(config.wait_time());
        self.set_sweep_interval(config.sweep_interval());
        self.set_max_sessions(config.max_sessions);
    }

    // ==================== Membership ====================

    /// Register a session and return its freshly generated ID
    pub async fn add(&self, session: Arc<Session<B>>) -> Result<String, RegistryError> {
        let mut sessions = self.shared.sessions.write().await;

        let state = self.state.get();
        if state != ServerState::Start {
            return Err(RegistryError::NotAccepting(state));
        }
        if let Some(max) = self.max_sessions() {
            if sessions.len() >= max {
                return Err(RegistryError::CapacityExceeded { max });
            }
        }

        let id = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        if session.assign_id(id.clone()).is_err() {
            let existing = session.id().unwrap_or_default().to_string();
            return Err(RegistryError::AlreadyRegistered(existing));
        }

        let _ = sessions.insert(id.clone(), session);
        debug!(session_id = %id, count = sessions.len(), "session registered");
        Ok(id)
    }

    /// Remove a session; returns whether it was present
    pub async fn remove(&self, id: &str) -> bool {
        let mut sessions = self.shared.sessions.write().await;
        let removed = sessions.remove(id).is_some();
        if removed {
            debug!(session_id = id, count = sessions.len(), "session removed");
            if sessions.is_empty() {
                self.shared.drained.notify_waiters();
            }
        }
        removed
    }

    /// Drop every session without closing it
    pub async fn clear(&self) -> usize {
        self.shared.clear().await
    }

    /// Look up a session by ID
    pub async fn get(&self, id: &str) -> Option<Arc<Session<B>>> {
        self.shared.sessions.read().await.get(id).cloned()
    }

    /// Number of registered sessions
    pub async fn count(&self) -> usize {
        self.shared.sessions.read().await.len()
    }

    /// Whether no sessions are registered
    pub async fn is_empty(&self) -> bool {
        self.shared.sessions.read().await.is_empty()
    }

    /// IDs of all registered sessions
    pub async fn ids(&self) -> Vec<String> {
        self.shared.sessions.read().await.keys().cloned().collect()
    }

    /// Snapshot of all registered sessions
    pub async fn sessions(&self) -> Vec<Arc<Session<B>>> {
        self.shared.sessions.read().await.values().cloned().collect()
    }

    /// IDs of sessions whose connection is alive
    pub async fn active_ids(&self) -> Vec<String> {
        self.ids_where(true).await
    }

    /// IDs of sessions whose connection is gone
    pub async fn inactive_ids(&self) -> Vec<String> {
        self.ids_where(false).await
    }

    async fn ids_where(&self, alive: bool) -> Vec<String> {
        self.shared
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, session)| session.is_alive() == alive)
            .map(|(id, _)| id)
            .collect()
    }

    // ==================== Delivery ====================

    /// Deliver a payload to every registered session.
    ///
    /// A failing session is logged and skipped; delivery to the rest continues.
    pub async fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        let snapshot = self.shared.snapshot().await;
        debug!(recipients = snapshot.len(), bytes = payload.len(), "broadcast");

        let mut report = BroadcastReport::default();
        for (id, session) in snapshot {
            match session.send(payload).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "failed to deliver broadcast");
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Deliver a payload to one session
    pub async fn send_to(&self, id: &str, payload: &Payload) -> Result<(), SessionError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.send(payload).await
    }

    /// Ping every session concurrently, returning liveness by ID
    pub async fn ping_all(&self) -> HashMap<String, bool> {
        let snapshot = self.shared.snapshot().await;
        let results = join_all(snapshot.iter().map(|(_, session)| session.ping())).await;
        snapshot
            .into_iter()
            .map(|(id, _)| id)
            .zip(results)
            .collect()
    }

    // ==================== Closing ====================

    /// Close one session, evicting it once its connection is gone
    pub async fn close_session(
        &self,
        id: &str,
        code: CloseCode,
        reason: &str,
    ) -> Result<(), SessionError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.close(code, reason).await;
        if !session.is_alive() {
            let _ = self.remove(id).await;
        }
        Ok(())
    }

    /// Close every session concurrently, then evict those whose connection
    /// went away. Sessions still alive stay registered.
    pub async fn close_all(&self, code: CloseCode, reason: &str) {
        self.shared.close_all(code, reason).await;
    }

    /// Wait until the registry is empty or `timeout` elapses.
    ///
    /// Returns `true` if the registry drained in time.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        time::timeout(timeout, self.shared.drained()).await.is_ok()
    }

    // ==================== Sweeping ====================

    /// Evict every session whose connection is not alive.
    ///
    /// Returns the number of sessions removed. A sweep requested while another
    /// is running is skipped.
    pub async fn sweep(&self) -> usize {
        sweep::sweep(&self.shared).await
    }

    // ==================== Lifecycle ====================

    /// Ready -> Start, spawning the background sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn start(&self) -> Result<(), StateError> {
        self.state.transition(ServerState::Ready, ServerState::Start)?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweep::run_sweeper(
            Arc::clone(&self.shared),
            self.keep_clean.subscribe(),
            self.sweep_interval.subscribe(),
            cancel.clone(),
        ));
        *self.sweeper.lock() = Some(Sweeper { cancel, handle });
        Ok(())
    }

    /// Start -> ShuttingDown -> Stop.
    ///
    /// Cancels the sweeper, closes every session and waits up to the wait time
    /// for the registry to drain. Sessions still registered after that are
    /// abandoned. Returns whether the registry drained in time.
    pub(crate) async fn stop(&self, code: CloseCode, reason: &str) -> Result<bool, StateError> {
        self.state
            .transition(ServerState::Start, ServerState::ShuttingDown)?;

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = &sweeper {
            sweeper.cancel.cancel();
        }

        // Detached: the registry reaches Stop even if this future is dropped.
        let handle = tokio::spawn(shutdown(
            Arc::clone(&self.shared),
            Arc::clone(&self.state),
            sweeper,
            self.wait_time(),
            code,
            reason.to_string(),
        ));
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "shutdown task ended abnormally");
                let _ = self.shared.clear().await;
                self.state
                    .transition(ServerState::ShuttingDown, ServerState::Stop)?;
                Ok(false)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> &Shared<B> {
        &self.shared
    }
}

impl<B> Drop for SessionRegistry<B> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.cancel.cancel();
        }
    }
}

/// Close, drain within `wait_time`, abandon leftovers, then ShuttingDown -> Stop
async fn shutdown<B: Behavior>(
    shared: Arc<Shared<B>>,
    state: Arc<EndpointState>,
    sweeper: Option<Sweeper>,
    wait_time: Duration,
    code: CloseCode,
    reason: String,
) -> Result<bool, StateError> {
    let drain = async {
        shared.close_all(code, &reason).await;
        shared.drained().await;
    };
    let drained = time::timeout(wait_time, drain).await.is_ok();
    if !drained {
        let remaining = shared.clear().await;
        warn!(
            remaining,
            ?wait_time,
            "sessions did not close in time, abandoning them"
        );
    }

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.handle.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
    }

    state.transition(ServerState::ShuttingDown, ServerState::Stop)?;
    Ok(drained)
}
