//! Session struct
//!
//! A Session pairs one behavior instance with one transport connection. The
//! connection is held weakly: the transport owns it, and a session whose
//! connection has been dropped is simply not alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ConnectionError, SessionError};
use crate::host::behavior::Behavior;

use super::connection::{CloseCode, Connection, Payload};

/// A behavior bound to a live connection
pub struct Session<B> {
    /// Assigned once, when the registry accepts the session
    id: OnceLock<String>,
    /// Application logic for this connection
    behavior: B,
    /// Transport handle (owned by the transport)
    connection: Weak<dyn Connection>,
    /// Set by the first `close`
    closed: AtomicBool,
    /// When the session was created
    connected_at: Instant,
}

impl<B: Behavior> Session<B> {
    /// Create an unregistered session
    pub fn new(behavior: B, connection: Weak<dyn Connection>) -> Self {
        Self {
            id: OnceLock::new(),
            behavior,
            connection,
            closed: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    /// Session ID, or `None` until registered
    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    /// The behavior driving this session
    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Whether the underlying connection is still usable
    pub fn is_alive(&self) -> bool {
        self.connection
            .upgrade()
            .is_some_and(|connection| connection.is_alive())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// When the session was created
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Deliver a payload to the peer
    pub async fn send(&self, payload: &Payload) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let connection = self.connection.upgrade().ok_or(ConnectionError::Gone)?;
        connection.send(payload).await?;
        Ok(())
    }

    /// Ping the peer. A session without a connection answers `false`.
    pub async fn ping(&self) -> bool {
        match self.connection.upgrade() {
            Some(connection) => connection.ping().await,
            None => false,
        }
    }

    /// Ask the connection to close.
    ///
    /// Only the first call has any effect. Transport failures are logged,
    /// never returned.
    pub async fn close(&self, code: CloseCode, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let session_id = self.id().unwrap_or("unregistered");
        self.behavior.on_close(code, reason);

        let Some(connection) = self.connection.upgrade() else {
            debug!(session_id, "connection already gone, nothing to close");
            return;
        };

        if let Err(e) = connection.close(code, reason).await {
            warn!(session_id, error = %e, "failed to close session");
        }
    }

    /// Bind the registry-assigned ID. Fails if an ID is already bound.
    pub(crate) fn assign_id(&self, id: String) -> Result<(), String> {
        self.id.set(id)
    }
}
