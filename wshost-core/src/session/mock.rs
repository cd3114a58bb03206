//! Mock connection for testing
//!
//! MockConnection stands in for the transport layer so registry and host
//! logic can be tested without sockets. Its close behavior is scriptable:
//! graceful, stubborn (acknowledges but stays open), failing, or hanging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::connection::{CloseCode, Connection, Payload};
use crate::error::ConnectionError;

/// How a [`MockConnection`] reacts to `close`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseBehavior {
    /// Close succeeds and the connection goes dead
    Graceful,
    /// Close succeeds but the connection stays alive
    Stubborn,
    /// Close returns an error and the connection stays alive
    Fail,
    /// Close never completes
    Hang,
}

/// Scriptable in-memory implementation of [`Connection`]
pub struct MockConnection {
    alive: AtomicBool,
    fail_sends: AtomicBool,
    close_behavior: CloseBehavior,
    sent: Mutex<Vec<Payload>>,
    closes: Mutex<Vec<(CloseCode, String)>>,
}

impl MockConnection {
    /// A live connection that closes gracefully
    pub fn new() -> Self {
        Self::with_close_behavior(CloseBehavior::Graceful)
    }

    /// A live connection with the given close behavior
    pub fn with_close_behavior(close_behavior: CloseBehavior) -> Self {
        Self {
            alive: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            close_behavior,
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
        }
    }

    /// A connection that acknowledges close but never goes dead
    pub fn stubborn() -> Self {
        Self::with_close_behavior(CloseBehavior::Stubborn)
    }

    /// A connection whose close always errors
    pub fn failing_close() -> Self {
        Self::with_close_behavior(CloseBehavior::Fail)
    }

    /// A connection whose close never returns
    pub fn hanging_close() -> Self {
        Self::with_close_behavior(CloseBehavior::Hang)
    }

    /// Weak, type-erased handle suitable for [`crate::Session::new`]
    pub fn handle(connection: &Arc<Self>) -> Weak<dyn Connection> {
        let weak: Weak<Self> = Arc::downgrade(connection);
        weak
    }

    /// Flip the liveness flag
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Make every subsequent send fail (or succeed again)
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    /// Payloads delivered so far
    pub fn sent(&self) -> Vec<Payload> {
        self.sent.lock().clone()
    }

    /// Close requests received so far
    pub fn closes(&self) -> Vec<(CloseCode, String)> {
        self.closes.lock().clone()
    }

    /// Number of close requests received
    pub fn close_count(&self) -> usize {
        self.closes.lock().len()
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn send(&self, payload: &Payload) -> Result<(), ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::Gone);
        }
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(ConnectionError::SendFailed("scripted failure".to_string()));
        }
        self.sent.lock().push(payload.clone());
        Ok(())
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), ConnectionError> {
        self.closes.lock().push((code, reason.to_string()));
        match self.close_behavior {
            CloseBehavior::Graceful => {
                self.set_alive(false);
                Ok(())
            }
            CloseBehavior::Stubborn => Ok(()),
            CloseBehavior::Fail => Err(ConnectionError::CloseFailed("scripted failure".to_string())),
            CloseBehavior::Hang => std::future::pending().await,
        }
    }
}
