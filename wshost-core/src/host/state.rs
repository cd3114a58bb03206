//! Endpoint lifecycle state and the configuration guard
//!
//! Every configuration mutator goes through [`EndpointState::with_available`],
//! which holds the state lock while the mutation runs so a concurrent
//! transition cannot slip in between the check and the write.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateError;

/// Lifecycle state of an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Configurable, not yet accepting sessions
    #[default]
    Ready,
    /// Accepting sessions
    Start,
    /// Closing sessions and draining the registry
    ShuttingDown,
    /// Terminal
    Stop,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Start => "start",
            Self::ShuttingDown => "shutting down",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

impl ServerState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::Start)
                | (Self::Start, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stop)
        )
    }

    /// Reason this state rejects an operation, or `None` if it is tolerated.
    pub fn check_if_available(
        self,
        ready: bool,
        start: bool,
        shutting_down_or_stop: bool,
    ) -> Option<String> {
        let allowed = match self {
            Self::Ready => ready,
            Self::Start => start,
            Self::ShuttingDown | Self::Stop => shutting_down_or_stop,
        };
        (!allowed).then(|| format!("This operation is not available in: {self}"))
    }
}

/// Shared, lock-guarded lifecycle cell
#[derive(Debug, Default)]
pub struct EndpointState {
    current: Mutex<ServerState>,
}

impl EndpointState {
    /// Create a state cell in [`ServerState::Ready`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn get(&self) -> ServerState {
        *self.current.lock()
    }

    /// Guard check against the current state
    pub fn check_if_available(
        &self,
        ready: bool,
        start: bool,
        shutting_down_or_stop: bool,
    ) -> Option<String> {
        self.current
            .lock()
            .check_if_available(ready, start, shutting_down_or_stop)
    }

    /// Run `f` only if the current state is tolerated, holding the state lock
    /// for the duration of `f`.
    ///
    /// `f` must not call back into this cell.
    pub fn with_available<R>(
        &self,
        ready: bool,
        start: bool,
        shutting_down_or_stop: bool,
        f: impl FnOnce() -> R,
    ) -> Result<R, String> {
        let guard = self.current.lock();
        if let Some(reason) = guard.check_if_available(ready, start, shutting_down_or_stop) {
            return Err(reason);
        }
        let result = f();
        drop(guard);
        Ok(result)
    }

    /// Move from `from` to `to`, failing if the cell is not in `from` or the
    /// transition is illegal.
    pub fn transition(&self, from: ServerState, to: ServerState) -> Result<(), StateError> {
        let mut current = self.current.lock();
        if *current != from || !from.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                from: *current,
                to,
            });
        }
        debug!("Endpoint state: {} -> {}", *current, to);
        *current = to;
        Ok(())
    }
}
