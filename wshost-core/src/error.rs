//! Error types for wshost-core

use thiserror::Error;

use crate::host::state::ServerState;

/// Top-level error type for wshost-core
#[derive(Error, Debug)]
pub enum WsHostError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised when admitting sessions into a registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry is not accepting sessions in state: {0}")]
    NotAccepting(ServerState),

    #[error("Session capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },

    #[error("Session is already registered as {0}")]
    AlreadyRegistered(String),
}

/// Errors related to a single session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session is closed")]
    Closed,

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Errors reported by the transport behind a session
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection is gone")]
    Gone,

    #[error("Failed to send: {0}")]
    SendFailed(String),

    #[error("Failed to close: {0}")]
    CloseFailed(String),
}

/// Errors from behavior factories and initializers
#[derive(Error, Debug)]
pub enum BehaviorError {
    #[error("Factory failed: {0}")]
    Factory(String),

    #[error("Initializer failed: {0}")]
    Initializer(String),
}

/// Errors from the endpoint state machine
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: ServerState, to: ServerState },
}

/// Errors from a service host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Behavior error: {0}")]
    Behavior(#[from] BehaviorError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Invalid close parameters: {0}")]
    InvalidClose(String),
}

/// Errors from the multi-path service manager
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("A service is already registered at {0}")]
    DuplicatePath(String),

    #[error("No service is registered at {0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Errors loading host configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_not_accepting_displays_state() {
        let error = RegistryError::NotAccepting(ServerState::Ready);
        assert!(error.to_string().contains("not accepting"));
        assert!(error.to_string().contains("ready"));
    }

    #[test]
    fn registry_error_capacity_displays_max() {
        let error = RegistryError::CapacityExceeded { max: 8 };
        assert!(error.to_string().contains("max 8"));
    }

    #[test]
    fn session_error_not_found_displays_correctly() {
        let error = SessionError::NotFound("abc123".to_string());
        assert!(error.to_string().contains("Session not found"));
        assert!(error.to_string().contains("abc123"));
    }

    #[test]
    fn state_error_displays_both_states() {
        let error = StateError::InvalidTransition {
            from: ServerState::Stop,
            to: ServerState::Start,
        };
        assert!(error.to_string().contains("from stop to start"));
    }

    #[test]
    fn session_error_converts_from_connection_error() {
        let session_error: SessionError = ConnectionError::Gone.into();
        assert!(matches!(session_error, SessionError::Connection(_)));
    }

    #[test]
    fn host_error_converts_from_behavior_error() {
        let host_error: HostError = BehaviorError::Factory("boom".to_string()).into();
        assert!(matches!(host_error, HostError::Behavior(_)));
        assert!(host_error.to_string().contains("boom"));
    }

    #[test]
    fn wshost_error_converts_from_registry_error() {
        let error: WsHostError = RegistryError::CapacityExceeded { max: 1 }.into();
        assert!(matches!(error, WsHostError::Registry(_)));
        assert!(error.to_string().contains("Registry error"));
    }

    #[test]
    fn service_error_converts_from_host_error() {
        let host_error = HostError::InvalidClose("too long".to_string());
        let error: ServiceError = host_error.into();
        assert!(matches!(error, ServiceError::Host(_)));
    }
}
