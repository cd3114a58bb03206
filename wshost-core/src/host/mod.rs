//! Service hosts, their lifecycle and the multi-path manager

pub mod behavior;
pub mod manager;
pub mod service;
pub mod state;

// Re-export key types for convenience
pub use behavior::{Behavior, BehaviorFactory, BehaviorInitializer};
pub use manager::{ServiceManager, normalize_path};
pub use service::{Endpoint, ServiceHost};
pub use state::{EndpointState, ServerState};
