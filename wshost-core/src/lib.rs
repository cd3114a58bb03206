//! wshost-core: WebSocket session hosting
//!
//! This crate provides the server-side bookkeeping behind WebSocket endpoints:
//!
//! - **Service hosts** - [`ServiceHost`] manufactures a behavior for every
//!   inbound connection and registers the resulting [`Session`]
//! - **Session registry** - [`SessionRegistry`] for lookup, broadcast,
//!   periodic sweeping of dead sessions and bounded shutdown
//! - **Service manager** - [`ServiceManager`] hosts several endpoint paths and
//!   drives their lifecycles together
//! - **Transport seam** - the [`Connection`] trait, with [`MockConnection`] for
//!   tests
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use wshost_core::{Behavior, BehaviorError, CloseCode, MockConnection, Payload, ServiceHost};
//!
//! struct Echo;
//!
//! impl Behavior for Echo {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = ServiceHost::new("/echo", || -> Result<Echo, BehaviorError> { Ok(Echo) });
//!     host.start()?;
//!
//!     let connection = Arc::new(MockConnection::new());
//!     let _session = host.accept(MockConnection::handle(&connection)).await?;
//!     let report = host.sessions().broadcast(&Payload::from("hello")).await;
//!     assert_eq!(report.delivered, 1);
//!
//!     host.stop(CloseCode::Normal, "bye").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ServiceManager                │
//! │  ┌────────────────────────────────────────┐  │
//! │  │          ServiceHost (per path)        │  │
//! │  │  factory + initializer ─▶ Session<B>   │  │
//! │  │  ┌──────────────────────────────────┐  │  │
//! │  │  │  SessionRegistry   ◀── sweeper   │  │  │
//! │  │  └──────────────────────────────────┘  │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod session;

// Re-export key types for convenience
pub use config::HostConfig;
pub use error::{
    BehaviorError, ConfigError, ConnectionError, HostError, RegistryError, ServiceError,
    SessionError, StateError, WsHostError,
};
pub use host::{
    Behavior, BehaviorFactory, BehaviorInitializer, Endpoint, EndpointState, ServerState,
    ServiceHost, ServiceManager,
};
pub use session::{
    BroadcastReport, CloseBehavior, CloseCode, Connection, MockConnection, Payload, Session,
    SessionRegistry,
};
