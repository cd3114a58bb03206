//! Sessions and the registry that tracks them

pub mod connection;
pub mod mock;
pub mod registry;
pub mod state;
mod sweep;

// Re-export key types for convenience
pub use connection::{CloseCode, Connection, MAX_CLOSE_REASON_LEN, Payload};
pub use mock::{CloseBehavior, MockConnection};
pub use registry::{BroadcastReport, SessionRegistry};
pub use state::Session;
