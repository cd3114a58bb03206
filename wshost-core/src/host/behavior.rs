//! Behavior trait and the deferred factory/initializer seams
//!
//! A host manufactures one behavior per connection: the factory is invoked
//! first, then the optional initializer, both before the session is
//! registered. Closures implement both traits.

use crate::error::BehaviorError;
use crate::session::connection::CloseCode;

/// Per-connection application logic
///
/// Hooks take `&self`; implementations that keep state use interior
/// mutability.
pub trait Behavior: Send + Sync + 'static {
    /// Called once after the session has been registered
    fn on_open(&self, _session_id: &str) {}

    /// Called once when the session is first asked to close
    fn on_close(&self, _code: CloseCode, _reason: &str) {}
}

/// Factory for creating behaviors
///
/// Enables dependency injection of behavior implementations.
pub trait BehaviorFactory<B>: Send + Sync {
    /// Create a new, fully constructed behavior instance
    fn create(&self) -> Result<B, BehaviorError>;
}

impl<B, F> BehaviorFactory<B> for F
where
    F: Fn() -> Result<B, BehaviorError> + Send + Sync,
{
    fn create(&self) -> Result<B, BehaviorError> {
        self()
    }
}

/// Post-construction hook applied to every freshly created behavior
pub trait BehaviorInitializer<B>: Send + Sync {
    /// Prepare the behavior before it is attached to a session
    fn apply(&self, behavior: &mut B) -> Result<(), BehaviorError>;
}

impl<B, F> BehaviorInitializer<B> for F
where
    F: Fn(&mut B) -> Result<(), BehaviorError> + Send + Sync,
{
    fn apply(&self, behavior: &mut B) -> Result<(), BehaviorError> {
        self(behavior)
    }
}
