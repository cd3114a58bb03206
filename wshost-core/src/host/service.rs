//! ServiceHost: the per-path facade over one session registry
//!
//! A host manufactures a behavior for every inbound connection (factory,
//! then optional initializer), wraps it in a [`Session`] and registers it.
//! Its configuration setters are gated on the Ready state; rejected values
//! are logged and discarded, never returned as errors.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::{HostConfig, check_wait_time};
use crate::error::HostError;
use crate::session::connection::{CloseCode, Connection, Payload, check_close_parameters};
use crate::session::registry::{BroadcastReport, SessionRegistry};
use crate::session::state::Session;

use super::behavior::{Behavior, BehaviorFactory, BehaviorInitializer};
use super::state::ServerState;

/// Type-erased view of a host, as held by the service manager
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Path this endpoint is mounted at
    fn path(&self) -> &str;

    /// Name of the behavior type this endpoint produces
    fn type_name(&self) -> &'static str;

    /// Current lifecycle state
    fn state(&self) -> ServerState;

    /// Whether dead sessions are swept periodically
    fn keep_clean(&self) -> bool;

    /// Ready-gated setter; rejections are logged
    fn set_keep_clean(&self, value: bool);

    /// Shutdown drain bound
    fn wait_time(&self) -> Duration;

    /// Ready-gated setter; rejections are logged
    fn set_wait_time(&self, value: Duration);

    /// Apply a whole configuration (Ready only); rejections are logged
    fn apply_config(&self, config: &HostConfig);

    /// Begin accepting sessions
    fn start(&self) -> Result<(), HostError>;

    /// Close every session and stop. Returns whether the registry drained.
    async fn stop(&self, code: CloseCode, reason: &str) -> Result<bool, HostError>;

    /// Number of registered sessions
    async fn session_count(&self) -> usize;

    /// Deliver a payload to every session of this endpoint
    async fn broadcast(&self, payload: &Payload) -> BroadcastReport;
}

/// Hosts the sessions of one endpoint path for behavior type `B`
pub struct ServiceHost<B> {
    path: String,
    factory: Arc<dyn BehaviorFactory<B>>,
    initializer: Option<Arc<dyn BehaviorInitializer<B>>>,
    sessions: SessionRegistry<B>,
}

impl<B: Behavior> ServiceHost<B> {
    /// Create a host with the default configuration
    pub fn new(path: impl Into<String>, factory: impl BehaviorFactory<B> + 'static) -> Self {
        Self {
            path: path.into(),
            factory: Arc::new(factory),
            initializer: None,
            sessions: SessionRegistry::new(&HostConfig::default()),
        }
    }

    /// Run `initializer` on every behavior right after the factory
    pub fn with_initializer(mut self, initializer: impl BehaviorInitializer<B> + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Builder form of [`ServiceHost::apply_config`]
    pub fn with_config(self, config: &HostConfig) -> Self {
        self.apply_config(config);
        self
    }

    // ==================== Accessors ====================

    /// Path this host is mounted at
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The session registry
    pub fn sessions(&self) -> &SessionRegistry<B> {
        &self.sessions
    }

    /// Name of the behavior type this host produces
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<B>()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.sessions.state().get()
    }

    // ==================== Configuration ====================

    /// Whether dead sessions are swept periodically
    pub fn keep_clean(&self) -> bool {
        self.sessions.keep_clean()
    }

    /// Enable or disable the sweep (Ready only)
    pub fn set_keep_clean(&self, value: bool) {
        self.set_guarded(|| None, || self.sessions.set_keep_clean(value));
    }

    /// Shutdown drain bound
    pub fn wait_time(&self) -> Duration {
        self.sessions.wait_time()
    }

    /// Set the shutdown drain bound (Ready only, strictly positive)
    pub fn set_wait_time(&self, value: Duration) {
        self.set_guarded(
            || check_wait_time(value),
            || self.sessions.set_wait_time(value),
        );
    }

    /// Period between sweeps
    pub fn sweep_interval(&self) -> Duration {
        self.sessions.sweep_interval()
    }

    /// Set the sweep period (Ready only, strictly positive)
    pub fn set_sweep_interval(&self, value: Duration) {
        self.set_guarded(
            || {
                value
                    .is_zero()
                    .then(|| "A sweep interval is zero or less.".to_string())
            },
            || self.sessions.set_sweep_interval(value),
        );
    }

    /// Apply a whole configuration (Ready only, validated first)
    pub fn apply_config(&self, config: &HostConfig) {
        self.set_guarded(
            || config.validate().err().map(|e| e.to_string()),
            || self.sessions.apply_config(config),
        );
    }

    /// Check the Ready gate, then the value, then apply `set` while the state
    /// lock is held.
    fn set_guarded(&self, validate: impl FnOnce() -> Option<String>, set: impl FnOnce()) {
        let result = self.sessions.state().with_available(true, false, false, || {
            if let Some(reason) = validate() {
                return Err(reason);
            }
            set();
            Ok(())
        });
        if let Err(reason) | Ok(Err(reason)) = result {
            error!(path = %self.path, "{reason}");
        }
    }

    // ==================== Sessions ====================

    /// Run the factory and then the initializer, if any
    pub fn create_behavior(&self) -> Result<B, HostError> {
        let mut behavior = self.factory.create()?;
        if let Some(initializer) = &self.initializer {
            initializer.apply(&mut behavior)?;
        }
        Ok(behavior)
    }

    /// Build an unregistered session for a newly upgraded connection.
    ///
    /// A factory or initializer failure is returned and nothing is
    /// registered.
    pub fn create_session(&self, connection: Weak<dyn Connection>) -> Result<Session<B>, HostError> {
        let behavior = self.create_behavior().inspect_err(|e| {
            warn!(path = %self.path, error = %e, "failed to create behavior");
        })?;
        Ok(Session::new(behavior, connection))
    }

    /// Create, register and open a session for a newly upgraded connection
    pub async fn accept(&self, connection: Weak<dyn Connection>) -> Result<Arc<Session<B>>, HostError> {
        let session = Arc::new(self.create_session(connection)?);
        let id = self.sessions.add(Arc::clone(&session)).await?;
        debug!(path = %self.path, session_id = %id, "session opened");
        session.behavior().on_open(&id);
        Ok(session)
    }

    // ==================== Lifecycle ====================

    /// Ready -> Start. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), HostError> {
        self.sessions.start()?;
        info!(path = %self.path, behavior = self.type_name(), "service started");
        Ok(())
    }

    /// Close every session with `code`/`reason`, wait up to the wait time for
    /// the registry to drain, then stop.
    ///
    /// Returns whether the registry drained before the wait time elapsed.
    pub async fn stop(&self, code: CloseCode, reason: &str) -> Result<bool, HostError> {
        if let Some(msg) = check_close_parameters(code, reason) {
            return Err(HostError::InvalidClose(msg));
        }
        let drained = self.sessions.stop(code, reason).await?;
        info!(path = %self.path, drained, "service stopped");
        Ok(drained)
    }
}

#[async_trait]
impl<B: Behavior> Endpoint for ServiceHost<B> {
    fn path(&self) -> &str {
        ServiceHost::path(self)
    }

    fn type_name(&self) -> &'static str {
        ServiceHost::type_name(self)
    }

    fn state(&self) -> ServerState {
        ServiceHost::state(self)
    }

    fn keep_clean(&self) -> bool {
        ServiceHost::keep_clean(self)
    }

    fn set_keep_clean(&self, value: bool) {
        ServiceHost::set_keep_clean(self, value);
    }

    fn wait_time(&self) -> Duration {
        ServiceHost::wait_time(self)
    }

    fn set_wait_time(&self, value: Duration) {
        ServiceHost::set_wait_time(self, value);
    }

    fn apply_config(&self, config: &HostConfig) {
        ServiceHost::apply_config(self, config);
    }

    fn start(&self) -> Result<(), HostError> {
        ServiceHost::start(self)
    }

    async fn stop(&self, code: CloseCode, reason: &str) -> Result<bool, HostError> {
        ServiceHost::stop(self, code, reason).await
    }

    async fn session_count(&self) -> usize {
        self.sessions.count().await
    }

    async fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        self.sessions.broadcast(payload).await
    }
}
