//! ServiceManager for hosting several endpoint paths at once
//!
//! The manager owns one [`ServiceHost`] per path, type-erased behind
//! [`Endpoint`], and drives their lifecycles together.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::error::{ConfigError, HostError, ServiceError};
use crate::session::connection::{CloseCode, Payload, check_close_parameters};
use crate::session::registry::BroadcastReport;

use super::behavior::{Behavior, BehaviorFactory, BehaviorInitializer};
use super::service::{Endpoint, ServiceHost};
use super::state::{EndpointState, ServerState};

/// Validate an endpoint path and trim its trailing slashes.
///
/// The root path stays `/`.
pub fn normalize_path(path: &str) -> Result<String, ServiceError> {
    let invalid = |reason: &str| ServiceError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if !path.starts_with('/') {
        return Err(invalid("not an absolute path"));
    }
    if path.contains(['?', '#']) {
        return Err(invalid("includes a query or fragment"));
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Hosts for every registered endpoint path
pub struct ServiceManager {
    /// Hosts indexed by normalized path
    hosts: Arc<RwLock<HashMap<String, Arc<dyn Endpoint>>>>,
    /// Lifecycle shared by all hosts
    state: Arc<EndpointState>,
    /// Configuration given to every new host
    default_config: HostConfig,
}

impl ServiceManager {
    /// Create a manager whose hosts use the default configuration
    pub fn new() -> Self {
        Self {
            hosts: Arc::new(RwLock::new(HashMap::new())),
            state: Arc::new(EndpointState::new()),
            default_config: HostConfig::default(),
        }
    }

    /// Create a manager whose hosts start from `config`
    pub fn with_config(config: HostConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            default_config: config,
            ..Self::new()
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Configuration new hosts receive
    pub fn default_config(&self) -> &HostConfig {
        &self.default_config
    }

    /// Register a host for `path`
    pub async fn add_service<B: Behavior>(
        &self,
        path: &str,
        factory: impl BehaviorFactory<B> + 'static,
    ) -> Result<Arc<ServiceHost<B>>, ServiceError> {
        let host = ServiceHost::new(normalize_path(path)?, factory);
        self.insert(host).await
    }

    /// Register a host for `path` whose behaviors are passed through
    /// `initializer` after creation
    pub async fn add_service_with_initializer<B: Behavior>(
        &self,
        path: &str,
        factory: impl BehaviorFactory<B> + 'static,
        initializer: impl BehaviorInitializer<B> + 'static,
    ) -> Result<Arc<ServiceHost<B>>, ServiceError> {
        let host = ServiceHost::new(normalize_path(path)?, factory).with_initializer(initializer);
        self.insert(host).await
    }

    async fn insert<B: Behavior>(
        &self,
        host: ServiceHost<B>,
    ) -> Result<Arc<ServiceHost<B>>, ServiceError> {
        let host = Arc::new(host.with_config(&self.default_config));
        let path = host.path().to_string();

        let mut hosts = self.hosts.write().await;
        let state = self.state.get();
        if let Some(reason) = state.check_if_available(true, true, false) {
            return Err(ServiceError::Unavailable(reason));
        }
        if hosts.contains_key(&path) {
            return Err(ServiceError::DuplicatePath(path));
        }
        if state == ServerState::Start {
            host.start()?;
        }

        let endpoint: Arc<dyn Endpoint> = host.clone();
        hosts.insert(path.clone(), endpoint);
        info!(path = %path, behavior = host.type_name(), "service added");
        Ok(host)
    }

    /// Detach the host at `path` and stop it with [`CloseCode::Away`].
    ///
    /// Returns `false` if no host was registered there.
    pub async fn remove_service(&self, path: &str) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        let Some(host) = self.hosts.write().await.remove(&path) else {
            return false;
        };

        if host.state() == ServerState::Start {
            if let Err(e) = host.stop(CloseCode::Away, "").await {
                warn!(path = %path, error = %e, "failed to stop removed service");
            }
        }
        info!(path = %path, "service removed");
        true
    }

    /// Host registered at `path`
    pub async fn host(&self, path: &str) -> Option<Arc<dyn Endpoint>> {
        let path = normalize_path(path).ok()?;
        self.hosts.read().await.get(&path).cloned()
    }

    /// Registered paths, sorted
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.hosts.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of registered hosts
    pub async fn count(&self) -> usize {
        self.hosts.read().await.len()
    }

    /// Sessions across every host
    pub async fn session_count(&self) -> usize {
        let hosts = self.endpoints().await;
        join_all(hosts.iter().map(|host| host.session_count()))
            .await
            .into_iter()
            .sum()
    }

    /// Start every registered host.
    ///
    /// Hosts that are already started are skipped. A host that fails to
    /// start is logged and does not prevent the others from starting.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let hosts = self.hosts.read().await;
        self.state.transition(ServerState::Ready, ServerState::Start)?;

        let mut failed = 0;
        for host in hosts.values() {
            if host.state() == ServerState::Start {
                debug!(path = %host.path(), "service already started");
                continue;
            }
            if let Err(e) = host.start() {
                warn!(path = %host.path(), error = %e, "failed to start service");
                failed += 1;
            }
        }
        info!(services = hosts.len(), failed, "service manager started");
        Ok(())
    }

    /// Stop every host concurrently with `code`/`reason`.
    ///
    /// Returns whether every host drained within its wait time.
    pub async fn stop(&self, code: CloseCode, reason: &str) -> Result<bool, ServiceError> {
        if let Some(msg) = check_close_parameters(code, reason) {
            return Err(HostError::InvalidClose(msg).into());
        }
        self.state
            .transition(ServerState::Start, ServerState::ShuttingDown)?;

        // Detached: the manager reaches Stop even if this future is dropped.
        let hosts = Arc::clone(&self.hosts);
        let state = Arc::clone(&self.state);
        let reason = reason.to_string();
        let shutdown = tokio::spawn(async move {
            let hosts: Vec<Arc<dyn Endpoint>> = hosts.read().await.values().cloned().collect();
            let results = join_all(hosts.iter().map(|host| host.stop(code, &reason))).await;

            let mut drained = true;
            for (host, result) in hosts.iter().zip(results) {
                match result {
                    Ok(host_drained) => drained &= host_drained,
                    Err(e) => {
                        warn!(path = %host.path(), error = %e, "failed to stop service");
                        drained = false;
                    }
                }
            }

            if let Err(e) = state.transition(ServerState::ShuttingDown, ServerState::Stop) {
                return Err(ServiceError::from(e));
            }
            info!(services = hosts.len(), drained, "service manager stopped");
            Ok(drained)
        });

        match shutdown.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "manager shutdown task ended abnormally");
                self.state
                    .transition(ServerState::ShuttingDown, ServerState::Stop)?;
                Ok(false)
            }
        }
    }

    /// Broadcast to every session of every host
    pub async fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        let hosts = self.endpoints().await;
        join_all(hosts.iter().map(|host| host.broadcast(payload)))
            .await
            .into_iter()
            .fold(BroadcastReport::default(), |mut total, report| {
                total.merge(report);
                total
            })
    }

    async fn endpoints(&self) -> Vec<Arc<dyn Endpoint>> {
        self.hosts.read().await.values().cloned().collect()
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::time::Duration;

    use super::*;
    use crate::error::BehaviorError;
    use crate::session::connection::Connection;
    use crate::session::mock::MockConnection;

    struct Echo;

    impl Behavior for Echo {}

    fn echo() -> Result<Echo, BehaviorError> {
        Ok(Echo)
    }

    fn connect() -> (Arc<MockConnection>, Weak<dyn Connection>) {
        let connection = Arc::new(MockConnection::new());
        let handle = MockConnection::handle(&connection);
        (connection, handle)
    }

    // ==================== Path Tests ====================

    #[test]
    fn normalize_trims_trailing_slashes() {
        assert_eq!(normalize_path("/chat/").unwrap(), "/chat");
        assert_eq!(normalize_path("/chat//").unwrap(), "/chat");
        assert_eq!(normalize_path("/a/b").unwrap(), "/a/b");
    }

    #[test]
    fn normalize_keeps_root() {
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("///").unwrap(), "/");
    }

    #[test]
    fn normalize_rejects_bad_paths() {
        for path in ["", "chat", "/chat?room=1", "/chat#top"] {
            assert!(
                matches!(normalize_path(path), Err(ServiceError::InvalidPath { .. })),
                "{path:?} should be rejected"
            );
        }
    }

    // ==================== Registration Tests ====================

    #[tokio::test]
    async fn add_service_registers_normalized_path() {
        let manager = ServiceManager::new();
        let host = manager.add_service("/echo/", echo).await.unwrap();

        assert_eq!(host.path(), "/echo");
        assert_eq!(manager.paths().await, vec!["/echo".to_string()]);
        assert!(manager.host("/echo/").await.is_some());
        assert_eq!(host.state(), ServerState::Ready);
    }

    #[tokio::test]
    async fn duplicate_path_is_rejected() {
        let manager = ServiceManager::new();
        manager.add_service("/echo", echo).await.unwrap();

        let result = manager.add_service("/echo/", echo).await;

        assert!(matches!(result, Err(ServiceError::DuplicatePath(p)) if p == "/echo"));
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn hosts_receive_default_config() {
        let config = HostConfig {
            wait_time_ms: 20,
            keep_clean: false,
            ..HostConfig::default()
        };
        let manager = ServiceManager::with_config(config).unwrap();
        let host = manager.add_service("/echo", echo).await.unwrap();

        assert_eq!(host.wait_time(), Duration::from_millis(20));
        assert!(!host.keep_clean());
    }

    #[test]
    fn invalid_default_config_is_rejected() {
        let config = HostConfig {
            wait_time_ms: 0,
            ..HostConfig::default()
        };
        assert!(matches!(
            ServiceManager::with_config(config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn initializer_is_attached() {
        let manager = ServiceManager::new();
        let host = manager
            .add_service_with_initializer("/echo", echo, |_: &mut Echo| -> Result<(), BehaviorError> {
                Err(BehaviorError::Initializer("refused".to_string()))
            })
            .await
            .unwrap();

        assert!(matches!(
            host.create_behavior(),
            Err(HostError::Behavior(BehaviorError::Initializer(_)))
        ));
    }

    // ==================== Lifecycle Tests ====================

    #[tokio::test]
    async fn start_starts_every_host() {
        let manager = ServiceManager::new();
        let a = manager.add_service("/a", echo).await.unwrap();
        let b = manager.add_service("/b", echo).await.unwrap();

        manager.start().await.unwrap();

        assert_eq!(manager.state(), ServerState::Start);
        assert_eq!(a.state(), ServerState::Start);
        assert_eq!(b.state(), ServerState::Start);
    }

    #[tokio::test]
    async fn add_after_start_starts_host() {
        let manager = ServiceManager::new();
        manager.start().await.unwrap();

        let host = manager.add_service("/late", echo).await.unwrap();

        assert_eq!(host.state(), ServerState::Start);
        let (_conn, handle) = connect();
        host.accept(handle).await.unwrap();
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn add_after_stop_is_rejected() {
        let manager = ServiceManager::new();
        manager.start().await.unwrap();
        manager.stop(CloseCode::Away, "").await.unwrap();

        let result = manager.add_service("/late", echo).await;

        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn stop_stops_every_host_and_closes_sessions() {
        let manager = ServiceManager::new();
        let a = manager.add_service("/a", echo).await.unwrap();
        let b = manager.add_service("/b", echo).await.unwrap();
        manager.start().await.unwrap();

        let (conn_a, handle_a) = connect();
        let (conn_b, handle_b) = connect();
        a.accept(handle_a).await.unwrap();
        b.accept(handle_b).await.unwrap();

        let drained = manager.stop(CloseCode::Normal, "bye").await.unwrap();

        assert!(drained);
        assert_eq!(manager.state(), ServerState::Stop);
        assert_eq!(a.state(), ServerState::Stop);
        assert_eq!(b.state(), ServerState::Stop);
        assert_eq!(conn_a.closes(), vec![(CloseCode::Normal, "bye".to_string())]);
        assert_eq!(conn_b.closes(), vec![(CloseCode::Normal, "bye".to_string())]);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn stop_rejects_invalid_close_parameters() {
        let manager = ServiceManager::new();
        manager.start().await.unwrap();

        let result = manager.stop(CloseCode::Abnormal, "").await;

        assert!(matches!(result, Err(ServiceError::Host(HostError::InvalidClose(_)))));
        assert_eq!(manager.state(), ServerState::Start);
    }

    #[tokio::test]
    async fn start_skips_hosts_started_directly() {
        let manager = ServiceManager::new();
        let a = manager.add_service("/a", echo).await.unwrap();
        let b = manager.add_service("/b", echo).await.unwrap();
        a.start().unwrap();
        b.start().unwrap();

        manager.start().await.unwrap();

        assert_eq!(manager.state(), ServerState::Start);
        assert_eq!(a.state(), ServerState::Start);
        assert_eq!(b.state(), ServerState::Start);
        assert!(manager.stop(CloseCode::Normal, "").await.unwrap());
        assert_eq!(a.state(), ServerState::Stop);
    }

    #[tokio::test]
    async fn start_continues_past_failing_host() {
        let manager = ServiceManager::new();
        let stopped = manager.add_service("/stopped", echo).await.unwrap();
        let fresh = manager.add_service("/fresh", echo).await.unwrap();
        stopped.start().unwrap();
        stopped.stop(CloseCode::Normal, "").await.unwrap();

        manager.start().await.unwrap();

        assert_eq!(manager.state(), ServerState::Start);
        assert_eq!(fresh.state(), ServerState::Start);
        assert_eq!(stopped.state(), ServerState::Stop);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let manager = ServiceManager::new();
        manager.start().await.unwrap();
        assert!(matches!(manager.start().await, Err(ServiceError::State(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stop_still_stops_every_host() {
        let manager = ServiceManager::new();
        let host = manager.add_service("/slow", echo).await.unwrap();
        manager.start().await.unwrap();
        let hanging = Arc::new(MockConnection::hanging_close());
        host.accept(MockConnection::handle(&hanging)).await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), manager.stop(CloseCode::Away, "")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(manager.state(), ServerState::Stop);
        assert_eq!(host.state(), ServerState::Stop);
        assert_eq!(manager.session_count().await, 0);
    }

    // ==================== Removal Tests ====================

    #[tokio::test]
    async fn remove_service_stops_with_away() {
        let manager = ServiceManager::new();
        let host = manager.add_service("/chat", echo).await.unwrap();
        manager.start().await.unwrap();
        let (conn, handle) = connect();
        host.accept(handle).await.unwrap();

        assert!(manager.remove_service("/chat/").await);

        assert_eq!(host.state(), ServerState::Stop);
        assert_eq!(conn.closes(), vec![(CloseCode::Away, String::new())]);
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn remove_unknown_service_returns_false() {
        let manager = ServiceManager::new();
        assert!(!manager.remove_service("/nothing").await);
        assert!(!manager.remove_service("not a path").await);
    }

    #[tokio::test]
    async fn remove_ready_service_does_not_stop_it() {
        let manager = ServiceManager::new();
        let host = manager.add_service("/idle", echo).await.unwrap();

        assert!(manager.remove_service("/idle").await);
        assert_eq!(host.state(), ServerState::Ready);
    }

    // ==================== Broadcast Tests ====================

    #[tokio::test]
    async fn broadcast_merges_reports_across_hosts() {
        let manager = ServiceManager::new();
        let a = manager.add_service("/a", echo).await.unwrap();
        let b = manager.add_service("/b", echo).await.unwrap();
        manager.start().await.unwrap();

        let (conn_a, handle_a) = connect();
        let (conn_b, handle_b) = connect();
        a.accept(handle_a).await.unwrap();
        let failing = b.accept(handle_b).await.unwrap();
        conn_b.set_fail_sends(true);

        let report = manager.broadcast(&Payload::from("hello")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![failing.id().unwrap().to_string()]);
        assert_eq!(conn_a.sent(), vec![Payload::from("hello")]);
    }
}
