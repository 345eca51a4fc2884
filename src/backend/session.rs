//! Backend session pool and per-server session lifecycle.
//!
//! A [`BackendSession`] is the proxy's session on one backend Janus
//! server, shared by every frontend handle routed to that server. The
//! [`BackendRegistry`] keys sessions by backend URL and guarantees at
//! most one live session per URL: concurrent first requests for the
//! same URL converge on a single initializer, with the latecomers
//! parked on oneshot channels until the handshake finishes.
//!
//! # Lifecycle
//!
//! ```text
//! connect -> info -> create -> Active -> destroy
//!                                |          ^
//!                                +- keepalive failure, timeout push,
//!                                   connection loss, idle expiry
//! ```
//!
//! Destruction is idempotent and synchronous: deregister, stop timers,
//! close every handle queue and shut the connection down. The handle
//! relay tasks then deliver their close callbacks on their own.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::{DEFAULT_SESSION_TIMEOUT, ProxyConfig};
use crate::error::{Error, Result};
use crate::identifiers::{HandleId, SessionId, TransactionId};
use crate::protocol::message;

use super::connection::{BackendConnection, InboundSink};
use super::handle::{BackendHandle, BackendListener};
use super::server::BackendServer;

// ============================================================================
// Session state
// ============================================================================

/// Lifecycle state of a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Connection is up, handshake still running.
    Creating,
    /// Session is created on the backend and usable.
    Active,
    /// Session is gone; every operation fails.
    Destroyed,
}

// ============================================================================
// BackendSession
// ============================================================================

struct SessionInner {
    /// Directory name of the backend server.
    server_name: String,
    /// WebSocket URL of the backend server.
    url: String,
    /// Proxy configuration.
    config: Arc<ProxyConfig>,
    /// Registry that owns this session's directory slot.
    registry: Weak<RegistryInner>,
    /// Backend-assigned session id. Zero until `create` answered.
    session_id: AtomicU64,
    /// Lifecycle state.
    state: Mutex<SessionState>,
    /// Session timeout advertised by the backend.
    session_timeout: Mutex<Duration>,
    /// Connection to the backend server.
    conn: BackendConnection,
    /// Live handles by backend handle id.
    handles: Mutex<FxHashMap<HandleId, BackendHandle>>,
    /// Pending idle-expiry timer, when configured.
    auto_destroy: Mutex<Option<JoinHandle<()>>>,
}

/// Session on one backend Janus server.
///
/// Cheap to clone; all clones address the same backend session.
#[derive(Clone)]
pub struct BackendSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("server_name", &self.inner.server_name)
            .field("url", &self.inner.url)
            .finish_non_exhaustive()
    }
}

impl BackendSession {
    /// Connects to the server and runs the `info` + `create` handshake.
    ///
    /// On success the session is `Active`, registered nowhere yet (the
    /// registry does that), and its keepalive task is running.
    async fn open(
        config: Arc<ProxyConfig>,
        registry: Weak<RegistryInner>,
        server: &BackendServer,
    ) -> Result<Self> {
        let conn = BackendConnection::connect(&server.url).await?;

        let session = Self {
            inner: Arc::new(SessionInner {
                server_name: server.name.clone(),
                url: server.url.clone(),
                config,
                registry,
                session_id: AtomicU64::new(0),
                state: Mutex::new(SessionState::Creating),
                session_timeout: Mutex::new(DEFAULT_SESSION_TIMEOUT),
                conn,
                handles: Mutex::new(FxHashMap::default()),
                auto_destroy: Mutex::new(None),
            }),
        };

        session.inner.conn.set_sink(Arc::new(SessionSink {
            session: Arc::downgrade(&session.inner),
        }));

        match session.initialize().await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.destroy();
                Err(e)
            }
        }
    }

    /// Runs `info` and `create` against the fresh connection.
    async fn initialize(&self) -> Result<()> {
        // info: learn the server's session timeout for keepalive pacing.
        let info = self.execute(json!({"janus": "info"}), false).await?;
        if let Some(err) = message::backend_error(&info) {
            return Err(err);
        }
        let timeout_secs = info
            .get("session-timeout")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_SESSION_TIMEOUT, Duration::from_secs);
        *self.inner.session_timeout.lock() = timeout_secs;

        // create: obtain the backend session id.
        let created = self.execute(json!({"janus": "create"}), false).await?;
        if let Some(err) = message::backend_error(&created) {
            return Err(err);
        }
        let session_id = created["data"]["id"]
            .as_u64()
            .ok_or_else(|| Error::bad_gateway("create answered without a session id"))?;
        self.inner.session_id.store(session_id, Ordering::SeqCst);

        *self.inner.state.lock() = SessionState::Active;
        debug!(
            server = %self.inner.server_name,
            session = session_id,
            timeout_secs = timeout_secs.as_secs(),
            "Backend session established"
        );

        let interval = self.inner.config.keepalive_interval(timeout_secs);
        tokio::spawn(run_keepalive(Arc::downgrade(&self.inner), interval));

        Ok(())
    }

    /// Returns the backend-assigned session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        SessionId::new(self.inner.session_id.load(Ordering::SeqCst))
    }

    /// Returns the directory name of the backend server.
    #[inline]
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    /// Returns the backend server URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the session timeout advertised by the backend.
    #[inline]
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        *self.inner.session_timeout.lock()
    }

    /// Returns the number of live handles on this session.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Returns `true` while the session is usable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.inner.state.lock() == SessionState::Active
    }

    /// Returns `true` once the session is destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        *self.inner.state.lock() == SessionState::Destroyed
    }

    /// Sends a request to the backend and waits for the answer.
    ///
    /// Stamps the transaction, session id and API secret. With
    /// `ignore_ack` set, an intermediate `ack` keeps the call waiting
    /// for the final answer.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceUnavailable`] if the session is destroyed
    /// - [`Error::GatewayTimeout`] if the backend does not answer in time
    /// - [`Error::ConnectionClosed`] if the connection dies while waiting
    pub(crate) async fn execute(&self, mut msg: Value, ignore_ack: bool) -> Result<Value> {
        if self.is_destroyed() {
            return Err(Error::service_unavailable("backend session destroyed"));
        }

        let transaction = TransactionId::generate();
        self.stamp(&mut msg, &transaction);

        self.inner
            .conn
            .execute(&msg, transaction, ignore_ack, self.inner.config.request_timeout)
            .await
    }

    /// Sends a request without waiting for any answer.
    pub(crate) fn fire(&self, mut msg: Value) {
        let transaction = TransactionId::generate();
        self.stamp(&mut msg, &transaction);
        self.inner.conn.fire(&msg);
    }

    fn stamp(&self, msg: &mut Value, transaction: &TransactionId) {
        msg["transaction"] = json!(transaction.as_str());
        let session_id = self.inner.session_id.load(Ordering::SeqCst);
        if session_id != 0 {
            msg["session_id"] = json!(session_id);
        }
        if let Some(secret) = &self.inner.config.backend_api_secret {
            msg["apisecret"] = json!(secret);
        }
    }

    /// Attaches a plugin on the backend and wires up event relay.
    ///
    /// # Errors
    ///
    /// - [`Error::Plugin`] with the backend's own code when the attach
    ///   is rejected, unknown plugins included
    /// - [`Error::BadGateway`] when the answer carried no handle id
    pub async fn attach(
        &self,
        plugin_package: &str,
        opaque_id: Option<&str>,
        listener: Arc<dyn BackendListener>,
    ) -> Result<BackendHandle> {
        let mut msg = json!({
            "janus": "attach",
            "plugin": plugin_package,
        });
        if let Some(opaque_id) = opaque_id {
            msg["opaque_id"] = json!(opaque_id);
        }

        let answer = self.execute(msg, false).await?;
        if let Some(err) = message::backend_error(&answer) {
            return Err(err);
        }
        let handle_id = answer["data"]["id"]
            .as_u64()
            .ok_or_else(|| Error::bad_gateway("attach answered without a handle id"))?;

        let handle = BackendHandle::new(
            self.clone(),
            HandleId::new(handle_id),
            plugin_package,
            self.inner.config.event_queue_capacity,
            listener,
        );
        self.inner
            .handles
            .lock()
            .insert(handle.handle_id(), handle.clone());

        // A fresh handle ends any idle grace period.
        self.cancel_auto_destroy();

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.servers.note_handle_added(&self.inner.server_name);
        }

        debug!(
            server = %self.inner.server_name,
            session = self.inner.session_id.load(Ordering::SeqCst),
            handle = handle_id,
            plugin = plugin_package,
            "Backend handle attached"
        );
        Ok(handle)
    }

    /// Removes a handle from the session's bookkeeping.
    ///
    /// Called by the handle itself on detach. Starts the idle-expiry
    /// timer when the last handle is gone and expiry is configured.
    pub(crate) fn forget_handle(&self, handle_id: HandleId) {
        let emptied = {
            let mut handles = self.inner.handles.lock();
            handles.remove(&handle_id).is_some() && handles.is_empty()
        };
        if emptied {
            self.schedule_auto_destroy();
        }
    }

    /// Destroys the session. Idempotent and synchronous.
    ///
    /// Deregisters from the registry, stops the idle timer, closes
    /// every handle queue and shuts the connection down. A best-effort
    /// `destroy` is sent to the backend when the session was created.
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Destroyed {
                return;
            }
            *state = SessionState::Destroyed;
        }

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.forget(self);
        }
        self.cancel_auto_destroy();

        let handles: Vec<BackendHandle> = {
            let mut map = self.inner.handles.lock();
            map.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.mark_closed();
        }

        if self.inner.session_id.load(Ordering::SeqCst) != 0 {
            self.fire(json!({"janus": "destroy"}));
        }
        self.inner.conn.shutdown();

        debug!(
            server = %self.inner.server_name,
            session = self.inner.session_id.load(Ordering::SeqCst),
            handles = handles.len(),
            "Backend session destroyed"
        );
    }

    fn schedule_auto_destroy(&self) {
        let Some(delay) = self.inner.config.auto_destroy_delay else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let mut slot = self.inner.auto_destroy.lock();
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let session = BackendSession { inner };
            // Re-check: a handle may have attached during the grace period.
            if session.is_active() && session.handle_count() == 0 {
                debug!(
                    server = %session.inner.server_name,
                    "Idle backend session expired"
                );
                session.destroy();
            }
        }));
    }

    fn cancel_auto_destroy(&self) {
        if let Some(task) = self.inner.auto_destroy.lock().take() {
            task.abort();
        }
    }

    /// Routes one server-initiated push. Runs on the connection's event
    /// loop task and must stay non-blocking.
    fn dispatch_push(&self, msg: Value) {
        match message::kind(&msg) {
            Some("timeout") => {
                warn!(
                    server = %self.inner.server_name,
                    session = self.inner.session_id.load(Ordering::SeqCst),
                    "Backend session timed out"
                );
                self.destroy();
                return;
            }
            Some("detached") => {
                if let Some(handle_id) = message::sender(&msg) {
                    let removed = self.inner.handles.lock().remove(&handle_id);
                    match removed {
                        Some(handle) => {
                            debug!(handle = %handle_id, "Backend announced handle detach");
                            handle.mark_closed();
                        }
                        None => {
                            debug!(handle = %handle_id, "Detach notice for unknown handle")
                        }
                    }
                } else {
                    debug!("Detach notice without a sender, dropped");
                }
                return;
            }
            _ => {}
        }

        // Everything else is relayed to the addressed handle.
        match message::sender(&msg) {
            Some(handle_id) => {
                let handle = self.inner.handles.lock().get(&handle_id).cloned();
                match handle {
                    Some(handle) => handle.queue_event(msg),
                    None => debug!(handle = %handle_id, "Event for unknown handle, dropped"),
                }
            }
            None => {
                debug!(kind = ?message::kind(&msg), "Unhandled backend notification, dropped");
            }
        }
    }
}

// ============================================================================
// SessionSink
// ============================================================================

/// Routes connection-level pushes into the owning session.
struct SessionSink {
    session: Weak<SessionInner>,
}

impl InboundSink for SessionSink {
    fn on_push(&self, msg: Value) {
        if let Some(inner) = self.session.upgrade() {
            BackendSession { inner }.dispatch_push(msg);
        }
    }

    fn on_closed(&self) {
        if let Some(inner) = self.session.upgrade() {
            let session = BackendSession { inner };
            if !session.is_destroyed() {
                warn!(
                    server = %session.inner.server_name,
                    session = session.inner.session_id.load(Ordering::SeqCst),
                    "Backend connection lost"
                );
                session.destroy();
            }
        }
    }
}

// ============================================================================
// Keepalive
// ============================================================================

/// Periodic keepalive loop. Holds the session weakly so an otherwise
/// dropped session is not kept alive by its own timer.
async fn run_keepalive(session: Weak<SessionInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(inner) = session.upgrade() else { break };
        let session = BackendSession { inner };
        if session.is_destroyed() {
            break;
        }

        match session.execute(json!({"janus": "keepalive"}), false).await {
            Ok(_) => {
                trace!(
                    server = %session.inner.server_name,
                    session = session.inner.session_id.load(Ordering::SeqCst),
                    "Keepalive acknowledged"
                );
            }
            Err(e) => {
                warn!(
                    server = %session.inner.server_name,
                    session = session.inner.session_id.load(Ordering::SeqCst),
                    error = %e,
                    "Keepalive failed, destroying backend session"
                );
                session.destroy();
                break;
            }
        }
    }
}

// ============================================================================
// BackendRegistry
// ============================================================================

/// Directory slot for one backend server.
enum RegistryEntry {
    /// Handshake in progress; parked latecomers wait here.
    Connecting(Vec<oneshot::Sender<Result<BackendSession>>>),
    /// Session is up.
    Ready(BackendSession),
}

struct RegistryInner {
    config: Arc<ProxyConfig>,
    servers: Arc<super::server::ServerRegistry>,
    /// Sessions keyed by backend URL: at most one live session per URL.
    entries: Mutex<FxHashMap<String, RegistryEntry>>,
}

impl RegistryInner {
    /// Removes the entry for a session, but only while that session
    /// still owns it. A successor session keeps its slot.
    fn forget(&self, session: &BackendSession) {
        let mut entries = self.entries.lock();
        if let Some(RegistryEntry::Ready(current)) = entries.get(session.url())
            && Arc::ptr_eq(&current.inner, &session.inner)
        {
            entries.remove(session.url());
            debug!(server = %session.server_name(), "Backend session deregistered");
        }
    }
}

/// Pool of backend sessions, one per backend server.
#[derive(Clone)]
pub struct BackendRegistry {
    inner: Arc<RegistryInner>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new(config: Arc<ProxyConfig>, servers: Arc<super::server::ServerRegistry>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                servers,
                entries: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Returns the live session for a server, creating it when needed.
    ///
    /// Sessions are keyed by URL. Concurrent callers for the same URL
    /// converge: exactly one runs the handshake, the rest wait for its
    /// outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceUnavailable`] when the handshake fails or is
    ///   abandoned
    pub async fn get_or_create(&self, server: &BackendServer) -> Result<BackendSession> {
        enum Role {
            Done(BackendSession),
            Wait(oneshot::Receiver<Result<BackendSession>>),
            Initialize,
        }

        let role = {
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(&server.url) {
                Some(RegistryEntry::Ready(session)) if !session.is_destroyed() => {
                    Role::Done(session.clone())
                }
                Some(RegistryEntry::Ready(_)) => {
                    // Stale slot from a session that died without
                    // deregistering; claim it and start over.
                    entries.insert(server.url.clone(), RegistryEntry::Connecting(Vec::new()));
                    Role::Initialize
                }
                Some(RegistryEntry::Connecting(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Role::Wait(rx)
                }
                None => {
                    entries.insert(server.url.clone(), RegistryEntry::Connecting(Vec::new()));
                    Role::Initialize
                }
            }
        };

        match role {
            Role::Done(session) => Ok(session),
            Role::Wait(rx) => {
                trace!(server = %server.name, "Waiting for in-flight backend session setup");
                rx.await.map_err(|_| {
                    Error::service_unavailable("backend session setup abandoned")
                })?
            }
            Role::Initialize => self.initialize_entry(server).await,
        }
    }

    /// Runs the handshake as the owning initializer and publishes the
    /// outcome to every parked waiter.
    async fn initialize_entry(&self, server: &BackendServer) -> Result<BackendSession> {
        let result = BackendSession::open(
            Arc::clone(&self.inner.config),
            Arc::downgrade(&self.inner),
            server,
        )
        .await;

        let waiters = {
            let mut entries = self.inner.entries.lock();
            let previous = match &result {
                Ok(session) => entries.insert(
                    server.url.clone(),
                    RegistryEntry::Ready(session.clone()),
                ),
                Err(_) => entries.remove(&server.url),
            };
            match previous {
                Some(RegistryEntry::Connecting(waiters)) => waiters,
                _ => Vec::new(),
            }
        };

        match &result {
            Ok(session) => {
                for tx in waiters {
                    let _ = tx.send(Ok(session.clone()));
                }
            }
            Err(e) => {
                warn!(server = %server.name, error = %e, "Backend session setup failed");
                let reason = format!("backend session setup failed: {e}");
                for tx in waiters {
                    let _ = tx.send(Err(Error::service_unavailable(reason.clone())));
                }
            }
        }

        result
    }

    /// Returns the live session for a backend URL, if any.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<BackendSession> {
        let entries = self.inner.entries.lock();
        match entries.get(url) {
            Some(RegistryEntry::Ready(session)) if !session.is_destroyed() => {
                Some(session.clone())
            }
            _ => None,
        }
    }

    /// Returns the number of directory slots, in-flight setups included.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Destroys every live session and abandons in-flight setups.
    pub fn shutdown(&self) {
        let entries: Vec<RegistryEntry> = {
            let mut map = self.inner.entries.lock();
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            match entry {
                RegistryEntry::Ready(session) => session.destroy(),
                // Dropping the waiters fails them with a setup-abandoned
                // error on their side.
                RegistryEntry::Connecting(_) => {}
            }
        }
        debug!("Backend session registry shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::backend::server::ServerRegistry;
    use crate::backend::testutil::MockBackend;

    fn test_config() -> ProxyConfig {
        ProxyConfig::default()
            .with_request_timeout(Duration::from_secs(2))
            .with_min_keepalive_interval(Duration::from_secs(30))
    }

    fn registry_for(config: ProxyConfig) -> BackendRegistry {
        let config = Arc::new(config);
        let servers = ServerRegistry::new(&config);
        BackendRegistry::new(config, servers)
    }

    struct NullListener;

    #[async_trait]
    impl BackendListener for NullListener {
        async fn on_async_event(&self, _event: Value) -> Result<()> {
            Ok(())
        }

        async fn on_close(&self, _handle_id: HandleId) -> Result<()> {
            Ok(())
        }
    }

    struct CountingListener {
        events: Mutex<Vec<Value>>,
        closes: AtomicUsize,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            })
        }

        async fn wait_for_events(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.events.lock().len() < count {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            })
            .await
            .expect("events arrive in time");
        }

        async fn wait_for_close(&self) {
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.closes.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            })
            .await
            .expect("close arrives in time");
        }
    }

    #[async_trait]
    impl BackendListener for CountingListener {
        async fn on_async_event(&self, event: Value) -> Result<()> {
            self.events.lock().push(event);
            Ok(())
        }

        async fn on_close(&self, _handle_id: HandleId) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_runs_info_and_create_handshake() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");

        assert!(session.is_active());
        assert!(!session.session_id().is_auto());
        assert_ne!(session.session_id().raw(), 0);
        assert_eq!(
            session.session_timeout(),
            Duration::from_secs(MockBackend::SESSION_TIMEOUT_SECS)
        );
        assert_eq!(backend.create_count(), 1);
        assert_eq!(registry.session_count(), 1);

        session.destroy();
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_get_converges_on_one_session() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());
        let server = backend.server("srv-a");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let server = server.clone();
            tasks.push(tokio::spawn(async move {
                registry.get_or_create(&server).await
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            let session = task
                .await
                .expect("task clean")
                .expect("session opens");
            ids.push(session.session_id().raw());
        }

        assert_eq!(backend.create_count(), 1, "only one create on the wire");
        assert!(ids.windows(2).all(|w| w[0] == w[1]), "all callers share one session");
    }

    #[tokio::test]
    async fn test_destroyed_slot_heals_on_next_get() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());
        let server = backend.server("srv-a");

        let first = registry
            .get_or_create(&server)
            .await
            .expect("first session opens");
        first.destroy();
        assert!(first.is_destroyed());

        // The backend was told, best-effort, before the socket closed.
        tokio::time::timeout(Duration::from_secs(2), async {
            while backend.destroy_count() == 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("destroy reaches the backend");

        let second = registry
            .get_or_create(&server)
            .await
            .expect("second session opens");
        assert!(second.is_active());
        assert_ne!(first.session_id().raw(), second.session_id().raw());
        assert_eq!(backend.create_count(), 2);
    }

    #[tokio::test]
    async fn test_get_or_create_fails_for_unreachable_server() {
        let registry = registry_for(test_config());
        let server = BackendServer::new("gone", "ws://127.0.0.1:1/janus");

        let err = registry
            .get_or_create(&server)
            .await
            .expect_err("unreachable server rejected");
        assert!(err.is_connection_error() || err.code() == 503);
        assert_eq!(registry.session_count(), 0, "failed slot is released");
    }

    #[tokio::test]
    async fn test_attach_and_event_relay() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let listener = CountingListener::new();
        let handle = session
            .attach("janus.plugin.echotest", Some("opq-1"), listener.clone())
            .await
            .expect("attach succeeds");

        assert_eq!(session.handle_count(), 1);
        assert!(!handle.is_detached());

        backend.push(json!({
            "janus": "event",
            "sender": handle.handle_id().raw(),
            "plugindata": {"plugin": "janus.plugin.echotest", "data": {"echotest": "event"}},
        }));
        listener.wait_for_events(1).await;
        assert_eq!(
            listener.events.lock()[0]["plugindata"]["data"]["echotest"],
            "event"
        );
    }

    #[tokio::test]
    async fn test_attach_unknown_plugin_passes_backend_error() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");

        let err = session
            .attach(MockBackend::MISSING_PLUGIN, None, Arc::new(NullListener))
            .await
            .expect_err("unknown plugin rejected");
        assert_eq!(err.code(), 460);
        assert_eq!(session.handle_count(), 0);
        assert!(session.is_active(), "a failed attach leaves the session up");
    }

    #[tokio::test]
    async fn test_backend_detached_notice_closes_handle() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let listener = CountingListener::new();
        let handle = session
            .attach("janus.plugin.echotest", None, listener.clone())
            .await
            .expect("attach succeeds");

        backend.push(json!({
            "janus": "detached",
            "sender": handle.handle_id().raw(),
        }));
        listener.wait_for_close().await;

        assert_eq!(session.handle_count(), 0);
        assert!(handle.is_detached());
        assert_eq!(listener.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_notice_destroys_session() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let listener = CountingListener::new();
        let _handle = session
            .attach("janus.plugin.echotest", None, listener.clone())
            .await
            .expect("attach succeeds");

        backend.push(json!({"janus": "timeout", "session_id": session.session_id().raw()}));
        listener.wait_for_close().await;

        assert!(session.is_destroyed());
        assert_eq!(registry.session_count(), 0);

        let err = session
            .execute(json!({"janus": "keepalive"}), false)
            .await
            .expect_err("destroyed session rejects requests");
        assert_eq!(err.code(), 503);
    }

    #[tokio::test]
    async fn test_connection_loss_destroys_session() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let listener = CountingListener::new();
        let _handle = session
            .attach("janus.plugin.echotest", None, listener.clone())
            .await
            .expect("attach succeeds");

        backend.disconnect_all();
        listener.wait_for_close().await;

        assert!(session.is_destroyed());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_failure_destroys_session() {
        let backend = MockBackend::start().await;
        // The mock advertises a one second session timeout, so the
        // keepalive tick lands at a third of that.
        let config = ProxyConfig::default()
            .with_request_timeout(Duration::from_millis(300))
            .with_min_keepalive_interval(Duration::from_millis(100));
        let registry = registry_for(config);

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        assert!(session.is_active());

        // Stop answering, then let the keepalive tick fire and time out.
        backend.set_silent(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !session.is_destroyed() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("keepalive failure tears the session down");
        assert_eq!(registry.session_count(), 0);
        assert!(backend.keepalive_count() >= 1, "a keepalive hit the wire");
    }

    #[tokio::test]
    async fn test_idle_session_expires_after_last_detach() {
        let backend = MockBackend::start().await;
        let config = test_config().with_auto_destroy_delay(Duration::from_millis(200));
        let registry = registry_for(config);

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let handle = session
            .attach("janus.plugin.echotest", None, Arc::new(NullListener))
            .await
            .expect("attach succeeds");

        handle.detach();
        assert_eq!(session.handle_count(), 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !session.is_destroyed() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("idle session expires");
    }

    #[tokio::test]
    async fn test_attach_cancels_pending_expiry() {
        let backend = MockBackend::start().await;
        let config = test_config().with_auto_destroy_delay(Duration::from_millis(300));
        let registry = registry_for(config);

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let first = session
            .attach("janus.plugin.echotest", None, Arc::new(NullListener))
            .await
            .expect("first attach");
        first.detach();

        // Re-attach inside the grace period keeps the session alive.
        let _second = session
            .attach("janus.plugin.echotest", None, Arc::new(NullListener))
            .await
            .expect("second attach");
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_overflowing_event_queue_drops_newest() {
        let backend = MockBackend::start().await;
        let capacity = 4;
        let config = test_config().with_event_queue_capacity(capacity);
        let registry = registry_for(config);

        let session = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");

        struct GatedListener {
            events: Mutex<Vec<u64>>,
            started: Notify,
            gate: Notify,
            gated: AtomicUsize,
        }

        #[async_trait]
        impl BackendListener for GatedListener {
            async fn on_async_event(&self, event: Value) -> Result<()> {
                if self.gated.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.started.notify_one();
                    self.gate.notified().await;
                }
                self.events
                    .lock()
                    .push(event["seq"].as_u64().unwrap_or(u64::MAX));
                Ok(())
            }

            async fn on_close(&self, _handle_id: HandleId) -> Result<()> {
                Ok(())
            }
        }

        let listener = Arc::new(GatedListener {
            events: Mutex::new(Vec::new()),
            started: Notify::new(),
            gate: Notify::new(),
            gated: AtomicUsize::new(0),
        });
        let handle = session
            .attach("janus.plugin.echotest", None, listener.clone())
            .await
            .expect("attach succeeds");
        let sender = handle.handle_id().raw();

        // Park the relay inside the first event so the queue backs up.
        let started = listener.started.notified();
        backend.push(json!({"janus": "event", "sender": sender, "seq": 0}));
        started.await;

        // Overfill: capacity events fit, the rest are shed.
        for seq in 1..=(capacity as u64 + 3) {
            backend.push(json!({"janus": "event", "sender": sender, "seq": seq}));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        listener.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = listener.events.lock();
        assert_eq!(
            events.len(),
            capacity + 1,
            "one in-flight event plus a full queue survive"
        );
        // Drop-newest shedding keeps the oldest events, in order.
        for (i, seq) in events.iter().enumerate() {
            assert_eq!(*seq, i as u64);
        }
    }

    #[tokio::test]
    async fn test_sessions_keyed_by_url_not_name() {
        let backend = MockBackend::start().await;
        let registry = registry_for(test_config());

        // Two directory names pointing at the same URL share one session.
        let a = registry
            .get_or_create(&backend.server("srv-a"))
            .await
            .expect("session opens");
        let b = registry
            .get_or_create(&backend.server("srv-b"))
            .await
            .expect("session resolves");

        assert_eq!(a.session_id().raw(), b.session_id().raw());
        assert_eq!(backend.create_count(), 1);
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_every_session() {
        let backend_a = MockBackend::start().await;
        let backend_b = MockBackend::start().await;
        let registry = registry_for(test_config());

        let a = registry
            .get_or_create(&backend_a.server("srv-a"))
            .await
            .expect("session a opens");
        let b = registry
            .get_or_create(&backend_b.server("srv-b"))
            .await
            .expect("session b opens");
        assert_eq!(registry.session_count(), 2);

        registry.shutdown();

        assert!(a.is_destroyed());
        assert!(b.is_destroyed());
        assert_eq!(registry.session_count(), 0);
    }
}
