//! Backend server directory.
//!
//! The [`ServerRegistry`] tracks every Janus server the proxy may
//! route to. Servers arrive from two places:
//!
//! - **Static** entries pinned in [`ProxyConfig::static_servers`],
//!   which never expire.
//! - **Announced** entries pushed at runtime (a poke from an external
//!   monitor), which carry an expiry and must keep refreshing
//!   themselves to stay listed.
//!
//! A background task purges announced entries whose refresh went
//! missing, so selection never sees a server nobody has vouched for
//! recently.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProxyConfig;

// ============================================================================
// Constants
// ============================================================================

/// Cadence of the expired-entry purge task.
const PURGE_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// ServerStatus
// ============================================================================

/// Health state of a backend server.
///
/// Only [`ServerStatus::Normal`] servers are eligible for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Serving traffic.
    Normal,
    /// Unreachable or misbehaving.
    Abnormal,
    /// Administratively drained.
    Maintenance,
    /// Above its high-water mark, shedding new load.
    Hwm,
}

// ============================================================================
// BackendServer
// ============================================================================

/// Descriptor of one backend Janus server.
#[derive(Debug, Clone)]
pub struct BackendServer {
    /// Unique server name.
    pub name: String,
    /// WebSocket URL of the server's Janus API.
    pub url: String,
    /// Health state.
    pub status: ServerStatus,
    /// Session timeout the server reports, in seconds. Zero if unknown.
    pub session_timeout: u64,
    /// Deployment location hint, free-form.
    pub location: String,
    /// Network carrier hint, free-form.
    pub isp: String,
    /// Sessions the server reports holding.
    pub session_num: u64,
    /// Plugin handles the server reports holding.
    pub handle_num: u64,
    /// How long an announcement stays fresh. Zero never expires.
    pub expire: Duration,
    /// When the entry was last announced or updated.
    pub utime: Instant,
    /// When the entry first appeared.
    pub ctime: Instant,
}

impl BackendServer {
    /// Creates a descriptor with default health and no load.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            url: url.into(),
            status: ServerStatus::Normal,
            session_timeout: 0,
            location: String::new(),
            isp: String::new(),
            session_num: 0,
            handle_num: 0,
            expire: Duration::ZERO,
            utime: now,
            ctime: now,
        }
    }

    /// Sets the health state.
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: ServerStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the reported session timeout in seconds.
    #[inline]
    #[must_use]
    pub fn with_session_timeout(mut self, seconds: u64) -> Self {
        self.session_timeout = seconds;
        self
    }

    /// Sets the location hint.
    #[inline]
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Sets the carrier hint.
    #[inline]
    #[must_use]
    pub fn with_isp(mut self, isp: impl Into<String>) -> Self {
        self.isp = isp.into();
        self
    }

    /// Sets the reported load counters.
    #[inline]
    #[must_use]
    pub fn with_load(mut self, session_num: u64, handle_num: u64) -> Self {
        self.session_num = session_num;
        self.handle_num = handle_num;
        self
    }

    /// Sets the announcement lifetime.
    #[inline]
    #[must_use]
    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    /// Returns `true` if the announcement has gone stale.
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.expire.is_zero() && self.utime.elapsed() >= self.expire
    }

    /// Returns `true` if the server is eligible for selection.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == ServerStatus::Normal && !self.is_expired()
    }
}

// ============================================================================
// ServerRegistry
// ============================================================================

/// Thread-safe directory of backend servers.
///
/// # Example
///
/// ```ignore
/// let registry = ServerRegistry::new(&config);
/// registry.update_server(
///     BackendServer::new("media-1", "ws://10.0.0.11:8188")
///         .with_expire(Duration::from_secs(30)),
/// );
/// let candidates = registry.valid_servers();
/// ```
pub struct ServerRegistry {
    /// Known servers by name.
    servers: Mutex<FxHashMap<String, BackendServer>>,

    /// Shutdown flag for the purge task.
    shutdown: AtomicBool,
}

// ============================================================================
// ServerRegistry - Constructor
// ============================================================================

impl ServerRegistry {
    /// Creates a registry seeded with the configured static servers
    /// and starts the purge task.
    #[must_use]
    pub fn new(config: &ProxyConfig) -> Arc<Self> {
        let mut servers = FxHashMap::default();
        for pinned in &config.static_servers {
            let server = BackendServer::new(&pinned.name, &pinned.url);
            debug!(name = %server.name, url = %server.url, "Static backend server registered");
            servers.insert(server.name.clone(), server);
        }

        let registry = Arc::new(Self {
            servers: Mutex::new(servers),
            shutdown: AtomicBool::new(false),
        });

        let registry_clone = Arc::clone(&registry);
        tokio::spawn(async move {
            registry_clone.purge_loop().await;
        });

        registry
    }
}

// ============================================================================
// ServerRegistry - Public API
// ============================================================================

impl ServerRegistry {
    /// Inserts or refreshes a server entry.
    ///
    /// The update time is stamped here; the creation time of an
    /// existing entry is preserved.
    pub fn update_server(&self, mut server: BackendServer) {
        let mut servers = self.servers.lock();
        server.utime = Instant::now();
        if let Some(existing) = servers.get(&server.name) {
            server.ctime = existing.ctime;
        }
        debug!(
            name = %server.name,
            url = %server.url,
            status = ?server.status,
            handles = server.handle_num,
            "Backend server updated"
        );
        servers.insert(server.name.clone(), server);
    }

    /// Returns a server by name.
    #[must_use]
    pub fn get_server(&self, name: &str) -> Option<BackendServer> {
        self.servers.lock().get(name).cloned()
    }

    /// Removes a server by name.
    pub fn remove_server(&self, name: &str) {
        if self.servers.lock().remove(name).is_some() {
            debug!(name = %name, "Backend server removed");
        }
    }

    /// Returns every known server.
    #[must_use]
    pub fn servers(&self) -> Vec<BackendServer> {
        self.servers.lock().values().cloned().collect()
    }

    /// Returns the number of known servers.
    #[inline]
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.servers.lock().len()
    }

    /// Returns the selectable servers, sorted by name.
    ///
    /// The stable order is what makes rotating selection fair.
    #[must_use]
    pub fn valid_servers(&self) -> Vec<BackendServer> {
        let mut valid: Vec<BackendServer> = self
            .servers
            .lock()
            .values()
            .filter(|s| s.is_valid())
            .cloned()
            .collect();
        valid.sort_by(|a, b| a.name.cmp(&b.name));
        valid
    }

    /// Bumps the recorded handle count of a server.
    ///
    /// Selection calls this to account for a placement it just made,
    /// ahead of the server's next self-report.
    pub fn note_handle_added(&self, name: &str) {
        if let Some(server) = self.servers.lock().get_mut(name) {
            server.handle_num = server.handle_num.saturating_add(1);
        }
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut servers = self.servers.lock();
        let before = servers.len();
        servers.retain(|name, server| {
            let keep = !server.is_expired();
            if !keep {
                warn!(name = %name, "Backend server announcement expired, removing");
            }
            keep
        });
        before - servers.len()
    }

    /// Stops the purge task.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// ServerRegistry - Purge Loop
// ============================================================================

impl ServerRegistry {
    /// Background task dropping stale announcements.
    async fn purge_loop(self: Arc<Self>) {
        debug!("Server purge loop started");

        loop {
            tokio::time::sleep(PURGE_INTERVAL).await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.purge_expired();
        }

        debug!("Server purge loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================
