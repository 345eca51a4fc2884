//! Proxy configuration.
//!
//! [`ProxyConfig`] is a plain options struct consumed by the session
//! managers, the backend registry and the request handler. Construct
//! one with [`ProxyConfig::new`] and chain `with_*` methods:
//!
//! ```ignore
//! use std::time::Duration;
//! use janus_proxy::config::{ProxyConfig, StaticServer};
//!
//! let config = ProxyConfig::new()
//!     .with_api_secret("janusrocks")
//!     .with_session_timeout(Duration::from_secs(30))
//!     .with_static_server(StaticServer::new("media-0", "ws://10.0.0.10:8188"))
//!     .with_selection_policy("least-loaded");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default frontend session idle timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cadence of the idle-session sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Default deadline for synchronous backend requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default divisor applied to a backend's reported session timeout when
/// deriving the keepalive interval.
pub const DEFAULT_KEEPALIVE_DIVISOR: u32 = 3;

/// Default floor for the derived keepalive interval.
pub const DEFAULT_MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Default capacity of the per-handle asynchronous event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 32;

/// Default selection policy name.
pub const DEFAULT_SELECTION_POLICY: &str = "round-robin";

/// Default server name reported by `info` responses.
pub const DEFAULT_SERVER_NAME: &str = "Janus Proxy";

// ============================================================================
// StaticServer
// ============================================================================

/// A backend server pinned in configuration.
///
/// Static servers never expire from the registry, unlike servers that
/// announce themselves at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticServer {
    /// Unique server name.
    pub name: String,
    /// WebSocket URL of the server's Janus API.
    pub url: String,
}

impl StaticServer {
    /// Creates a static server entry.
    #[inline]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

// ============================================================================
// ProxyConfig
// ============================================================================

/// Tunable knobs of the proxy core.
///
/// The defaults match what a small deployment wants; tests shrink the
/// timing fields to keep runs fast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Credential demanded from frontend clients, if any.
    ///
    /// When set, every request except `info` and `ping` must carry a
    /// matching `"apisecret"` element.
    pub api_secret: Option<String>,

    /// Credential stamped onto requests sent to backend servers.
    pub backend_api_secret: Option<String>,

    /// Idle timeout after which a frontend session is reaped.
    pub session_timeout: Duration,

    /// Cadence of the idle-session sweep task.
    pub sweep_interval: Duration,

    /// Deadline for synchronous backend requests.
    pub request_timeout: Duration,

    /// Divisor applied to a backend's session timeout when deriving its
    /// keepalive interval.
    pub keepalive_divisor: u32,

    /// Floor for the derived keepalive interval.
    pub min_keepalive_interval: Duration,

    /// Capacity of the per-handle asynchronous event queue.
    ///
    /// When the queue is full, the newest event is dropped.
    pub event_queue_capacity: usize,

    /// Delay before a handle-less backend session destroys itself.
    ///
    /// `None` keeps idle backend sessions around indefinitely.
    pub auto_destroy_delay: Option<Duration>,

    /// Name of the server selection policy to use.
    pub selection_policy: String,

    /// Backend servers pinned in configuration.
    pub static_servers: Vec<StaticServer>,

    /// Whether error responses carry a `"cause"` element with the full
    /// error chain. Off in production, useful while debugging.
    pub expose_error_cause: bool,

    /// Server name reported in `info` responses.
    pub server_name: String,
}

impl ProxyConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_secret: None,
            backend_api_secret: None,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keepalive_divisor: DEFAULT_KEEPALIVE_DIVISOR,
            min_keepalive_interval: DEFAULT_MIN_KEEPALIVE_INTERVAL,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            auto_destroy_delay: None,
            selection_policy: DEFAULT_SELECTION_POLICY.to_owned(),
            static_servers: Vec::new(),
            expose_error_cause: false,
            server_name: DEFAULT_SERVER_NAME.to_owned(),
        }
    }

    /// Sets the frontend API secret.
    #[inline]
    #[must_use]
    pub fn with_api_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    /// Sets the credential stamped onto backend requests.
    #[inline]
    #[must_use]
    pub fn with_backend_api_secret(mut self, secret: impl Into<String>) -> Self {
        self.backend_api_secret = Some(secret.into());
        self
    }

    /// Sets the frontend session idle timeout.
    #[inline]
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets the idle-sweep cadence.
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the synchronous backend request deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the keepalive interval floor.
    #[inline]
    #[must_use]
    pub fn with_min_keepalive_interval(mut self, interval: Duration) -> Self {
        self.min_keepalive_interval = interval;
        self
    }

    /// Sets the per-handle event queue capacity.
    #[inline]
    #[must_use]
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Sets the idle backend session auto-destroy delay.
    #[inline]
    #[must_use]
    pub fn with_auto_destroy_delay(mut self, delay: Duration) -> Self {
        self.auto_destroy_delay = Some(delay);
        self
    }

    /// Sets the selection policy by name.
    #[inline]
    #[must_use]
    pub fn with_selection_policy(mut self, policy: impl Into<String>) -> Self {
        self.selection_policy = policy.into();
        self
    }

    /// Adds a static backend server.
    #[inline]
    #[must_use]
    pub fn with_static_server(mut self, server: StaticServer) -> Self {
        self.static_servers.push(server);
        self
    }

    /// Enables the `"cause"` element on error responses.
    #[inline]
    #[must_use]
    pub fn with_error_cause(mut self) -> Self {
        self.expose_error_cause = true;
        self
    }

    /// Sets the server name reported by `info`.
    #[inline]
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Derives the keepalive interval for a backend that reported the
    /// given session timeout.
    ///
    /// The timeout divided by [`Self::keepalive_divisor`], clamped to
    /// [`Self::min_keepalive_interval`]. A zero timeout (backend never
    /// reaps sessions) still produces the floor interval so the
    /// connection stays warm.
    #[must_use]
    pub fn keepalive_interval(&self, backend_session_timeout: Duration) -> Duration {
        if backend_session_timeout.is_zero() {
            return self.min_keepalive_interval;
        }
        let divisor = self.keepalive_divisor.max(1);
        (backend_session_timeout / divisor).max(self.min_keepalive_interval)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::new();
        assert!(config.api_secret.is_none());
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
        assert_eq!(config.selection_policy, "round-robin");
        assert!(config.static_servers.is_empty());
        assert!(config.auto_destroy_delay.is_none());
        assert!(!config.expose_error_cause);
    }

    #[test]
    fn test_builder_chain() {
        let config = ProxyConfig::new()
            .with_api_secret("front")
            .with_backend_api_secret("back")
            .with_session_timeout(Duration::from_secs(30))
            .with_selection_policy("least-loaded")
            .with_static_server(StaticServer::new("media-0", "ws://10.0.0.10:8188"))
            .with_error_cause();

        assert_eq!(config.api_secret.as_deref(), Some("front"));
        assert_eq!(config.backend_api_secret.as_deref(), Some("back"));
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.selection_policy, "least-loaded");
        assert_eq!(config.static_servers.len(), 1);
        assert_eq!(config.static_servers[0].name, "media-0");
        assert!(config.expose_error_cause);
    }

    #[test]
    fn test_keepalive_interval_derivation() {
        let config = ProxyConfig::new().with_min_keepalive_interval(Duration::from_secs(5));

        // 60s timeout divided by 3 is well above the floor.
        assert_eq!(
            config.keepalive_interval(Duration::from_secs(60)),
            Duration::from_secs(20)
        );

        // 6s timeout divided by 3 hits the floor.
        assert_eq!(
            config.keepalive_interval(Duration::from_secs(6)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_keepalive_interval_zero_timeout() {
        let config = ProxyConfig::new().with_min_keepalive_interval(Duration::from_millis(250));
        assert_eq!(
            config.keepalive_interval(Duration::ZERO),
            Duration::from_millis(250)
        );
    }
}
