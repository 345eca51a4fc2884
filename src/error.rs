//! Error types for the proxy core.
//!
//! This module defines all error types used throughout the crate.
//! Every variant maps onto a numeric protocol error code, which is what
//! ends up in the `"error": {"code": ..., "reason": ...}` object of an
//! error response.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use janus_proxy::{Result, Error};
//!
//! async fn example(session: &BackendSession) -> Result<()> {
//!     let handle = session.attach("janus.plugin.echotest", None, listener).await?;
//!     handle.send_hangup().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Request validation | [`Error::Unauthorized`], [`Error::UnknownRequest`], [`Error::InvalidJson`], [`Error::InvalidRequestPath`], [`Error::MissingMandatoryElement`], [`Error::InvalidElementType`] |
//! | Lookup | [`Error::SessionNotFound`], [`Error::HandleNotFound`], [`Error::PluginNotFound`], [`Error::SessionConflict`] |
//! | Backend | [`Error::Plugin`], [`Error::BadGateway`], [`Error::ServiceUnavailable`], [`Error::GatewayTimeout`], [`Error::ConnectionClosed`] |
//! | Configuration | [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{HandleId, SessionId};

// ============================================================================
// Protocol Error Codes
// ============================================================================

/// Numeric error codes carried in error responses.
///
/// The values mirror the codes the Janus gateway itself reports, so a
/// client cannot tell whether an error originated at the proxy or at a
/// backend server.
pub mod codes {
    /// Wrong or missing credential.
    pub const UNAUTHORIZED: i32 = 403;
    /// The `"janus"` verb is not one this server understands.
    pub const UNKNOWN_REQUEST: i32 = 453;
    /// The request payload is not valid JSON.
    pub const INVALID_JSON: i32 = 454;
    /// The verb is not valid at the addressed level.
    pub const INVALID_REQUEST_PATH: i32 = 455;
    /// A required element is absent from the request.
    pub const MISSING_MANDATORY_ELEMENT: i32 = 456;
    /// No session with the given id.
    pub const SESSION_NOT_FOUND: i32 = 458;
    /// No handle with the given id.
    pub const HANDLE_NOT_FOUND: i32 = 459;
    /// No plugin registered under the given package name.
    pub const PLUGIN_NOT_FOUND: i32 = 460;
    /// An element is present but has the wrong JSON type.
    pub const INVALID_ELEMENT_TYPE: i32 = 467;
    /// A session with the requested id already exists.
    pub const SESSION_CONFLICT: i32 = 468;
    /// Fallback for errors with no protocol-level meaning.
    pub const UNKNOWN: i32 = 490;
    /// A backend answered with something unusable.
    pub const BAD_GATEWAY: i32 = 502;
    /// No backend is available to serve the request.
    pub const SERVICE_UNAVAILABLE: i32 = 503;
    /// A backend did not answer within the deadline.
    pub const GATEWAY_TIMEOUT: i32 = 504;
}

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging and maps onto a
/// protocol error code via [`Error::code`].
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Request Validation Errors
    // ========================================================================
    /// Wrong or missing credential.
    ///
    /// Returned when the configured API secret does not match.
    #[error("Unauthorized request (wrong or missing apisecret)")]
    Unauthorized,

    /// Unknown request verb.
    ///
    /// Returned when the `"janus"` field names no known verb.
    #[error("Unknown request '{verb}'")]
    UnknownRequest {
        /// The unrecognized verb.
        verb: String,
    },

    /// Request payload is not valid JSON.
    #[error("Invalid JSON: {message}")]
    InvalidJson {
        /// Description of the parse failure.
        message: String,
    },

    /// Verb used at the wrong addressing level.
    ///
    /// Returned when a session-level verb arrives without a session id,
    /// a handle-level verb without a handle id, and so on.
    #[error("Invalid request path: {message}")]
    InvalidRequestPath {
        /// Description of the path violation.
        message: String,
    },

    /// Required element absent from the request.
    #[error("Missing mandatory element '{name}'")]
    MissingMandatoryElement {
        /// Name of the missing element.
        name: String,
    },

    /// Element present but of the wrong JSON type.
    #[error("Invalid element type: '{name}' should be {expected}")]
    InvalidElementType {
        /// Name of the offending element.
        name: String,
        /// The JSON type the element should have.
        expected: &'static str,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// Session not found.
    #[error("No such session {session_id}")]
    SessionNotFound {
        /// The missing session's id.
        session_id: SessionId,
    },

    /// Handle not found.
    #[error("No such handle {handle_id}")]
    HandleNotFound {
        /// The missing handle's id.
        handle_id: HandleId,
    },

    /// Plugin not found.
    ///
    /// Returned when no plugin is registered under the package name.
    #[error("No such plugin '{package}'")]
    PluginNotFound {
        /// The unknown package name.
        package: String,
    },

    /// Session id already in use.
    ///
    /// Returned when a client asks for an explicit session id that is
    /// already taken.
    #[error("Session {session_id} already exists")]
    SessionConflict {
        /// The conflicting session id.
        session_id: SessionId,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// Error reported by a plugin.
    ///
    /// The code is plugin-defined and passes through to the client
    /// unchanged.
    #[error("Plugin error {code}: {reason}")]
    Plugin {
        /// Plugin-defined error code.
        code: i32,
        /// Plugin-supplied reason string.
        reason: String,
    },

    /// Backend answered with something unusable.
    ///
    /// Returned when a backend response cannot be interpreted.
    #[error("Bad gateway: {message}")]
    BadGateway {
        /// Description of the unusable answer.
        message: String,
    },

    /// No backend available.
    ///
    /// Returned when server selection yields nothing or a backend
    /// session cannot be established.
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Description of the unavailability.
        message: String,
    },

    /// Backend did not answer within the deadline.
    #[error("Gateway timeout after {timeout_ms}ms")]
    GatewayTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// Backend connection closed while a request was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when proxy configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an unknown request error.
    #[inline]
    pub fn unknown_request(verb: impl Into<String>) -> Self {
        Self::UnknownRequest { verb: verb.into() }
    }

    /// Creates an invalid JSON error.
    #[inline]
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Creates an invalid request path error.
    #[inline]
    pub fn invalid_request_path(message: impl Into<String>) -> Self {
        Self::InvalidRequestPath {
            message: message.into(),
        }
    }

    /// Creates a missing mandatory element error.
    #[inline]
    pub fn missing_element(name: impl Into<String>) -> Self {
        Self::MissingMandatoryElement { name: name.into() }
    }

    /// Creates an invalid element type error.
    #[inline]
    pub fn invalid_element(name: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidElementType {
            name: name.into(),
            expected,
        }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }

    /// Creates a handle not found error.
    #[inline]
    pub fn handle_not_found(handle_id: HandleId) -> Self {
        Self::HandleNotFound { handle_id }
    }

    /// Creates a plugin not found error.
    #[inline]
    pub fn plugin_not_found(package: impl Into<String>) -> Self {
        Self::PluginNotFound {
            package: package.into(),
        }
    }

    /// Creates a session conflict error.
    #[inline]
    pub fn session_conflict(session_id: SessionId) -> Self {
        Self::SessionConflict { session_id }
    }

    /// Creates a plugin error with a plugin-defined code.
    #[inline]
    pub fn plugin(code: i32, reason: impl Into<String>) -> Self {
        Self::Plugin {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a bad gateway error.
    #[inline]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::BadGateway {
            message: message.into(),
        }
    }

    /// Creates a service unavailable error.
    #[inline]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Creates a gateway timeout error.
    #[inline]
    pub fn gateway_timeout(timeout_ms: u64) -> Self {
        Self::GatewayTimeout { timeout_ms }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl Error {
    /// Returns the protocol error code for this error.
    ///
    /// Plugin errors keep their plugin-defined code; everything without
    /// a protocol-level meaning collapses to [`codes::UNKNOWN`].
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Unauthorized => codes::UNAUTHORIZED,
            Self::UnknownRequest { .. } => codes::UNKNOWN_REQUEST,
            Self::InvalidJson { .. } | Self::Json(_) => codes::INVALID_JSON,
            Self::InvalidRequestPath { .. } => codes::INVALID_REQUEST_PATH,
            Self::MissingMandatoryElement { .. } => codes::MISSING_MANDATORY_ELEMENT,
            Self::InvalidElementType { .. } => codes::INVALID_ELEMENT_TYPE,
            Self::SessionNotFound { .. } => codes::SESSION_NOT_FOUND,
            Self::HandleNotFound { .. } => codes::HANDLE_NOT_FOUND,
            Self::PluginNotFound { .. } => codes::PLUGIN_NOT_FOUND,
            Self::SessionConflict { .. } => codes::SESSION_CONFLICT,
            Self::Plugin { code, .. } => *code,
            Self::BadGateway { .. } | Self::WebSocket(_) => codes::BAD_GATEWAY,
            Self::ServiceUnavailable { .. } | Self::ConnectionClosed => {
                codes::SERVICE_UNAVAILABLE
            }
            Self::GatewayTimeout { .. } => codes::GATEWAY_TIMEOUT,
            Self::Config { .. } | Self::Io(_) | Self::ChannelClosed(_) => codes::UNKNOWN,
        }
    }

    /// Returns the reason string carried in error envelopes.
    ///
    /// Plugin errors pass the plugin's own reason through verbatim,
    /// everything else uses the error's display form.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Plugin { reason, .. } => reason.clone(),
            _ => self.to_string(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::GatewayTimeout { .. })
    }

    /// Returns `true` if this is a connection-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::WebSocket(_) | Self::Io(_)
        )
    }

    /// Returns `true` if this is a lookup failure.
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. }
                | Self::HandleNotFound { .. }
                | Self::PluginNotFound { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
