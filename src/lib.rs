//! Janus Proxy - Clustering proxy core for Janus WebRTC signaling.
//!
//! This library provides the session, handle and backend plumbing for
//! proxying the Janus signaling API across a pool of Janus servers.
//!
//! # Architecture
//!
//! The proxy sits between clients and a cluster of Janus instances:
//!
//! - **Frontend**: client sessions and plugin handles, bound to the
//!   transport the client spoke on
//! - **Backend**: one persistent WebSocket session per Janus server,
//!   shared by every handle proxied to it
//!
//! Key design principles:
//!
//! - Each client request produces exactly one reply envelope,
//!   correlated by its transaction
//! - Plugin handles run their slow work on a per-handle worker, so
//!   dispatch never blocks on plugin logic
//! - Backend events flow through bounded queues that shed load instead
//!   of stalling the connection reader
//! - Every registry is plain data injected by the caller, so separate
//!   proxies can coexist in one process
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use janus_proxy::{
//!     FrontendSessionManager, PluginRegistry, ProxyConfig, RequestHandler,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(
//!         ProxyConfig::default()
//!             .with_server_name("Janus Proxy")
//!             .with_api_secret("janusrocks"),
//!     );
//!
//!     // Register plugin implementations, then wire up the dispatch
//!     // chain. A transport layer feeds parsed requests into the
//!     // handler and writes the reply envelopes back out.
//!     let plugins = Arc::new(PluginRegistry::new());
//!     let manager = FrontendSessionManager::new(Arc::clone(&config), plugins);
//!     let handler = RequestHandler::new(config, manager);
//!
//!     // let reply = handler.handle_request(transport, request).await;
//!     # drop(handler);
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | Server directory, selection and pooled backend sessions |
//! | [`config`] | Proxy configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frontend`] | Client sessions, plugin handles, plugin registry |
//! | [`handler`] | Request validation and verb dispatch |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Janus wire vocabulary and envelope builders |
//! | [`transport`] | Client transport abstraction |
//!
//! # Features
//!
//! - **Transaction-correlated**: concurrent backend requests share one
//!   connection without head-of-line blocking
//! - **Self-healing pool**: a lost backend session tears down cleanly
//!   and the next request reconnects
//! - **Pluggable selection**: round-robin, random, weighted and
//!   least-loaded strategies over the live server directory

// ============================================================================
// Modules
// ============================================================================

/// Backend directory, selection and pooled sessions.
///
/// This module contains everything that talks to Janus servers:
///
/// - [`ServerRegistry`] - directory of known backend servers
/// - [`ServerSelector`] - strategy-driven server choice
/// - [`BackendSession`] - one shared session per backend URL
/// - [`BackendHandle`] - plugin handle proxied onto a backend
pub mod backend;

/// Proxy configuration.
///
/// [`ProxyConfig`] collects timeouts, secrets and the static server
/// list; builder methods tweak individual knobs.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Client-facing sessions and plugin handles.
///
/// [`FrontendSessionManager`] owns the session map; [`Plugin`]
/// implementations create the [`PluginHandle`]s requests land on.
pub mod frontend;

/// Request validation and verb dispatch.
///
/// [`RequestHandler`] turns one parsed client request into one reply
/// envelope.
pub mod handler;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Janus wire vocabulary.
///
/// Verbs, element accessors and envelope builders shared by both sides
/// of the proxy.
pub mod protocol;

/// Client transport abstraction.
///
/// The [`Transport`] trait is the seam a WebSocket (or other) server
/// layer implements to carry sessions.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Backend types
pub use backend::{
    BackendHandle, BackendListener, BackendRegistry, BackendServer, BackendSession,
    ServerRegistry, ServerSelector, ServerStatus,
};

// Configuration
pub use config::{ProxyConfig, StaticServer};

// Error types
pub use error::{Error, Result};

// Frontend types
pub use frontend::{
    FrontendSession, FrontendSessionManager, HandleCore, MessageResult, Plugin, PluginHandle,
    PluginRegistry,
};

// Request dispatch
pub use handler::RequestHandler;

// Identifier types
pub use identifiers::{HandleId, SessionId, TransactionId};

// Protocol types
pub use protocol::{Scope, Trickle, Verb};

// Transport layer
pub use transport::{Transport, TransportId};
