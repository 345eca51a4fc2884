//! Backend side of the proxy: server directory, selection, sessions.
//!
//! The backend stack has four layers:
//!
//! | Layer | Type | Job |
//! |-------|------|-----|
//! | Directory | [`ServerRegistry`] | Known backend servers, their status and load |
//! | Selection | [`ServerSelector`] | Picks a server for a new handle |
//! | Session | [`BackendRegistry`], [`BackendSession`] | One shared session per server |
//! | Handle | [`BackendHandle`] | Plugin attachment with async event relay |
//!
//! Connections are an internal detail of the session layer: every
//! session owns exactly one WebSocket to its server and multiplexes
//! all of its handles over it.

pub(crate) mod connection;
pub mod handle;
pub mod selector;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use handle::{BackendHandle, BackendListener};
pub use selector::{
    STRATEGY_NAMES, SelectContext, SelectionStrategy, ServerSelector, strategy_for,
};
pub use server::{BackendServer, ServerRegistry, ServerStatus};
pub use session::{BackendRegistry, BackendSession};
