//! Client-facing side of the proxy: sessions, plugin handles, plugins.
//!
//! | Type | Job |
//! |------|-----|
//! | [`FrontendSessionManager`] | Session map, idle sweep, transport binding |
//! | [`FrontendSession`] | One client's signaling context |
//! | [`PluginHandle`] / [`HandleCore`] | Plugin attachment contract + shared base |
//! | [`Plugin`] / [`PluginRegistry`] | Handle factories, resolved by package |
//!
//! The frontend never talks to backend servers itself; plugin handles
//! do that through the backend half of the crate.

pub mod handle;
pub mod plugin;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use handle::{AsyncJob, HandleCore, MessageResult, PluginHandle};
pub use plugin::{Plugin, PluginRegistry};
pub use session::{FrontendSession, FrontendSessionManager};
