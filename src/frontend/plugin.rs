//! Plugin trait and package registry.
//!
//! Plugins carry the business logic the proxy core stays out of. The
//! core only needs two things from them: a package name to route
//! `attach` requests by, and a factory producing the concrete
//! [`PluginHandle`] for each attachment.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::HandleId;

use super::handle::PluginHandle;
use super::session::FrontendSession;

// ============================================================================
// Plugin
// ============================================================================

/// Factory for plugin handles, one registered instance per package.
pub trait Plugin: Send + Sync {
    /// Package name used in `attach` requests,
    /// e.g. `"janus.plugin.echotest"`.
    fn package(&self) -> &str;

    /// Human-readable plugin name.
    fn name(&self) -> &str;

    /// Builds the handle for one attachment.
    ///
    /// # Errors
    ///
    /// Whatever the plugin's setup can fail with; the error surfaces
    /// as the answer to the `attach` request.
    fn create_handle(
        &self,
        handle_id: HandleId,
        session: FrontendSession,
        opaque_id: Option<String>,
    ) -> Result<Arc<dyn PluginHandle>>;
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("package", &self.package())
            .field("name", &self.name())
            .finish()
    }
}

// ============================================================================
// PluginRegistry
// ============================================================================

/// Package name to plugin lookup.
pub struct PluginRegistry {
    plugins: Mutex<FxHashMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers a plugin under its package name. Last write wins.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let package = plugin.package().to_owned();
        debug!(package = %package, name = %plugin.name(), "Plugin registered");
        self.plugins.lock().insert(package, plugin);
    }

    /// Resolves a plugin by package name.
    ///
    /// # Errors
    ///
    /// - [`Error::PluginNotFound`] for unknown packages
    pub fn get(&self, package: &str) -> Result<Arc<dyn Plugin>> {
        self.plugins
            .lock()
            .get(package)
            .cloned()
            .ok_or_else(|| Error::plugin_not_found(package))
    }

    /// Returns the registered package names.
    #[must_use]
    pub fn packages(&self) -> Vec<String> {
        self.plugins.lock().keys().cloned().collect()
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.plugins.lock().len()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
