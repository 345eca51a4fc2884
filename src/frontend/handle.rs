//! Frontend plugin-handle contract and shared handle core.
//!
//! Concrete plugin handles implement [`PluginHandle`] and embed a
//! [`HandleCore`], which carries the identity bits every handle needs
//! plus the outbound async machinery: a queue of plugin-generated jobs
//! drained by one worker task, so slow asynchronous signaling work
//! never blocks inbound request processing.
//!
//! Inbound dispatch calls (`handle_message`, `handle_trickle`,
//! `handle_hangup`) run on the request path; anything slow belongs in
//! a queued job.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::HandleId;
use crate::protocol::Trickle;
use crate::protocol::message;

use super::session::FrontendSession;

// ============================================================================
// MessageResult
// ============================================================================

/// Outcome of a plugin's `handle_message`.
#[derive(Debug)]
pub enum MessageResult {
    /// Answer now: the content becomes the `success` reply's plugin data.
    Ok(Value),
    /// Answer later asynchronously: the request is acknowledged with an
    /// optional hint, the real answer follows as an `event`.
    OkWait(Option<String>),
}

/// One unit of deferred plugin work.
pub type AsyncJob = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

// ============================================================================
// HandleCore
// ============================================================================

/// Shared state and outbound machinery embedded in every plugin handle.
pub struct HandleCore {
    /// Frontend handle identifier.
    handle_id: HandleId,
    /// Package name of the owning plugin.
    plugin_package: String,
    /// Client-supplied correlation token, echoed into events.
    opaque_id: Option<String>,
    /// Owning frontend session.
    session: FrontendSession,
    /// Async job queue sender. `None` once detached.
    job_tx: Mutex<Option<mpsc::UnboundedSender<AsyncJob>>>,
    /// Set once `detach` ran.
    detached: AtomicBool,
}

impl HandleCore {
    /// Creates the core and spawns its async worker task.
    #[must_use]
    pub fn new(
        handle_id: HandleId,
        plugin_package: impl Into<String>,
        opaque_id: Option<String>,
        session: FrontendSession,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(handle_id, job_rx));

        Self {
            handle_id,
            plugin_package: plugin_package.into(),
            opaque_id,
            session,
            job_tx: Mutex::new(Some(job_tx)),
            detached: AtomicBool::new(false),
        }
    }

    /// Returns the frontend handle identifier.
    #[inline]
    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    /// Returns the owning plugin's package name.
    #[inline]
    #[must_use]
    pub fn plugin_package(&self) -> &str {
        &self.plugin_package
    }

    /// Returns the client-supplied opaque id, if any.
    #[inline]
    #[must_use]
    pub fn opaque_id(&self) -> Option<&str> {
        self.opaque_id.as_deref()
    }

    /// Returns the owning frontend session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &FrontendSession {
        &self.session
    }

    /// Returns `true` once the handle is detached.
    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Enqueues deferred plugin work for the handle's worker task.
    ///
    /// Jobs run one at a time, in order; failures are logged. Dropped
    /// silently once the handle is detached.
    pub fn queue_async<F>(&self, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = self.job_tx.lock();
        match guard.as_ref() {
            Some(job_tx) => {
                if job_tx.send(Box::pin(job)).is_err() {
                    debug!(handle = %self.handle_id, "Worker gone, dropped async job");
                }
            }
            None => {
                debug!(handle = %self.handle_id, "Handle detached, dropped async job");
            }
        }
    }

    /// Sends an asynchronous event for this handle to the client,
    /// wrapped as this plugin's data.
    pub async fn push_event(&self, data: Value, jsep: Option<Value>) {
        let package = self.plugin_package.clone();
        self.push_plugin_event(&package, data, jsep).await;
    }

    /// Sends an asynchronous event with an explicit plugin name.
    pub async fn push_plugin_event(&self, plugin: &str, data: Value, jsep: Option<Value>) {
        let msg = message::plugin_event(
            self.session.session_id(),
            self.handle_id,
            self.opaque_id(),
            None,
            plugin,
            data,
            jsep,
        );
        self.session.relay_event(msg).await;
    }

    /// Flips the detached flag and stops the worker.
    ///
    /// Returns `false` when the handle was already detached.
    pub(crate) fn begin_detach(&self) -> bool {
        if self.detached.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.job_tx.lock().take();
        true
    }

    /// Best-effort terminal `detached` event to the client.
    pub(crate) async fn emit_detached(&self) {
        let msg = message::notification(
            "detached",
            self.session.session_id(),
            Some(self.handle_id),
        );
        self.session.relay_event(msg).await;
    }
}

/// Runs queued plugin jobs one at a time until the queue closes.
async fn run_worker(handle_id: HandleId, mut job_rx: mpsc::UnboundedReceiver<AsyncJob>) {
    while let Some(job) = job_rx.recv().await {
        if let Err(e) = job.await {
            warn!(handle = %handle_id, error = %e, "Async plugin job failed");
        }
    }
    debug!(handle = %handle_id, "Async worker terminated");
}

// ============================================================================
// PluginHandle
// ============================================================================

/// Contract every concrete plugin handle implements.
///
/// The provided methods delegate identity to the embedded core and
/// give `detach` its fixed shape: stop the worker, announce the
/// detach, then let the plugin release its resources.
#[async_trait]
pub trait PluginHandle: Send + Sync {
    /// The embedded shared core.
    fn core(&self) -> &HandleCore;

    /// Handles a `message` request addressed to this handle.
    async fn handle_message(&self, body: Value, jsep: Option<Value>) -> Result<MessageResult>;

    /// Handles trickled ICE candidates addressed to this handle.
    async fn handle_trickle(&self, trickle: Trickle) -> Result<()>;

    /// Handles a `hangup` request. Default: nothing to tear down.
    async fn handle_hangup(&self) -> Result<()> {
        Ok(())
    }

    /// Releases plugin resources on detach. Default: nothing to do.
    async fn on_close(&self) -> Result<()> {
        Ok(())
    }

    /// Returns the frontend handle identifier.
    fn handle_id(&self) -> HandleId {
        self.core().handle_id()
    }

    /// Returns the plugin package name.
    fn plugin_package(&self) -> &str {
        self.core().plugin_package()
    }

    /// Returns the client-supplied opaque id, if any.
    fn opaque_id(&self) -> Option<&str> {
        self.core().opaque_id()
    }

    /// Detaches the handle. Idempotent.
    ///
    /// Stops the async worker, removes the handle from its session,
    /// sends a best-effort terminal `detached` event, then calls
    /// [`PluginHandle::on_close`] with failures logged.
    async fn detach(&self) {
        let core = self.core();
        if !core.begin_detach() {
            return;
        }

        core.session().remove_handle(core.handle_id());
        core.emit_detached().await;

        if let Err(e) = self.on_close().await {
            warn!(handle = %core.handle_id(), error = %e, "Plugin close hook failed");
        }
        debug!(
            handle = %core.handle_id(),
            plugin = %core.plugin_package(),
            "Frontend handle detached"
        );
    }
}

impl std::fmt::Debug for dyn PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("handle_id", &self.handle_id())
            .field("plugin_package", &self.plugin_package())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
