//! Plugin handle on a backend session.
//!
//! A [`BackendHandle`] mirrors one plugin attachment on a backend
//! server. Its main job is asynchronous event relay: pushes routed to
//! the handle land in a bounded queue, and a dedicated relay task
//! drains the queue into the [`BackendListener`] one event at a time.
//!
//! The queue decouples the connection event loop from listener speed.
//! When the queue is full the newest event is dropped with a warning;
//! the receive path never blocks. Closing the queue is the teardown
//! signal: once the sender is gone the relay drains what is left,
//! fires `on_close` exactly once and exits.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::HandleId;
use crate::protocol::Trickle;
use crate::protocol::message;

use super::session::BackendSession;

// ============================================================================
// BackendListener
// ============================================================================

/// Receiver of relayed backend traffic for one handle.
///
/// Callbacks run on the handle's relay task, strictly in queue order.
/// A failed `on_async_event` is logged and relay continues with the
/// next event.
#[async_trait]
pub trait BackendListener: Send + Sync {
    /// Called for every asynchronous plugin event routed to the handle.
    async fn on_async_event(&self, event: Value) -> Result<()>;

    /// Called exactly once after the last event, when the handle is
    /// detached or its session goes away.
    async fn on_close(&self, handle_id: HandleId) -> Result<()>;
}

// ============================================================================
// BackendHandle
// ============================================================================

struct HandleInner {
    /// Handle identifier assigned by the backend server.
    handle_id: HandleId,
    /// Package name of the plugin attached on the backend.
    plugin_package: String,
    /// Owning backend session.
    session: BackendSession,
    /// Event queue sender. `None` once the handle is closed.
    queue_tx: Mutex<Option<mpsc::Sender<Value>>>,
    /// Set once `detach` or `mark_closed` ran.
    detached: AtomicBool,
}

/// Handle to a plugin attachment on a backend server.
///
/// Cheap to clone; all clones share the queue and detach state.
#[derive(Clone)]
pub struct BackendHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("handle_id", &self.inner.handle_id)
            .field("plugin_package", &self.inner.plugin_package)
            .finish_non_exhaustive()
    }
}

impl BackendHandle {
    /// Creates the handle and spawns its event relay task.
    pub(crate) fn new(
        session: BackendSession,
        handle_id: HandleId,
        plugin_package: impl Into<String>,
        queue_capacity: usize,
        listener: Arc<dyn BackendListener>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));

        tokio::spawn(run_relay(handle_id, queue_rx, listener));

        Self {
            inner: Arc::new(HandleInner {
                handle_id,
                plugin_package: plugin_package.into(),
                session,
                queue_tx: Mutex::new(Some(queue_tx)),
                detached: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the backend-assigned handle identifier.
    #[inline]
    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.inner.handle_id
    }

    /// Returns the attached plugin package name.
    #[inline]
    #[must_use]
    pub fn plugin_package(&self) -> &str {
        &self.inner.plugin_package
    }

    /// Returns the owning backend session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &BackendSession {
        &self.inner.session
    }

    /// Returns `true` once the handle is detached or closed.
    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Enqueues one asynchronous event for the relay task.
    ///
    /// Never blocks. A full queue drops the new event with a warning,
    /// a closed one drops it silently.
    pub(crate) fn queue_event(&self, event: Value) {
        let guard = self.inner.queue_tx.lock();
        let Some(queue_tx) = guard.as_ref() else {
            debug!(handle = %self.inner.handle_id, "Handle closed, dropped backend event");
            return;
        };

        match queue_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    handle = %self.inner.handle_id,
                    plugin = %self.inner.plugin_package,
                    "Event queue full, dropped backend event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(handle = %self.inner.handle_id, "Event queue gone, dropped backend event");
            }
        }
    }

    /// Closes the event queue without telling the backend.
    ///
    /// Used when the backend itself announced the detach, or when the
    /// whole session is torn down. The relay task drains remaining
    /// events and fires `on_close`.
    pub(crate) fn mark_closed(&self) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.queue_tx.lock().take();
        debug!(handle = %self.inner.handle_id, "Backend handle closed");
    }

    /// Detaches the handle from the backend plugin.
    ///
    /// Idempotent. The detach request is fire-and-forget; the local
    /// teardown does not depend on the backend answering.
    pub fn detach(&self) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.queue_tx.lock().take();
        self.inner.session.forget_handle(self.inner.handle_id);

        self.inner.session.fire(json!({
            "janus": "detach",
            "handle_id": self.inner.handle_id.raw(),
        }));
        debug!(
            handle = %self.inner.handle_id,
            plugin = %self.inner.plugin_package,
            "Backend handle detached"
        );
    }

    /// Sends a plugin message and waits for the plugin's answer.
    ///
    /// An intermediate `ack` is swallowed; the call resolves on the
    /// final `event` or `success` carrying plugin data. Returns the
    /// plugin data together with the answer JSEP, if any.
    ///
    /// # Errors
    ///
    /// - [`Error::HandleNotFound`] if the handle is already detached
    /// - [`Error::Plugin`] when the backend answered with an error
    /// - [`Error::BadGateway`] when the answer carried no plugin data
    pub async fn send_message(
        &self,
        body: Value,
        jsep: Option<Value>,
    ) -> Result<(Value, Option<Value>)> {
        self.ensure_attached()?;

        let mut msg = json!({
            "janus": "message",
            "handle_id": self.inner.handle_id.raw(),
            "body": body,
        });
        if let Some(jsep) = jsep {
            msg["jsep"] = jsep;
        }

        let answer = self.inner.session.execute(msg, true).await?;
        if let Some(err) = message::backend_error(&answer) {
            return Err(err);
        }

        match message::plugin_data(&answer) {
            Some((_, data)) => Ok((data.clone(), answer.get("jsep").cloned())),
            None => Err(Error::bad_gateway("backend answer carried no plugin data")),
        }
    }

    /// Sends a plugin message without waiting for any answer.
    ///
    /// The backend's eventual answer, if any, surfaces only in logs.
    /// Dropped silently once the handle is detached.
    pub fn async_send_message(&self, body: Value, jsep: Option<Value>) {
        if self.is_detached() {
            debug!(handle = %self.inner.handle_id, "Handle detached, dropped async message");
            return;
        }

        let mut msg = json!({
            "janus": "message",
            "handle_id": self.inner.handle_id.raw(),
            "body": body,
        });
        if let Some(jsep) = jsep {
            msg["jsep"] = jsep;
        }
        self.inner.session.fire(msg);
    }

    /// Forwards trickled ICE candidates to the backend plugin.
    ///
    /// # Errors
    ///
    /// - [`Error::HandleNotFound`] if the handle is already detached
    /// - [`Error::Plugin`] when the backend answered with an error
    pub async fn send_trickle(&self, trickle: &Trickle) -> Result<()> {
        self.ensure_attached()?;

        let mut msg = json!({
            "janus": "trickle",
            "handle_id": self.inner.handle_id.raw(),
        });
        trickle.attach_to(&mut msg);

        let answer = self.inner.session.execute(msg, false).await?;
        if let Some(err) = message::backend_error(&answer) {
            return Err(err);
        }
        Ok(())
    }

    /// Hangs up the PeerConnection on the backend, keeping the handle.
    ///
    /// # Errors
    ///
    /// - [`Error::HandleNotFound`] if the handle is already detached
    /// - [`Error::Plugin`] when the backend answered with an error
    pub async fn send_hangup(&self) -> Result<()> {
        self.ensure_attached()?;

        let msg = json!({
            "janus": "hangup",
            "handle_id": self.inner.handle_id.raw(),
        });

        let answer = self.inner.session.execute(msg, false).await?;
        if let Some(err) = message::backend_error(&answer) {
            return Err(err);
        }
        Ok(())
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_detached() {
            return Err(Error::handle_not_found(self.inner.handle_id));
        }
        Ok(())
    }
}

// ============================================================================
// Event relay
// ============================================================================

/// Drains the event queue into the listener, then announces the close.
async fn run_relay(
    handle_id: HandleId,
    mut queue_rx: mpsc::Receiver<Value>,
    listener: Arc<dyn BackendListener>,
) {
    while let Some(event) = queue_rx.recv().await {
        if let Err(e) = listener.on_async_event(event).await {
            warn!(handle = %handle_id, error = %e, "Event listener failed");
        }
    }

    if let Err(e) = listener.on_close(handle_id).await {
        warn!(handle = %handle_id, error = %e, "Close listener failed");
    }
    debug!(handle = %handle_id, "Event relay terminated");
}

// ============================================================================
// Tests
// ============================================================================
