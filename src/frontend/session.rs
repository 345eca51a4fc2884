//! Frontend session lifecycle and the session manager.
//!
//! A [`FrontendSession`] is one client-facing signaling context: a
//! session id, the transport it is bound to, and its plugin handles.
//! The [`FrontendSessionManager`] owns the id map plus the idle sweep
//! that reaps sessions whose client went quiet.
//!
//! Transport binding is dynamic: `claim` rebinds an existing session
//! to a new transport (client reconnects), `transport_gone` destroys
//! everything a dead transport still owned.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::identifiers::{HandleId, SessionId};
use crate::protocol::message;
use crate::transport::{Transport, TransportId};

use super::handle::PluginHandle;
use super::plugin::PluginRegistry;

// ============================================================================
// FrontendSession
// ============================================================================

struct SessionInner {
    /// Session identifier.
    session_id: SessionId,
    /// Transport the session is currently bound to.
    transport: Mutex<Arc<dyn Transport>>,
    /// Live handles by handle id.
    handles: Mutex<FxHashMap<HandleId, Arc<dyn PluginHandle>>>,
    /// Touched by every request that resolves the session.
    last_activity: Mutex<Instant>,
    /// Set once the manager destroyed the session.
    destroyed: AtomicBool,
}

/// Client-facing signaling session.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct FrontendSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for FrontendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontendSession")
            .field("session_id", &self.inner.session_id)
            .finish_non_exhaustive()
    }
}

impl FrontendSession {
    pub(crate) fn new(session_id: SessionId, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session_id,
                transport: Mutex::new(transport),
                handles: Mutex::new(FxHashMap::default()),
                last_activity: Mutex::new(Instant::now()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the session identifier.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    /// Returns the currently bound transport.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport.lock())
    }

    /// Rebinds the session to a new transport, returning the old one.
    pub(crate) fn bind_transport(&self, transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
        std::mem::replace(&mut *self.inner.transport.lock(), transport)
    }

    /// Refreshes the idle clock.
    pub fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Returns how long the session has been idle.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Returns `true` once the session is destroyed.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
    }

    /// Resolves a handle on this session.
    ///
    /// # Errors
    ///
    /// - [`Error::HandleNotFound`] if absent
    pub fn find_handle(&self, handle_id: HandleId) -> Result<Arc<dyn PluginHandle>> {
        self.inner
            .handles
            .lock()
            .get(&handle_id)
            .cloned()
            .ok_or_else(|| Error::handle_not_found(handle_id))
    }

    /// Returns `true` when the handle id is taken on this session.
    #[must_use]
    pub fn has_handle(&self, handle_id: HandleId) -> bool {
        self.inner.handles.lock().contains_key(&handle_id)
    }

    /// Registers a handle under its own id. Returns `false` when the
    /// id is already taken.
    pub(crate) fn insert_handle(&self, handle: Arc<dyn PluginHandle>) -> bool {
        let mut handles = self.inner.handles.lock();
        match handles.entry(handle.handle_id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Removes a handle from the session's bookkeeping.
    pub fn remove_handle(&self, handle_id: HandleId) -> Option<Arc<dyn PluginHandle>> {
        self.inner.handles.lock().remove(&handle_id)
    }

    /// Removes and returns every handle.
    pub(crate) fn drain_handles(&self) -> Vec<Arc<dyn PluginHandle>> {
        let mut handles = self.inner.handles.lock();
        handles.drain().map(|(_, handle)| handle).collect()
    }

    /// Returns the number of live handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Delivers an event to the client, best-effort.
    pub async fn relay_event(&self, msg: Value) {
        let transport = self.transport();
        if let Err(e) = transport.send_message(msg).await {
            debug!(
                session = %self.inner.session_id,
                error = %e,
                "Transport delivery failed, event dropped"
            );
        }
    }
}

// ============================================================================
// FrontendSessionManager
// ============================================================================

/// Owner of all frontend sessions.
///
/// Spawns the idle sweep on construction; `shutdown` stops it.
pub struct FrontendSessionManager {
    config: Arc<ProxyConfig>,
    plugins: Arc<PluginRegistry>,
    sessions: Mutex<FxHashMap<SessionId, FrontendSession>>,
    shutdown: AtomicBool,
}

impl FrontendSessionManager {
    /// Creates the manager and starts its idle sweep task.
    #[must_use]
    pub fn new(config: Arc<ProxyConfig>, plugins: Arc<PluginRegistry>) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            plugins,
            sessions: Mutex::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&manager).sweep_loop());

        manager
    }

    /// Creates a new session bound to a transport.
    ///
    /// A zero `requested` id means "assign one": a fresh random id not
    /// already in the map. An explicit id that is already taken is a
    /// conflict.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionConflict`] when the explicit id is taken
    pub async fn create_session(
        &self,
        requested: SessionId,
        transport: Arc<dyn Transport>,
    ) -> Result<FrontendSession> {
        let session = {
            let mut sessions = self.sessions.lock();
            let session_id = if requested.is_auto() {
                loop {
                    let candidate = SessionId::generate();
                    if !sessions.contains_key(&candidate) {
                        break candidate;
                    }
                }
            } else {
                if sessions.contains_key(&requested) {
                    return Err(Error::session_conflict(requested));
                }
                requested
            };

            let session = FrontendSession::new(session_id, Arc::clone(&transport));
            sessions.insert(session_id, session.clone());
            session
        };

        transport.session_created(session.session_id()).await;
        debug!(
            session = %session.session_id(),
            transport = transport.transport_id(),
            "Frontend session created"
        );
        Ok(session)
    }

    /// Resolves a session and refreshes its idle clock.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if absent
    pub fn find_session(&self, session_id: SessionId) -> Result<FrontendSession> {
        let session = self
            .sessions
            .lock()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id))?;
        session.touch();
        Ok(session)
    }

    /// Destroys a session: detaches every handle, then notifies the
    /// transport.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if absent
    pub async fn destroy_session(&self, session_id: SessionId) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(&session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        self.destroy_inner(session, false, false).await;
        Ok(())
    }

    /// Rebinds a session to a new transport.
    ///
    /// The old transport learns it lost the session, the new one that
    /// it gained it.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if absent
    pub async fn claim_session(
        &self,
        session_id: SessionId,
        new_transport: Arc<dyn Transport>,
    ) -> Result<FrontendSession> {
        let session = self.find_session(session_id)?;
        let old_transport = session.bind_transport(Arc::clone(&new_transport));

        old_transport.session_claimed(session_id).await;
        new_transport.session_created(session_id).await;
        debug!(
            session = %session_id,
            from = old_transport.transport_id(),
            to = new_transport.transport_id(),
            "Frontend session claimed"
        );
        Ok(session)
    }

    /// Destroys every session bound to a gone transport. Returns how
    /// many sessions went with it.
    pub async fn transport_gone(&self, transport_id: TransportId) -> usize {
        let orphans: Vec<FrontendSession> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, s)| s.transport().transport_id() == transport_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = orphans.len();
        for session in orphans {
            self.destroy_inner(session, false, false).await;
        }
        if count > 0 {
            debug!(transport = transport_id, count, "Sessions destroyed with gone transport");
        }
        count
    }

    /// Attaches a plugin handle on a session.
    ///
    /// # Errors
    ///
    /// - [`Error::PluginNotFound`] for unknown packages
    /// - whatever the plugin factory raises
    pub async fn attach_handle(
        &self,
        session: &FrontendSession,
        plugin_package: &str,
        opaque_id: Option<String>,
    ) -> Result<Arc<dyn PluginHandle>> {
        let plugin = self.plugins.get(plugin_package)?;

        loop {
            let handle_id = HandleId::generate();
            if session.has_handle(handle_id) {
                continue;
            }
            let handle = plugin.create_handle(handle_id, session.clone(), opaque_id.clone())?;
            if session.insert_handle(Arc::clone(&handle)) {
                debug!(
                    session = %session.session_id(),
                    handle = %handle_id,
                    plugin = plugin_package,
                    "Frontend handle attached"
                );
                return Ok(handle);
            }
        }
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns the plugin registry behind this manager.
    #[must_use]
    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Stops the idle sweep.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Idle sweep with self-adjusting cadence: the time a sweep takes
    /// is subtracted from the next sleep so the period does not drift.
    async fn sweep_loop(self: Arc<Self>) {
        let mut elapsed = Duration::ZERO;
        loop {
            let interval = self.config.sweep_interval;
            tokio::time::sleep(interval.saturating_sub(elapsed)).await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let started = Instant::now();
            let reaped = self.sweep_idle().await;
            if reaped > 0 {
                debug!(reaped, "Idle frontend sessions reaped");
            }
            elapsed = started.elapsed();
        }
        debug!("Session sweep terminated");
    }

    /// Reaps sessions idle past the configured timeout.
    async fn sweep_idle(&self) -> usize {
        let timeout = self.config.session_timeout;
        let expired: Vec<FrontendSession> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for() >= timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = expired.len();
        for session in expired {
            warn!(session = %session.session_id(), "Frontend session timed out");
            session
                .relay_event(message::notification(
                    "timeout",
                    session.session_id(),
                    None,
                ))
                .await;
            self.destroy_inner(session, true, false).await;
        }
        count
    }

    /// Shared teardown: cascade detach, then notify the transport.
    async fn destroy_inner(&self, session: FrontendSession, timed_out: bool, claimed: bool) {
        for handle in session.drain_handles() {
            handle.detach().await;
        }
        session.mark_destroyed();

        session
            .transport()
            .session_over(session.session_id(), timed_out, claimed)
            .await;
        debug!(
            session = %session.session_id(),
            timed_out,
            "Frontend session destroyed"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
