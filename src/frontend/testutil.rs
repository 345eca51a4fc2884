//! Shared frontend test doubles: a recording transport and an echo
//! plugin with scriptable answers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{HandleId, SessionId};
use crate::protocol::Trickle;
use crate::protocol::message;
use crate::transport::{Transport, TransportId, next_transport_id};

use super::handle::{HandleCore, MessageResult, PluginHandle};
use super::plugin::{Plugin, PluginRegistry};
use super::session::FrontendSession;

// ============================================================================
// MockTransport
// ============================================================================

/// Transport double recording every notification it receives.
pub(crate) struct MockTransport {
    transport_id: TransportId,
    sent: Mutex<Vec<Value>>,
    created: Mutex<Vec<SessionId>>,
    over: Mutex<Vec<(SessionId, bool, bool)>>,
    claimed: Mutex<Vec<SessionId>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            transport_id: next_transport_id(),
            sent: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            over: Mutex::new(Vec::new()),
            claimed: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn clone_dyn(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub(crate) fn created(&self) -> Vec<SessionId> {
        self.created.lock().clone()
    }

    pub(crate) fn over(&self) -> Vec<(SessionId, bool, bool)> {
        self.over.lock().clone()
    }

    pub(crate) fn claimed(&self) -> Vec<SessionId> {
        self.claimed.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_id(&self) -> TransportId {
        self.transport_id
    }

    async fn send_message(&self, message: Value) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    async fn session_created(&self, session_id: SessionId) {
        self.created.lock().push(session_id);
    }

    async fn session_over(&self, session_id: SessionId, timeout: bool, claimed: bool) {
        self.over.lock().push((session_id, timeout, claimed));
    }

    async fn session_claimed(&self, session_id: SessionId) {
        self.claimed.lock().push(session_id);
    }
}

// ============================================================================
// EchoPlugin
// ============================================================================

/// Echo plugin answering synchronously, asynchronously or with an
/// error depending on the request body.
///
/// | body element | `handle_message` behavior |
/// |--------------|---------------------------|
/// | `"async": true` | `OkWait`, then an `event` through the worker |
/// | `"fail": true`  | plugin error 499 |
/// | anything else   | `Ok({"echotest":"ok"})` |
pub(crate) struct EchoPlugin {
    created: Mutex<Vec<Arc<EchoHandle>>>,
}

impl EchoPlugin {
    pub(crate) const PACKAGE: &'static str = "janus.plugin.echotest";

    /// Builds the plugin and registers it.
    pub(crate) fn register(registry: &Arc<PluginRegistry>) -> Arc<Self> {
        let plugin = Arc::new(Self {
            created: Mutex::new(Vec::new()),
        });
        registry.register(Arc::clone(&plugin) as Arc<dyn Plugin>);
        plugin
    }

    /// Every handle this plugin ever created.
    pub(crate) fn created(&self) -> Vec<Arc<EchoHandle>> {
        self.created.lock().clone()
    }
}

impl Plugin for EchoPlugin {
    fn package(&self) -> &str {
        Self::PACKAGE
    }

    fn name(&self) -> &str {
        "Echo Test"
    }

    fn create_handle(
        &self,
        handle_id: HandleId,
        session: FrontendSession,
        opaque_id: Option<String>,
    ) -> Result<Arc<dyn PluginHandle>> {
        let handle = Arc::new(EchoHandle {
            core: HandleCore::new(handle_id, Self::PACKAGE, opaque_id, session),
            trickles: AtomicUsize::new(0),
            hangups: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        self.created.lock().push(Arc::clone(&handle));
        Ok(handle)
    }
}

pub(crate) struct EchoHandle {
    core: HandleCore,
    trickles: AtomicUsize,
    hangups: AtomicUsize,
    closes: AtomicUsize,
}

impl EchoHandle {
    pub(crate) fn trickle_count(&self) -> usize {
        self.trickles.load(Ordering::SeqCst)
    }

    pub(crate) fn hangup_count(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginHandle for EchoHandle {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    async fn handle_message(&self, body: Value, _jsep: Option<Value>) -> Result<MessageResult> {
        if body["fail"] == true {
            return Err(Error::plugin(499, "echo failure"));
        }

        if body["async"] == true {
            let session = self.core.session().clone();
            let handle_id = self.core.handle_id();
            let opaque_id = self.core.opaque_id().map(str::to_owned);
            self.core.queue_async(async move {
                let event = message::plugin_event(
                    session.session_id(),
                    handle_id,
                    opaque_id.as_deref(),
                    None,
                    EchoPlugin::PACKAGE,
                    json!({"echotest": "event"}),
                    None,
                );
                session.relay_event(event).await;
                Ok(())
            });
            return Ok(MessageResult::OkWait(Some("processing".to_owned())));
        }

        Ok(MessageResult::Ok(json!({"echotest": "ok"})))
    }

    async fn handle_trickle(&self, _trickle: Trickle) -> Result<()> {
        self.trickles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_hangup(&self) -> Result<()> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
