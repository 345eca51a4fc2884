//! In-process request dispatch walkthrough.
//!
//! Demonstrates:
//! - Wiring config, plugin registry, session manager and handler
//! - The create / attach / message / destroy lifecycle
//! - Synchronous replies vs ack-then-event plugin answers
//!
//! Runs entirely in-process; no Janus server is needed.
//!
//! Usage:
//!   cargo run --example dispatch
//!   cargo run --example dispatch -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use common::Args;
use janus_proxy::frontend::{HandleCore, MessageResult, Plugin, PluginHandle, PluginRegistry};
use janus_proxy::protocol::{Trickle, message};
use janus_proxy::transport::next_transport_id;
use janus_proxy::{
    FrontendSession, FrontendSessionManager, HandleId, ProxyConfig, RequestHandler, Result,
    SessionId, Transport, TransportId,
};

// ============================================================================
// Console Transport
// ============================================================================

/// Prints everything the proxy pushes at the client.
struct ConsoleTransport {
    transport_id: TransportId,
}

impl ConsoleTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            transport_id: next_transport_id(),
        })
    }

    fn as_dyn(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn transport_id(&self) -> TransportId {
        self.transport_id
    }

    async fn send_message(&self, message: Value) -> Result<()> {
        println!("    <- push: {message}");
        Ok(())
    }

    async fn session_created(&self, session_id: SessionId) {
        println!("    <- session {session_id} bound to this transport");
    }

    async fn session_over(&self, session_id: SessionId, timeout: bool, claimed: bool) {
        println!("    <- session {session_id} over (timeout={timeout}, claimed={claimed})");
    }

    async fn session_claimed(&self, session_id: SessionId) {
        println!("    <- session {session_id} claimed away");
    }
}

// ============================================================================
// Demo Plugin
// ============================================================================

/// Echoes message bodies back, synchronously or as a late event.
struct DemoEcho;

impl DemoEcho {
    const PACKAGE: &'static str = "demo.plugin.echo";
}

impl Plugin for DemoEcho {
    fn package(&self) -> &str {
        Self::PACKAGE
    }

    fn name(&self) -> &str {
        "Demo Echo"
    }

    fn create_handle(
        &self,
        handle_id: HandleId,
        session: FrontendSession,
        opaque_id: Option<String>,
    ) -> Result<Arc<dyn PluginHandle>> {
        Ok(Arc::new(DemoEchoHandle {
            core: HandleCore::new(handle_id, Self::PACKAGE, opaque_id, session),
        }))
    }
}

struct DemoEchoHandle {
    core: HandleCore,
}

#[async_trait]
impl PluginHandle for DemoEchoHandle {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    async fn handle_message(&self, body: Value, _jsep: Option<Value>) -> Result<MessageResult> {
        if body.get("delay").is_some() {
            // Answer later, through the session's transport.
            let session = self.core.session().clone();
            let handle_id = self.core.handle_id();
            let opaque_id = self.core.opaque_id().map(str::to_owned);
            self.core.queue_async(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let event = message::plugin_event(
                    session.session_id(),
                    handle_id,
                    opaque_id.as_deref(),
                    None,
                    DemoEcho::PACKAGE,
                    json!({"demo": "late-reply"}),
                    None,
                );
                session.relay_event(event).await;
                Ok(())
            });
            return Ok(MessageResult::OkWait(Some("queued".to_owned())));
        }

        Ok(MessageResult::Ok(json!({"demo": "echo", "received": body})))
    }

    async fn handle_trickle(&self, _trickle: Trickle) -> Result<()> {
        println!("    (plugin) trickle candidate received");
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== dispatch: request lifecycle ===\n");

    // ========================================================================
    // Wire Up
    // ========================================================================

    println!("[1] Wiring up the proxy core...");

    let config = Arc::new(ProxyConfig::new().with_server_name("Janus Proxy Demo"));
    let plugins = Arc::new(PluginRegistry::new());
    plugins.register(Arc::new(DemoEcho));

    let manager = FrontendSessionManager::new(Arc::clone(&config), plugins);
    let handler = RequestHandler::new(Arc::clone(&config), Arc::clone(&manager));
    let transport = ConsoleTransport::new();

    println!("    ✓ Handler ready\n");

    // ========================================================================
    // Server Info
    // ========================================================================

    println!("[2] info / ping...");

    let reply = handler
        .handle_request(transport.as_dyn(), json!({"janus": "info", "transaction": "t-0"}))
        .await;
    println!("    info -> {reply}");

    let reply = handler
        .handle_request(transport.as_dyn(), json!({"janus": "ping", "transaction": "t-1"}))
        .await;
    println!("    ping -> {reply}\n");

    // ========================================================================
    // Session + Handle
    // ========================================================================

    println!("[3] create session...");

    let reply = handler
        .handle_request(
            transport.as_dyn(),
            json!({"janus": "create", "transaction": "t-2"}),
        )
        .await;
    let session_id = reply["data"]["id"].as_u64().expect("session id");
    println!("    ✓ Session: {session_id}\n");

    println!("[4] attach demo plugin...");

    let reply = handler
        .handle_request(
            transport.as_dyn(),
            json!({
                "janus": "attach",
                "transaction": "t-3",
                "session_id": session_id,
                "plugin": DemoEcho::PACKAGE,
                "opaque_id": "demo-tour",
            }),
        )
        .await;
    let handle_id = reply["data"]["id"].as_u64().expect("handle id");
    println!("    ✓ Handle: {handle_id}\n");

    // ========================================================================
    // Messages
    // ========================================================================

    println!("[5] synchronous message...");

    let reply = handler
        .handle_request(
            transport.as_dyn(),
            json!({
                "janus": "message",
                "transaction": "t-4",
                "session_id": session_id,
                "handle_id": handle_id,
                "body": {"greeting": "hello"},
            }),
        )
        .await;
    println!("    -> {reply:#}\n");

    println!("[6] asynchronous message (ack now, event later)...");

    let reply = handler
        .handle_request(
            transport.as_dyn(),
            json!({
                "janus": "message",
                "transaction": "t-5",
                "session_id": session_id,
                "handle_id": handle_id,
                "body": {"delay": true},
            }),
        )
        .await;
    println!("    -> {reply}");

    // Give the late event time to land on the transport.
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!();

    println!("[7] trickle...");

    let reply = handler
        .handle_request(
            transport.as_dyn(),
            json!({
                "janus": "trickle",
                "transaction": "t-6",
                "session_id": session_id,
                "handle_id": handle_id,
                "candidate": {"sdpMid": "0", "sdpMLineIndex": 0, "candidate": "candidate:0 1 UDP 1 127.0.0.1 9 typ host"},
            }),
        )
        .await;
    println!("    -> {reply}\n");

    // ========================================================================
    // Teardown
    // ========================================================================

    println!("[8] destroy session...");

    let reply = handler
        .handle_request(
            transport.as_dyn(),
            json!({
                "janus": "destroy",
                "transaction": "t-7",
                "session_id": session_id,
            }),
        )
        .await;
    println!("    -> {reply}");

    manager.shutdown();
    println!("\n=== Lifecycle complete ===");

    Ok(())
}
