//! Live backend session against a real Janus server.
//!
//! Demonstrates:
//! - Opening the shared backend session for a server URL
//! - Attaching an EchoTest handle with an event listener
//! - The message round trip and the teardown cascade
//!
//! Requires a Janus instance with its WebSocket API enabled; point
//! $JANUS_URL at it (default: ws://127.0.0.1:8188/janus).
//!
//! Usage:
//!   cargo run --example backend_attach
//!   cargo run --example backend_attach -- --debug
//!   JANUS_URL=ws://janus.example.org:8188/janus cargo run --example backend_attach

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use common::Args;
use janus_proxy::backend::{BackendListener, BackendRegistry};
use janus_proxy::{BackendServer, HandleId, ProxyConfig, Result, ServerRegistry};

// ============================================================================
// Event Listener
// ============================================================================

/// Prints every asynchronous event the backend pushes at the handle.
struct PrintListener;

#[async_trait]
impl BackendListener for PrintListener {
    async fn on_async_event(&self, event: Value) -> Result<()> {
        println!("    <- event: {event}");
        Ok(())
    }

    async fn on_close(&self, handle_id: HandleId) -> Result<()> {
        println!("    <- handle {handle_id} closed by the backend");
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

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        eprintln!("        Is a Janus instance listening on {}?", common::backend_url());
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== backend_attach: live Janus session ===\n");

    let url = common::backend_url();

    // ========================================================================
    // Open Backend Session
    // ========================================================================

    println!("[1] Opening backend session...");
    println!("    URL: {url}");

    let config = Arc::new(ProxyConfig::new());
    let servers = ServerRegistry::new(&config);
    let registry = BackendRegistry::new(Arc::clone(&config), Arc::clone(&servers));

    let server = BackendServer::new("demo-janus", &url);
    servers.update_server(server.clone());

    let session = registry.get_or_create(&server).await?;

    println!("    ✓ Session: {}", session.session_id());
    println!(
        "    ✓ Server timeout: {}s\n",
        session.session_timeout().as_secs()
    );

    // ========================================================================
    // Attach EchoTest
    // ========================================================================

    println!("[2] Attaching janus.plugin.echotest...");

    let handle = session
        .attach("janus.plugin.echotest", Some("backend-demo"), Arc::new(PrintListener))
        .await?;

    println!("    ✓ Handle: {}\n", handle.handle_id());

    // ========================================================================
    // Message Round Trip
    // ========================================================================

    println!("[3] Sending echotest message...");

    let (data, jsep) = handle
        .send_message(json!({"audio": true, "video": true}), None)
        .await?;

    println!("    -> plugindata: {data}");
    if let Some(jsep) = jsep {
        println!("    -> jsep: {jsep}");
    }
    println!();

    common::wait_for_exit(args.no_wait).await;

    // ========================================================================
    // Teardown
    // ========================================================================

    println!("\n[4] Tearing down...");

    handle.detach();
    registry.shutdown();
    servers.shutdown();

    // Let the detach and destroy frames flush before the process exits.
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("    ✓ Done");
    Ok(())
}
