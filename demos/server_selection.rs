//! Server directory and selection strategy walkthrough.
//!
//! Demonstrates:
//! - Seeding the server directory with static and announced entries
//! - How health and expiry filter the selectable set
//! - The pick distribution of every compiled-in strategy
//!
//! Runs entirely in-process; no Janus server is needed.
//!
//! Usage:
//!   cargo run --example server_selection
//!   cargo run --example server_selection -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::Args;
use janus_proxy::backend::{STRATEGY_NAMES, SelectContext, strategy_for};
use janus_proxy::{BackendServer, ProxyConfig, Result, ServerRegistry, ServerSelector, ServerStatus};

// ============================================================================
// Constants
// ============================================================================

const PICKS_PER_STRATEGY: usize = 8;

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
    println!("=== server_selection: directory & strategies ===\n");

    // ========================================================================
    // Seed Directory
    // ========================================================================

    println!("[1] Seeding the server directory...");

    let config = ProxyConfig::new();
    let registry = ServerRegistry::new(&config);

    registry.update_server(
        BackendServer::new("media-0", "ws://10.0.0.10:8188/janus")
            .with_location("eu-west")
            .with_isp("hetzner")
            .with_load(12, 40),
    );
    registry.update_server(
        BackendServer::new("media-1", "ws://10.0.0.11:8188/janus")
            .with_location("eu-west")
            .with_isp("ovh")
            .with_load(3, 8),
    );
    registry.update_server(
        BackendServer::new("media-2", "ws://10.0.0.12:8188/janus")
            .with_location("us-east")
            .with_isp("aws")
            .with_load(7, 21),
    );
    registry.update_server(
        BackendServer::new("media-3", "ws://10.0.0.13:8188/janus")
            .with_status(ServerStatus::Maintenance),
    );

    println!("    ✓ {} servers registered\n", registry.server_count());

    // ========================================================================
    // Selectable Set
    // ========================================================================

    println!("[2] Selectable servers (maintenance filtered out):");

    for server in registry.valid_servers() {
        println!(
            "    {:8} {:28} handles={:<3} location={:8} isp={}",
            server.name, server.url, server.handle_num, server.location, server.isp
        );
    }
    println!();

    // ========================================================================
    // Strategy Distributions
    // ========================================================================

    println!("[3] Pick distribution, {PICKS_PER_STRATEGY} picks per strategy:");

    for strategy_name in STRATEGY_NAMES {
        let selector =
            ServerSelector::new(Arc::clone(&registry), strategy_for(strategy_name)?);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..PICKS_PER_STRATEGY {
            let chosen = selector.choose_server(&SelectContext::new())?;
            *counts.entry(chosen.name).or_default() += 1;
        }

        let mut spread: Vec<(String, usize)> = counts.into_iter().collect();
        spread.sort();
        let spread: Vec<String> = spread
            .into_iter()
            .map(|(name, count)| format!("{name}x{count}"))
            .collect();
        println!("    {:16} {}", strategy_name, spread.join("  "));
    }
    println!("    (least-loaded keeps its optimistic counts in the directory)\n");

    // ========================================================================
    // Announcements and Expiry
    // ========================================================================

    println!("[4] Announced entries expire without refresh...");

    registry.update_server(
        BackendServer::new("ephemeral", "ws://10.0.0.99:8188/janus")
            .with_expire(Duration::from_millis(300)),
    );
    println!("    announced 'ephemeral', expire=300ms");
    println!("    selectable now: {}", registry.valid_servers().len());

    tokio::time::sleep(Duration::from_millis(400)).await;

    println!("    selectable after 400ms: {}", registry.valid_servers().len());
    let purged = registry.purge_expired();
    println!("    ✓ purge removed {purged} entry\n");

    registry.shutdown();
    println!("=== Directory tour complete ===");

    Ok(())
}
