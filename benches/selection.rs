//! Server selection benchmark suite.
//!
//! Benchmarks the directory scan and every compiled-in selection
//! strategy at different cluster sizes:
//! - Selection: 4, 16, 64 servers per strategy
//! - Directory scan: 16, 64, 256, 1024 servers
//!
//! Run with: cargo bench --bench selection
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use janus_proxy::backend::{STRATEGY_NAMES, SelectContext, strategy_for};
use janus_proxy::{BackendServer, ProxyConfig, ServerRegistry, ServerSelector};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SELECTION_COUNTS: &[usize] = &[4, 16, 64];
const DIRECTORY_COUNTS: &[usize] = &[16, 64, 256, 1024];

// ============================================================================
// Benchmark: Strategy Selection
// ============================================================================

fn bench_choose_server(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("choose_server");

    for strategy_name in STRATEGY_NAMES {
        for &count in SELECTION_COUNTS {
            let registry = rt.block_on(async { seeded_registry(count) });
            let selector = ServerSelector::new(
                Arc::clone(&registry),
                strategy_for(strategy_name).expect("compiled-in strategy"),
            );

            group.bench_with_input(
                BenchmarkId::new(strategy_name, count),
                &count,
                |b, _| {
                    b.iter(|| {
                        black_box(
                            selector
                                .choose_server(&SelectContext::new())
                                .expect("selection"),
                        )
                    });
                },
            );

            registry.shutdown();
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Directory Scan
// ============================================================================

fn bench_directory_scan(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("directory");

    for &count in DIRECTORY_COUNTS {
        let registry = rt.block_on(async { seeded_registry(count) });

        group.bench_with_input(
            BenchmarkId::new("valid_servers", count),
            &count,
            |b, _| {
                b.iter(|| black_box(registry.valid_servers()));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("update_server", count),
            &count,
            |b, _| {
                b.iter(|| {
                    registry.update_server(
                        BackendServer::new("media-0000", "ws://10.0.0.1:8188/janus")
                            .with_load(3, 41),
                    );
                });
            },
        );

        registry.shutdown();
    }

    group.finish();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Builds a registry holding `count` servers with spread-out loads.
///
/// Must run inside a Tokio runtime; the registry spawns its purge task
/// on creation.
fn seeded_registry(count: usize) -> Arc<ServerRegistry> {
    let registry = ServerRegistry::new(&ProxyConfig::new());
    for i in 0..count {
        registry.update_server(
            BackendServer::new(
                format!("media-{i:04}"),
                format!("ws://10.0.{}.{}:8188/janus", i / 250, i % 250 + 1),
            )
            .with_load(i as u64 % 7, (i as u64 * 13) % 97),
        );
    }
    registry
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_choose_server, bench_directory_scan);
criterion_main!(benches);
