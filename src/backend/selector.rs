//! Backend server selection.
//!
//! When a plugin needs a backend for a new attachment it asks a
//! [`ServerSelector`], which filters the registry down to selectable
//! servers and lets a [`SelectionStrategy`] pick one.
//!
//! Strategies are compiled in and looked up by name through
//! [`strategy_for`]; configuration names one with its
//! `selection_policy` field.
//!
//! | Name | Behavior |
//! |------|----------|
//! | `round-robin` | Rotates through the candidate list |
//! | `random` | Uniform draw |
//! | `weighted-random` | Draw weighted by inverse handle count |
//! | `least-loaded` | Lowest handle count, with optimistic accounting |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use tracing::debug;

use crate::backend::server::{BackendServer, ServerRegistry};
use crate::config::ProxyConfig;
use crate::error::{Error, Result};

// ============================================================================
// SelectContext
// ============================================================================

/// Hints a caller can pass into selection.
///
/// The built-in strategies ignore these; placement-aware strategies
/// can match them against server location and carrier fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectContext<'a> {
    /// Plugin package the attachment is for.
    pub plugin_package: Option<&'a str>,
    /// Preferred deployment location.
    pub location: Option<&'a str>,
    /// Preferred network carrier.
    pub isp: Option<&'a str>,
}

impl<'a> SelectContext<'a> {
    /// Creates an empty context.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            plugin_package: None,
            location: None,
            isp: None,
        }
    }

    /// Sets the plugin package hint.
    #[inline]
    #[must_use]
    pub const fn with_plugin(mut self, package: &'a str) -> Self {
        self.plugin_package = Some(package);
        self
    }
}

// ============================================================================
// SelectionStrategy Trait
// ============================================================================

/// Picks one server out of a non-empty candidate list.
///
/// Candidates arrive pre-filtered to selectable servers, sorted by
/// name. Implementations return an index into the slice, or `None` to
/// decline every candidate.
pub trait SelectionStrategy: Send + Sync {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Chooses a candidate index.
    fn select(
        &self,
        candidates: &[BackendServer],
        registry: &ServerRegistry,
        ctx: &SelectContext<'_>,
    ) -> Option<usize>;
}

impl std::fmt::Debug for dyn SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionStrategy")
            .field("name", &self.name())
            .finish()
    }
}

// ============================================================================
// Built-in Strategies
// ============================================================================

/// Rotates through the candidate list.
///
/// With a stable candidate list, a full rotation visits every server
/// exactly once.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Creates a rotation starting at the first candidate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(
        &self,
        candidates: &[BackendServer],
        _registry: &ServerRegistry,
        _ctx: &SelectContext<'_>,
    ) -> Option<usize> {
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(cursor % candidates.len())
    }
}

/// Uniform random draw.
#[derive(Debug, Default)]
pub struct Random;

impl SelectionStrategy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(
        &self,
        candidates: &[BackendServer],
        _registry: &ServerRegistry,
        _ctx: &SelectContext<'_>,
    ) -> Option<usize> {
        Some(rand::thread_rng().gen_range(0..candidates.len()))
    }
}

/// Random draw weighted by inverse handle count.
///
/// A server holding no handles weighs `1.0`; one holding `n` handles
/// weighs `1/n`. Lightly loaded servers soak up proportionally more
/// new attachments without starving anyone.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl SelectionStrategy for WeightedRandom {
    fn name(&self) -> &'static str {
        "weighted-random"
    }

    fn select(
        &self,
        candidates: &[BackendServer],
        _registry: &ServerRegistry,
        _ctx: &SelectContext<'_>,
    ) -> Option<usize> {
        let weights: Vec<f64> = candidates
            .iter()
            .map(|s| {
                if s.handle_num == 0 {
                    1.0
                } else {
                    1.0 / s.handle_num as f64
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let mut draw = rand::thread_rng().r#gen::<f64>() * total;
        for (index, weight) in weights.iter().enumerate() {
            if draw < *weight {
                return Some(index);
            }
            draw -= weight;
        }
        // Floating point slack; the draw landed exactly on the total.
        Some(candidates.len() - 1)
    }
}

/// Picks the server with the fewest handles.
///
/// The pick is recorded back into the registry so a burst of
/// selections between server self-reports spreads out instead of
/// piling onto one machine. Ties go to the first candidate in name
/// order.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least-loaded"
    }

    fn select(
        &self,
        candidates: &[BackendServer],
        registry: &ServerRegistry,
        _ctx: &SelectContext<'_>,
    ) -> Option<usize> {
        let mut best = 0;
        for (index, server) in candidates.iter().enumerate().skip(1) {
            if server.handle_num < candidates[best].handle_num {
                best = index;
            }
        }
        registry.note_handle_added(&candidates[best].name);
        Some(best)
    }
}

// ============================================================================
// Strategy Registry
// ============================================================================

/// Names every compiled-in strategy.
pub const STRATEGY_NAMES: [&str; 4] = ["round-robin", "random", "weighted-random", "least-loaded"];

/// Looks up a compiled-in strategy by name.
///
/// # Errors
///
/// Returns [`Error::Config`] for names outside [`STRATEGY_NAMES`].
pub fn strategy_for(name: &str) -> Result<Box<dyn SelectionStrategy>> {
    match name {
        "round-robin" => Ok(Box::new(RoundRobin::new())),
        "random" => Ok(Box::new(Random)),
        "weighted-random" => Ok(Box::new(WeightedRandom)),
        "least-loaded" => Ok(Box::new(LeastLoaded)),
        other => Err(Error::config(format!(
            "unknown selection policy '{other}' (known: {})",
            STRATEGY_NAMES.join(", ")
        ))),
    }
}

// ============================================================================
// ServerSelector
// ============================================================================

/// Registry plus strategy, the thing callers actually use.
pub struct ServerSelector {
    /// Directory of candidate servers.
    registry: Arc<ServerRegistry>,

    /// Strategy applied to the candidate list.
    strategy: Box<dyn SelectionStrategy>,
}

impl ServerSelector {
    /// Creates a selector with an explicit strategy.
    #[must_use]
    pub fn new(registry: Arc<ServerRegistry>, strategy: Box<dyn SelectionStrategy>) -> Self {
        Self { registry, strategy }
    }

    /// Creates a selector using the configured policy name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the policy name is unknown.
    pub fn from_config(registry: Arc<ServerRegistry>, config: &ProxyConfig) -> Result<Self> {
        let strategy = strategy_for(&config.selection_policy)?;
        Ok(Self::new(registry, strategy))
    }

    /// Returns the underlying registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    /// Returns the active strategy's name.
    #[inline]
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Chooses a backend server for a new attachment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when no selectable server
    /// exists or the strategy declines all of them.
    pub fn choose_server(&self, ctx: &SelectContext<'_>) -> Result<BackendServer> {
        let candidates = self.registry.valid_servers();
        if candidates.is_empty() {
            return Err(Error::service_unavailable("no backend server available"));
        }

        let Some(index) = self.strategy.select(&candidates, &self.registry, ctx) else {
            return Err(Error::service_unavailable(
                "selection declined every backend server",
            ));
        };

        let chosen = candidates[index].clone();
        debug!(
            server = %chosen.name,
            url = %chosen.url,
            strategy = self.strategy.name(),
            "Backend server selected"
        );
        Ok(chosen)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use crate::backend::server::ServerStatus;

    fn registry_with(servers: &[(&str, u64)]) -> Arc<ServerRegistry> {
        let registry = ServerRegistry::new(&ProxyConfig::new());
        for (name, handles) in servers {
            registry.update_server(
                BackendServer::new(*name, format!("ws://{name}")).with_load(0, *handles),
            );
        }
        registry
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_server_once() {
        let registry = registry_with(&[("a", 0), ("b", 0), ("c", 0)]);
        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(RoundRobin::new()));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(
                selector
                    .choose_server(&SelectContext::new())
                    .expect("selection")
                    .name,
            );
        }
        seen.sort();
        assert_eq!(seen, ["a", "b", "c"]);

        // A second full rotation visits each server again.
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..3 {
            let name = selector
                .choose_server(&SelectContext::new())
                .expect("selection")
                .name;
            *counts.entry(name).or_default() += 1;
        }
        assert!(counts.values().all(|&n| n == 1));

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_round_robin_skips_unselectable_servers() {
        let registry = registry_with(&[("a", 0), ("b", 0), ("c", 0)]);
        registry
            .update_server(BackendServer::new("b", "ws://b").with_status(ServerStatus::Abnormal));

        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(RoundRobin::new()));
        for _ in 0..10 {
            let chosen = selector
                .choose_server(&SelectContext::new())
                .expect("selection");
            assert_ne!(chosen.name, "b");
        }

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_random_stays_within_valid_set() {
        let registry = registry_with(&[("a", 0), ("b", 0)]);
        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(Random));

        for _ in 0..20 {
            let chosen = selector
                .choose_server(&SelectContext::new())
                .expect("selection");
            assert!(chosen.name == "a" || chosen.name == "b");
        }

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_weighted_random_prefers_light_servers() {
        let registry = registry_with(&[("heavy", 1000), ("light", 1)]);
        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(WeightedRandom));

        let mut light = 0;
        let mut heavy = 0;
        for _ in 0..200 {
            match selector
                .choose_server(&SelectContext::new())
                .expect("selection")
                .name
                .as_str()
            {
                "light" => light += 1,
                _ => heavy += 1,
            }
        }
        assert!(
            light > heavy,
            "light server should dominate, got light={light} heavy={heavy}"
        );

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_weighted_random_idle_beats_lightly_loaded() {
        let registry = registry_with(&[("busy", 2), ("idle", 0)]);
        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(WeightedRandom));

        let mut idle = 0;
        for _ in 0..300 {
            if selector
                .choose_server(&SelectContext::new())
                .expect("selection")
                .name
                == "idle"
            {
                idle += 1;
            }
        }
        // Weights 1.0 vs 0.5: the idle server wins about two thirds.
        assert!(idle > 150, "idle server should lead, got {idle}/300");

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_least_loaded_tracks_optimistic_placements() {
        let registry = registry_with(&[("a", 5), ("b", 2)]);
        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(LeastLoaded));

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(
                selector
                    .choose_server(&SelectContext::new())
                    .expect("selection")
                    .name,
            );
        }
        // b fills from 2 up to 5, then the tie goes to a.
        assert_eq!(picks, ["b", "b", "b", "a"]);

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_empty_registry_is_service_unavailable() {
        let registry = ServerRegistry::new(&ProxyConfig::new());
        let selector = ServerSelector::new(Arc::clone(&registry), Box::new(RoundRobin::new()));

        let err = selector
            .choose_server(&SelectContext::new())
            .expect_err("no servers");
        assert_eq!(err.code(), 503);

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_strategy_registry_lookup() {
        for name in STRATEGY_NAMES {
            let strategy = strategy_for(name).expect("known strategy");
            assert_eq!(strategy.name(), name);
        }

        let err = strategy_for("fanciest-first").expect_err("unknown strategy");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_selector_from_config() {
        let registry = ServerRegistry::new(&ProxyConfig::new());
        let config = ProxyConfig::new().with_selection_policy("least-loaded");
        let selector =
            ServerSelector::from_config(Arc::clone(&registry), &config).expect("selector");
        assert_eq!(selector.strategy_name(), "least-loaded");
        registry.shutdown();
    }
}
