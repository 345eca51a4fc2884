//! Frontend transport abstraction.
//!
//! The proxy core does not own client connections. Whatever hosts it
//! (a WebSocket server, an HTTP long-poll adapter, a test harness)
//! implements [`Transport`] and hands one reference in with each
//! request. Sessions remember the transport they are bound to and use
//! it for asynchronous delivery: plugin events, timeout notices and
//! lifecycle notifications all flow back through it.
//!
//! Transports are compared by [`TransportId`], which is how
//! `transport_gone` finds the sessions a dead connection owned.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::SessionId;

// ============================================================================
// TransportId
// ============================================================================

/// Identity of a transport instance.
///
/// Ids only need to be unique within the process; [`next_transport_id`]
/// hands them out from a counter.
pub type TransportId = u64;

static TRANSPORT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh transport id.
#[must_use]
pub fn next_transport_id() -> TransportId {
    TRANSPORT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Transport Trait
// ============================================================================

/// A client-facing connection the proxy can talk back through.
///
/// Request/response traffic does not go through this trait; the
/// request handler returns responses to its caller directly. The
/// trait exists for everything the server initiates on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identity of this transport instance.
    fn transport_id(&self) -> TransportId;

    /// Delivers a server-initiated message to the client.
    async fn send_message(&self, message: Value) -> Result<()>;

    /// Called when a session is bound to this transport.
    async fn session_created(&self, session_id: SessionId);

    /// Called when a session bound to this transport ends.
    ///
    /// `timeout` is set when the idle sweep reaped the session,
    /// `claimed` when another transport took it over.
    async fn session_over(&self, session_id: SessionId, timeout: bool, claimed: bool);

    /// Called on the old transport when another one claims a session.
    async fn session_claimed(&self, session_id: SessionId);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_ids_are_unique() {
        let a = next_transport_id();
        let b = next_transport_id();
        let c = next_transport_id();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(b > a);
    }
}
