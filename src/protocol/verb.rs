//! Request verbs and their addressing levels.
//!
//! Every client request carries a `"janus"` element naming one of the
//! verbs below. The set is closed: anything else is answered with an
//! unknown-request error, never forwarded.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Verb Enum
// ============================================================================

/// The closed set of request verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// Query server capabilities and limits.
    Info,
    /// Liveness probe.
    Ping,
    /// Create a session.
    Create,
    /// Destroy a session.
    Destroy,
    /// Refresh a session's activity clock.
    Keepalive,
    /// Rebind a session to the calling transport.
    Claim,
    /// Attach a plugin handle to a session.
    Attach,
    /// Detach a plugin handle.
    Detach,
    /// Tear down the media side of a handle.
    Hangup,
    /// Deliver a plugin message, optionally with a jsep payload.
    Message,
    /// Deliver trickled ICE candidates.
    Trickle,
}

/// Addressing level a verb is valid at.
///
/// Requests name their target with `session_id` and `handle_id`
/// elements. Each verb accepts exactly one shape; anything else is an
/// invalid request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Neither `session_id` nor `handle_id`.
    Root,
    /// `session_id` only.
    Session,
    /// Both `session_id` and `handle_id`.
    Handle,
}

impl Verb {
    /// Every verb, in wire order.
    pub const ALL: [Verb; 11] = [
        Verb::Info,
        Verb::Ping,
        Verb::Create,
        Verb::Destroy,
        Verb::Keepalive,
        Verb::Claim,
        Verb::Attach,
        Verb::Detach,
        Verb::Hangup,
        Verb::Message,
        Verb::Trickle,
    ];

    /// Parses a wire verb string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "info" => Some(Self::Info),
            "ping" => Some(Self::Ping),
            "create" => Some(Self::Create),
            "destroy" => Some(Self::Destroy),
            "keepalive" => Some(Self::Keepalive),
            "claim" => Some(Self::Claim),
            "attach" => Some(Self::Attach),
            "detach" => Some(Self::Detach),
            "hangup" => Some(Self::Hangup),
            "message" => Some(Self::Message),
            "trickle" => Some(Self::Trickle),
            _ => None,
        }
    }

    /// Returns the wire form of the verb.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ping => "ping",
            Self::Create => "create",
            Self::Destroy => "destroy",
            Self::Keepalive => "keepalive",
            Self::Claim => "claim",
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::Hangup => "hangup",
            Self::Message => "message",
            Self::Trickle => "trickle",
        }
    }

    /// Returns the addressing level this verb is valid at.
    #[inline]
    #[must_use]
    pub const fn scope(&self) -> Scope {
        match self {
            Self::Info | Self::Ping | Self::Create => Scope::Root,
            Self::Destroy | Self::Keepalive | Self::Claim | Self::Attach => Scope::Session,
            Self::Detach | Self::Hangup | Self::Message | Self::Trickle => Scope::Handle,
        }
    }

    /// Returns `true` if the verb is subject to the API secret check.
    ///
    /// `info` and `ping` stay open so probes work without credentials.
    #[inline]
    #[must_use]
    pub const fn requires_secret(&self) -> bool {
        !matches!(self, Self::Info | Self::Ping)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
