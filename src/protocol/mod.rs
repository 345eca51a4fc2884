//! Janus signaling protocol types.
//!
//! This module defines the wire vocabulary shared by the frontend and
//! backend sides of the proxy.
//!
//! # Protocol Overview
//!
//! Every message is a JSON object whose `"janus"` element names what
//! it is. Requests additionally carry a `"transaction"` string that
//! the matching response echoes back.
//!
//! | Message Kind | Direction | Purpose |
//! |--------------|-----------|---------|
//! | request verb | Client → Server | One of the [`Verb`] set |
//! | `ack` | Server → Client | Request received, answer follows |
//! | `success` | Server → Client | Final positive answer |
//! | `error` | Server → Client | Final negative answer |
//! | `event` | Server → Client | Asynchronous plugin event |
//! | `server_info` / `pong` | Server → Client | `info` / `ping` answers |
//!
//! # Addressing
//!
//! Requests target one of three levels, checked against
//! [`Verb::scope`]:
//!
//! - the server itself (`info`, `ping`, `create`)
//! - a session (`destroy`, `keepalive`, `claim`, `attach`)
//! - a handle (`detach`, `hangup`, `message`, `trickle`)
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `verb` | The closed request verb set and its addressing rules |
//! | `message` | Element accessors, envelope builders, trickle payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Request verbs and addressing levels.
pub mod verb;

/// Element accessors and envelope builders.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::Trickle;
pub use verb::{Scope, Verb};
