//! Identifier newtypes used across the proxy.
//!
//! Three id spaces exist on the wire:
//!
//! | Type | Wire form | Allocation |
//! |------|-----------|------------|
//! | [`SessionId`] | JSON number | random, JavaScript-safe range |
//! | [`HandleId`] | JSON number | random, JavaScript-safe range |
//! | [`TransactionId`] | JSON string | UUID v4 |
//!
//! Session and handle ids must survive a round trip through a
//! JavaScript client, where every number is an IEEE double. Generated
//! ids therefore never exceed 2^53, and zero is reserved as the
//! "pick one for me" sentinel in `create` requests.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Largest id handed out by [`SessionId::generate`] and
/// [`HandleId::generate`].
///
/// Equal to 2^53, the largest integer a JavaScript number can hold
/// without losing precision.
pub const MAX_SAFE_ID: u64 = 1 << 53;

// ============================================================================
// SessionId
// ============================================================================

/// Identifier of a session, frontend or backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw id taken from the wire.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Generates a fresh random id in `1..=2^53`.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen_range(1..=MAX_SAFE_ID))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the auto-assign sentinel (zero).
    #[inline]
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// HandleId
// ============================================================================

/// Identifier of a plugin handle, frontend or backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl HandleId {
    /// Wraps a raw id taken from the wire.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Generates a fresh random id in `1..=2^53`.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen_range(1..=MAX_SAFE_ID))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// TransactionId
// ============================================================================

/// Correlation id tying a response to its request.
///
/// Generated ids are UUID v4 in simple form. Ids read from the wire
/// keep whatever string the peer sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wraps a transaction string taken from the wire.
    #[inline]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Generates a fresh UUID-backed transaction id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the transaction string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    #[inline]
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

// ============================================================================
// Tests
// ============================================================================
