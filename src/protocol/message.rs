//! Wire message helpers.
//!
//! Requests and responses travel as JSON objects. This module keeps
//! the crate honest about their shape in three ways:
//!
//! - **Element accessors** ([`require_str`], [`opt_u64`], ...) that
//!   turn missing or mistyped elements into the right protocol errors.
//! - **Envelope builders** ([`ack`], [`success_with_data`],
//!   [`error_envelope`], ...) so every response leaves through the
//!   same few functions.
//! - **Typed fragments** like [`Trickle`], which enforces the
//!   exactly-one-of rule for ICE candidate payloads before anything
//!   else sees them.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{HandleId, SessionId};

// ============================================================================
// Element Accessors
// ============================================================================

/// Reads an optional string element.
///
/// Present but non-string values are a type error, not an absence.
pub fn opt_str<'a>(msg: &'a Value, name: &str) -> Result<Option<&'a str>> {
    match msg.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(Error::invalid_element(name, "a string")),
    }
}

/// Reads a mandatory string element.
pub fn require_str<'a>(msg: &'a Value, name: &str) -> Result<&'a str> {
    opt_str(msg, name)?.ok_or_else(|| Error::missing_element(name))
}

/// Reads an optional unsigned integer element.
pub fn opt_u64(msg: &Value, name: &str) -> Result<Option<u64>> {
    match msg.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::invalid_element(name, "a positive integer")),
    }
}

/// Reads a mandatory unsigned integer element.
pub fn require_u64(msg: &Value, name: &str) -> Result<u64> {
    opt_u64(msg, name)?.ok_or_else(|| Error::missing_element(name))
}

/// Reads an optional object element.
pub fn opt_object<'a>(msg: &'a Value, name: &str) -> Result<Option<&'a Value>> {
    match msg.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) if value.is_object() => Ok(Some(value)),
        Some(_) => Err(Error::invalid_element(name, "an object")),
    }
}

/// Reads a mandatory object element.
pub fn require_object<'a>(msg: &'a Value, name: &str) -> Result<&'a Value> {
    opt_object(msg, name)?.ok_or_else(|| Error::missing_element(name))
}

// ============================================================================
// Inbound Readers
// ============================================================================

/// Returns the `"janus"` verb of a message, if present.
#[inline]
#[must_use]
pub fn kind(msg: &Value) -> Option<&str> {
    msg.get("janus").and_then(Value::as_str)
}

/// Returns the `"transaction"` element of a message, if present.
#[inline]
#[must_use]
pub fn transaction(msg: &Value) -> Option<&str> {
    msg.get("transaction").and_then(Value::as_str)
}

/// Returns the `"sender"` handle id of a message, if present.
#[inline]
#[must_use]
pub fn sender(msg: &Value) -> Option<HandleId> {
    msg.get("sender").and_then(Value::as_u64).map(HandleId::new)
}

/// Extracts the plugin package and data from a `"plugindata"` element.
#[must_use]
pub fn plugin_data(msg: &Value) -> Option<(&str, &Value)> {
    let plugindata = msg.get("plugindata")?;
    let plugin = plugindata.get("plugin")?.as_str()?;
    let data = plugindata.get("data")?;
    Some((plugin, data))
}

/// Interprets a backend `"error"` response.
///
/// Returns `None` when the message is not an error envelope. The code
/// and reason pass through untouched so clients see exactly what the
/// backend reported.
#[must_use]
pub fn backend_error(msg: &Value) -> Option<Error> {
    if kind(msg) != Some("error") {
        return None;
    }
    let error = msg.get("error")?;
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(490) as i32;
    let reason = error
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("unknown backend error");
    Some(Error::plugin(code, reason))
}

// ============================================================================
// Trickle Payloads
// ============================================================================

/// ICE candidate payload of a `trickle` request.
///
/// A request carries either a single `"candidate"` object or a
/// `"candidates"` array, never both and never neither.
#[derive(Debug, Clone, PartialEq)]
pub enum Trickle {
    /// A single candidate, or the end-of-candidates marker.
    Candidate(Value),
    /// A batch of candidates.
    Candidates(Vec<Value>),
}

impl Trickle {
    /// Validates and extracts the trickle payload of a request.
    pub fn from_request(request: &Value) -> Result<Self> {
        let single = request.get("candidate");
        let batch = request.get("candidates");
        match (single, batch) {
            (Some(_), Some(_)) => Err(Error::invalid_json(
                "can't have both 'candidate' and 'candidates'",
            )),
            (None, None) => Err(Error::missing_element("candidate|candidates")),
            (Some(candidate), None) => {
                if !candidate.is_object() {
                    return Err(Error::invalid_element("candidate", "an object"));
                }
                Ok(Self::Candidate(candidate.clone()))
            }
            (None, Some(candidates)) => {
                let Some(items) = candidates.as_array() else {
                    return Err(Error::invalid_element("candidates", "an array"));
                };
                Ok(Self::Candidates(items.clone()))
            }
        }
    }

    /// Writes the payload back into an outbound request object.
    pub fn attach_to(&self, msg: &mut Value) {
        if let Some(obj) = msg.as_object_mut() {
            match self {
                Self::Candidate(candidate) => {
                    obj.insert("candidate".to_owned(), candidate.clone());
                }
                Self::Candidates(candidates) => {
                    obj.insert("candidates".to_owned(), Value::Array(candidates.clone()));
                }
            }
        }
    }
}

// ============================================================================
// Envelope Builders
// ============================================================================

/// Builds an `ack` envelope.
#[must_use]
pub fn ack(session_id: SessionId, transaction: &str) -> Value {
    json!({
        "janus": "ack",
        "session_id": session_id,
        "transaction": transaction,
    })
}

/// Builds a plain `success` envelope.
#[must_use]
pub fn success(session_id: Option<SessionId>, transaction: &str) -> Value {
    let mut msg = json!({
        "janus": "success",
        "transaction": transaction,
    });
    if let Some(id) = session_id {
        msg["session_id"] = json!(id);
    }
    msg
}

/// Builds a `success` envelope carrying a `"data"` element.
#[must_use]
pub fn success_with_data(session_id: Option<SessionId>, transaction: &str, data: Value) -> Value {
    let mut msg = success(session_id, transaction);
    msg["data"] = data;
    msg
}

/// Builds a synchronous plugin answer.
///
/// Shape of the reply to a `message` request a plugin answered
/// immediately.
#[must_use]
pub fn success_with_plugin_data(
    session_id: SessionId,
    sender: HandleId,
    transaction: &str,
    plugin: &str,
    data: Value,
    jsep: Option<Value>,
) -> Value {
    let mut msg = json!({
        "janus": "success",
        "session_id": session_id,
        "sender": sender,
        "transaction": transaction,
        "plugindata": {
            "plugin": plugin,
            "data": data,
        },
    });
    if let Some(jsep) = jsep {
        msg["jsep"] = jsep;
    }
    msg
}

/// Builds an asynchronous plugin event.
///
/// The transaction is present only when the event answers an earlier
/// `message` request.
#[must_use]
pub fn plugin_event(
    session_id: SessionId,
    sender: HandleId,
    opaque_id: Option<&str>,
    transaction: Option<&str>,
    plugin: &str,
    data: Value,
    jsep: Option<Value>,
) -> Value {
    let mut msg = json!({
        "janus": "event",
        "session_id": session_id,
        "sender": sender,
        "plugindata": {
            "plugin": plugin,
            "data": data,
        },
    });
    if let Some(opaque_id) = opaque_id {
        msg["opaque_id"] = json!(opaque_id);
    }
    if let Some(transaction) = transaction {
        msg["transaction"] = json!(transaction);
    }
    if let Some(jsep) = jsep {
        msg["jsep"] = jsep;
    }
    msg
}

/// Builds a bare notification envelope such as `timeout`, `detached`,
/// `webrtcup` or `hangup`.
#[must_use]
pub fn notification(event: &str, session_id: SessionId, sender: Option<HandleId>) -> Value {
    let mut msg = json!({
        "janus": event,
        "session_id": session_id,
    });
    if let Some(sender) = sender {
        msg["sender"] = json!(sender);
    }
    msg
}

/// Builds a `server_info` envelope.
#[must_use]
pub fn server_info(transaction: &str, name: &str, session_timeout_secs: u64) -> Value {
    json!({
        "janus": "server_info",
        "transaction": transaction,
        "name": name,
        "version_string": env!("CARGO_PKG_VERSION"),
        "session-timeout": session_timeout_secs,
    })
}

/// Builds a `pong` envelope.
#[must_use]
pub fn pong(transaction: &str) -> Value {
    json!({
        "janus": "pong",
        "transaction": transaction,
    })
}

/// Builds an `error` envelope from a raw code and reason.
#[must_use]
pub fn error_envelope(
    code: i32,
    reason: &str,
    session_id: Option<SessionId>,
    transaction: Option<&str>,
) -> Value {
    let mut msg = json!({
        "janus": "error",
        "error": {
            "code": code,
            "reason": reason,
        },
    });
    if let Some(id) = session_id {
        msg["session_id"] = json!(id);
    }
    if let Some(transaction) = transaction {
        msg["transaction"] = json!(transaction);
    }
    msg
}

/// Builds an `error` envelope from a crate error.
///
/// With `expose_cause` set, the envelope carries a `"cause"` element
/// holding the flattened source chain.
#[must_use]
pub fn error_from(
    err: &Error,
    session_id: Option<SessionId>,
    transaction: Option<&str>,
    expose_cause: bool,
) -> Value {
    let mut msg = error_envelope(err.code(), &err.reason(), session_id, transaction);
    if expose_cause {
        let mut chain = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        msg["cause"] = json!(chain);
    }
    msg
}

// ============================================================================
// Tests
// ============================================================================
