//! Protocol dispatch for client requests.
//!
//! [`RequestHandler`] is the single entry point a transport feeds
//! parsed client requests into. It validates the envelope, enforces
//! the shared API secret, resolves the addressed session and handle,
//! dispatches over the closed verb set and always produces exactly one
//! reply envelope; every failure is converted into the uniform error
//! envelope correlated by the request's transaction.
//!
//! # Addressing
//!
//! | Verbs | Path shape |
//! |-------|------------|
//! | `info`, `ping`, `create` | no `session_id`, no `handle_id` |
//! | `destroy`, `keepalive`, `claim`, `attach` | `session_id` only |
//! | `detach`, `hangup`, `message`, `trickle` | `session_id` + `handle_id` |
//!
//! A zero or absent id means "not addressed"; violating a verb's path
//! shape is an invalid-request-path error, not a lookup failure.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::frontend::{FrontendSessionManager, MessageResult};
use crate::identifiers::{HandleId, SessionId};
use crate::protocol::message;
use crate::protocol::{Scope, Trickle, Verb};
use crate::transport::Transport;

// ============================================================================
// Request path
// ============================================================================

/// Validated addressing of one request.
enum RequestPath {
    Root,
    Session(SessionId),
    Handle(SessionId, HandleId),
}

fn resolve_path(
    verb: Verb,
    session_id: Option<SessionId>,
    handle_id: Option<HandleId>,
) -> Result<RequestPath> {
    match verb.scope() {
        Scope::Root => match (session_id, handle_id) {
            (None, None) => Ok(RequestPath::Root),
            _ => Err(Error::invalid_request_path(format!(
                "'{verb}' takes no session_id or handle_id"
            ))),
        },
        Scope::Session => match (session_id, handle_id) {
            (Some(session_id), None) => Ok(RequestPath::Session(session_id)),
            (None, _) => Err(Error::invalid_request_path(format!(
                "'{verb}' requires a session_id"
            ))),
            (Some(_), Some(_)) => Err(Error::invalid_request_path(format!(
                "'{verb}' cannot be addressed to a handle"
            ))),
        },
        Scope::Handle => match (session_id, handle_id) {
            (Some(session_id), Some(handle_id)) => {
                Ok(RequestPath::Handle(session_id, handle_id))
            }
            _ => Err(Error::invalid_request_path(format!(
                "'{verb}' requires both session_id and handle_id"
            ))),
        },
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Dispatches client requests into the session manager and plugins.
#[derive(Clone)]
pub struct RequestHandler {
    config: Arc<ProxyConfig>,
    manager: Arc<FrontendSessionManager>,
}

impl RequestHandler {
    /// Creates a handler over a session manager.
    #[must_use]
    pub fn new(config: Arc<ProxyConfig>, manager: Arc<FrontendSessionManager>) -> Self {
        Self { config, manager }
    }

    /// Returns the session manager behind this handler.
    #[must_use]
    pub fn manager(&self) -> &Arc<FrontendSessionManager> {
        &self.manager
    }

    /// Handles one client request, always producing a reply envelope.
    ///
    /// `transport` is the transport the request arrived on; it becomes
    /// the binding for sessions this request creates or claims.
    pub async fn handle_request(&self, transport: Arc<dyn Transport>, request: Value) -> Value {
        // Correlation ids for error replies, extracted leniently: a
        // malformed request still gets a correlated error when possible.
        let transaction = request
            .get("transaction")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let session_ref = request
            .get("session_id")
            .and_then(Value::as_u64)
            .filter(|id| *id != 0)
            .map(SessionId::new);

        match self.dispatch(transport, &request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, code = e.code(), "Request failed");
                message::error_from(
                    &e,
                    session_ref,
                    transaction.as_deref(),
                    self.config.expose_error_cause,
                )
            }
        }
    }

    async fn dispatch(&self, transport: Arc<dyn Transport>, request: &Value) -> Result<Value> {
        let verb_raw = message::require_str(request, "janus")?;
        let transaction = message::require_str(request, "transaction")?;
        let verb = Verb::parse(verb_raw).ok_or_else(|| Error::unknown_request(verb_raw))?;

        if verb.requires_secret()
            && let Some(expected) = &self.config.api_secret
        {
            let provided = message::opt_str(request, "apisecret")?;
            if provided != Some(expected.as_str()) {
                return Err(Error::Unauthorized);
            }
        }

        let session_id = message::opt_u64(request, "session_id")?
            .filter(|id| *id != 0)
            .map(SessionId::new);
        let handle_id = message::opt_u64(request, "handle_id")?
            .filter(|id| *id != 0)
            .map(HandleId::new);
        let path = resolve_path(verb, session_id, handle_id)?;

        match (verb, path) {
            (Verb::Info, RequestPath::Root) => Ok(message::server_info(
                transaction,
                &self.config.server_name,
                self.config.session_timeout.as_secs(),
            )),

            (Verb::Ping, RequestPath::Root) => Ok(message::pong(transaction)),

            (Verb::Create, RequestPath::Root) => {
                let requested = SessionId::new(message::opt_u64(request, "id")?.unwrap_or(0));
                let session = self.manager.create_session(requested, transport).await?;
                Ok(message::success_with_data(
                    None,
                    transaction,
                    json!({"id": session.session_id()}),
                ))
            }

            (Verb::Destroy, RequestPath::Session(session_id)) => {
                self.manager.destroy_session(session_id).await?;
                Ok(message::success(Some(session_id), transaction))
            }

            (Verb::Keepalive, RequestPath::Session(session_id)) => {
                // Resolving the session is the refresh.
                self.manager.find_session(session_id)?;
                Ok(message::ack(session_id, transaction))
            }

            (Verb::Claim, RequestPath::Session(session_id)) => {
                self.manager.claim_session(session_id, transport).await?;
                Ok(message::success(Some(session_id), transaction))
            }

            (Verb::Attach, RequestPath::Session(session_id)) => {
                let session = self.manager.find_session(session_id)?;
                let plugin_package = message::require_str(request, "plugin")?;
                let opaque_id = message::opt_str(request, "opaque_id")?.map(str::to_owned);
                let handle = self
                    .manager
                    .attach_handle(&session, plugin_package, opaque_id)
                    .await?;
                Ok(message::success_with_data(
                    Some(session_id),
                    transaction,
                    json!({"id": handle.handle_id()}),
                ))
            }

            (Verb::Detach, RequestPath::Handle(session_id, handle_id)) => {
                let session = self.manager.find_session(session_id)?;
                let handle = session.find_handle(handle_id)?;
                handle.detach().await;
                Ok(message::success(Some(session_id), transaction))
            }

            (Verb::Hangup, RequestPath::Handle(session_id, handle_id)) => {
                let session = self.manager.find_session(session_id)?;
                let handle = session.find_handle(handle_id)?;
                handle.handle_hangup().await?;
                Ok(message::success(Some(session_id), transaction))
            }

            (Verb::Message, RequestPath::Handle(session_id, handle_id)) => {
                let session = self.manager.find_session(session_id)?;
                let handle = session.find_handle(handle_id)?;
                let body = message::require_object(request, "body")?.clone();
                let jsep = message::opt_object(request, "jsep")?.cloned();

                match handle.handle_message(body, jsep).await? {
                    MessageResult::Ok(data) => Ok(message::success_with_plugin_data(
                        session_id,
                        handle_id,
                        transaction,
                        handle.plugin_package(),
                        data,
                        None,
                    )),
                    MessageResult::OkWait(hint) => {
                        let mut reply = message::ack(session_id, transaction);
                        if let Some(hint) = hint {
                            reply["hint"] = json!(hint);
                        }
                        Ok(reply)
                    }
                }
            }

            (Verb::Trickle, RequestPath::Handle(session_id, handle_id)) => {
                let session = self.manager.find_session(session_id)?;
                let handle = session.find_handle(handle_id)?;
                // Payload validation happens before the plugin runs.
                let trickle = Trickle::from_request(request)?;
                handle.handle_trickle(trickle).await?;
                Ok(message::ack(session_id, transaction))
            }

            // resolve_path pins every verb to its scope; this arm only
            // exists to make the tuple match exhaustive.
            (verb, _) => Err(Error::invalid_request_path(format!(
                "'{verb}' request path mismatch"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
