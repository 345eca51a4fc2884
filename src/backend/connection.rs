//! WebSocket connection and event loop for one backend server.
//!
//! A [`BackendConnection`] owns the socket to a Janus server and the
//! transaction correlation state. All socket I/O happens inside a
//! single spawned event loop task; callers talk to it over a command
//! channel and get answers back over per-request oneshot channels.
//!
//! # Correlation
//!
//! Outbound requests carry a transaction id. Inbound messages are
//! sorted by one rule: a message with a `"transaction"` element is a
//! response, everything else is a server-initiated push handed to the
//! [`InboundSink`].
//!
//! | Inbound | Pending entry | Effect |
//! |---------|---------------|--------|
//! | `ack`, entry ignores acks | yes | swallowed, entry stays pending |
//! | any other response | yes | resolves the entry |
//! | response | no | dropped with a log line |
//! | no transaction | - | `sink.on_push` |
//!
//! The receive path never blocks: pushes are dispatched synchronously
//! to the sink, which must only do non-blocking work.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::TransactionId;
use crate::protocol::message;

// ============================================================================
// Constants
// ============================================================================

/// Maximum in-flight transactions before rejecting new ones.
const MAX_PENDING_TRANSACTIONS: usize = 256;

/// Subprotocol the Janus WebSocket API requires.
const JANUS_SUBPROTOCOL: &str = "janus-protocol";

// ============================================================================
// Types
// ============================================================================

/// Stream type produced by the client handshake.
type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One in-flight transaction.
struct PendingTransaction {
    /// Whether an `ack` leaves the transaction pending.
    ignore_ack: bool,
    /// Channel the final answer is delivered on.
    reply_tx: oneshot::Sender<Result<Value>>,
}

/// Map of transaction ids to in-flight transactions.
type CorrelationMap = FxHashMap<TransactionId, PendingTransaction>;

// ============================================================================
// InboundSink
// ============================================================================

/// Receiver of server-initiated traffic on a backend connection.
///
/// Both callbacks run on the event loop task and must not block.
pub(crate) trait InboundSink: Send + Sync {
    /// Called with every inbound message that is not a response.
    fn on_push(&self, msg: Value);

    /// Called once when the connection terminates, after every pending
    /// transaction has been failed.
    fn on_closed(&self);
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a serialized frame, optionally registering a transaction.
    Send {
        payload: String,
        correlate: Option<(TransactionId, PendingTransaction)>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(TransactionId),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// BackendConnection
// ============================================================================

/// WebSocket connection to a backend Janus server.
///
/// Handles request/response correlation and push routing. The
/// connection spawns an internal event loop task.
///
/// # Thread Safety
///
/// `BackendConnection` is `Send + Sync` and can be shared across
/// tasks. All operations are non-blocking.
pub(crate) struct BackendConnection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Push receiver (shared with event loop).
    sink: Arc<Mutex<Option<Arc<dyn InboundSink>>>>,
}

impl Clone for BackendConnection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            correlation: Arc::clone(&self.correlation),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection").finish_non_exhaustive()
    }
}

impl BackendConnection {
    /// Connects to a backend server and spawns the event loop.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceUnavailable`] if the URL is not a WebSocket URL
    /// - [`Error::WebSocket`] if the handshake fails
    pub(crate) async fn connect(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::service_unavailable(format!("invalid backend url '{url}': {e}")))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::service_unavailable(format!(
                "invalid backend url '{url}': scheme must be ws or wss"
            )));
        }

        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(JANUS_SUBPROTOCOL),
        );

        let (ws_stream, _) = connect_async(request).await?;
        debug!(url = %url, "Backend WebSocket connected");

        Ok(Self::from_stream(ws_stream))
    }

    /// Wraps an established stream and spawns the event loop.
    fn from_stream(ws_stream: BackendStream) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let sink: Arc<Mutex<Option<Arc<dyn InboundSink>>>> = Arc::new(Mutex::new(None));

        let correlation_clone = Arc::clone(&correlation);
        let sink_clone = Arc::clone(&sink);

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            correlation_clone,
            sink_clone,
        ));

        Self {
            command_tx,
            correlation,
            sink,
        }
    }

    /// Attaches the push receiver.
    ///
    /// Pushes arriving before this are dropped.
    pub(crate) fn set_sink(&self, sink: Arc<dyn InboundSink>) {
        let mut guard = self.sink.lock();
        *guard = Some(sink);
    }

    /// Sends a request and waits for its correlated answer.
    ///
    /// With `ignore_ack` set, an `ack` response leaves the transaction
    /// pending and the call keeps waiting for the real answer.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::GatewayTimeout`] if no answer arrives in time
    /// - [`Error::ServiceUnavailable`] if too many transactions are in flight
    pub(crate) async fn execute(
        &self,
        msg: &Value,
        transaction: TransactionId,
        ignore_ack: bool,
        deadline: Duration,
    ) -> Result<Value> {
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_TRANSACTIONS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_TRANSACTIONS,
                    "Too many pending backend transactions"
                );
                return Err(Error::service_unavailable(format!(
                    "too many pending backend transactions: {}/{}",
                    correlation.len(),
                    MAX_PENDING_TRANSACTIONS
                )));
            }
        }

        let payload = to_string(msg)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                payload,
                correlate: Some((
                    transaction.clone(),
                    PendingTransaction {
                        ignore_ack,
                        reply_tx,
                    },
                )),
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(deadline, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                // Timeout: clean up so a late answer is dropped, not leaked.
                let _ = self
                    .command_tx
                    .send(ConnectionCommand::RemoveCorrelation(transaction));
                Err(Error::gateway_timeout(deadline.as_millis() as u64))
            }
        }
    }

    /// Sends a request without waiting for any answer.
    ///
    /// Failures are logged, never raised; any response produced by the
    /// backend falls into the unknown-transaction log line.
    pub(crate) fn fire(&self, msg: &Value) {
        match to_string(msg) {
            Ok(payload) => {
                let sent = self.command_tx.send(ConnectionCommand::Send {
                    payload,
                    correlate: None,
                });
                if sent.is_err() {
                    debug!("Connection gone, dropped fire-and-forget request");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize fire-and-forget request"),
        }
    }

    /// Returns the number of in-flight transactions.
    #[inline]
    #[must_use]
    pub(crate) fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` while the event loop is accepting commands.
    #[inline]
    #[must_use]
    pub(crate) fn is_open(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Shuts down the connection gracefully.
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: BackendStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        sink: Arc<Mutex<Option<Arc<dyn InboundSink>>>>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming traffic from the backend
                incoming = ws_read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &sink);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Backend closed the WebSocket");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Backend WebSocket error");
                            break;
                        }

                        None => {
                            debug!("Backend WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the session side
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { payload, correlate }) => {
                            Self::handle_send_command(
                                payload,
                                correlate,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(ConnectionCommand::RemoveCorrelation(transaction)) => {
                            correlation.lock().remove(&transaction);
                            debug!(transaction = %transaction, "Removed timed-out transaction");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Self::fail_pending_transactions(&correlation);

        let closed_sink = sink.lock().take();
        if let Some(closed_sink) = closed_sink {
            closed_sink.on_closed();
        }

        debug!("Backend event loop terminated");
    }

    /// Sorts one inbound text frame into response or push.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        sink: &Arc<Mutex<Option<Arc<dyn InboundSink>>>>,
    ) {
        let msg: Value = match from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Failed to parse backend message");
                return;
            }
        };

        if let Some(raw_transaction) = message::transaction(&msg) {
            let key = TransactionId::from(raw_transaction);
            let is_ack = message::kind(&msg) == Some("ack");

            let pending = {
                let mut map = correlation.lock();
                if is_ack && map.get(&key).is_some_and(|p| p.ignore_ack) {
                    trace!(transaction = %key, "Ack swallowed, final answer still pending");
                    return;
                }
                map.remove(&key)
            };

            match pending {
                Some(pending) => {
                    let _ = pending.reply_tx.send(Ok(msg));
                }
                None => {
                    debug!(transaction = %key, "Answer for unknown transaction, dropped");
                }
            }
            return;
        }

        // No transaction: a server-initiated push.
        let push_sink = sink.lock().clone();
        match push_sink {
            Some(push_sink) => push_sink.on_push(msg),
            None => debug!("Push before sink attached, dropped"),
        }
    }

    /// Handles a send command from the session side.
    async fn handle_send_command(
        payload: String,
        correlate: Option<(TransactionId, PendingTransaction)>,
        ws_write: &mut futures_util::stream::SplitSink<BackendStream, Message>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) {
        let transaction = correlate.as_ref().map(|(t, _)| t.clone());

        // Store correlation before sending
        if let Some((key, pending)) = correlate {
            correlation.lock().insert(key, pending);
        }

        if let Err(e) = ws_write.send(Message::Text(payload.into())).await {
            match transaction.and_then(|t| correlation.lock().remove(&t)) {
                Some(pending) => {
                    let _ = pending.reply_tx.send(Err(Error::WebSocket(e)));
                }
                None => warn!(error = %e, "Failed to send backend request"),
            }
            return;
        }

        trace!(transaction = ?transaction, "Backend request sent");
    }

    /// Fails all pending transactions with a closed-connection error.
    fn fail_pending_transactions(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, entry) in pending {
            let _ = entry.reply_tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending transactions on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
