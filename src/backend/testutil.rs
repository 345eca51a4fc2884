//! In-process mock Janus server for tests.
//!
//! Speaks just enough of the WebSocket API to exercise the backend
//! stack: `info`/`create` handshake, handle attach, keepalives, and a
//! scriptable `message` verb driven by a `trigger` element in the
//! request body.
//!
//! | `body.trigger` | Behavior |
//! |----------------|----------|
//! | absent, other  | synchronous `success` with plugin data |
//! | `"error"`      | plugin error 499 |
//! | `"async"`      | `ack`, then an `event` on the same transaction |
//! | `"silence"`    | no answer at all |

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

enum PeerCommand {
    Frame(Message),
    Close,
}

#[derive(Default)]
struct Counters {
    create: AtomicUsize,
    attach: AtomicUsize,
    keepalive: AtomicUsize,
    message: AtomicUsize,
    trickle: AtomicUsize,
    hangup: AtomicUsize,
    detach: AtomicUsize,
    destroy: AtomicUsize,
}

struct MockInner {
    silent: AtomicBool,
    next_id: AtomicU64,
    peers: Mutex<Vec<mpsc::UnboundedSender<PeerCommand>>>,
    counters: Counters,
}

/// Mock Janus backend listening on an ephemeral localhost port.
pub(crate) struct MockBackend {
    addr: SocketAddr,
    inner: Arc<MockInner>,
}

impl MockBackend {
    /// Session timeout the mock advertises in `server_info`.
    pub(crate) const SESSION_TIMEOUT_SECS: u64 = 1;

    /// Plugin package the mock refuses to attach.
    pub(crate) const MISSING_PLUGIN: &'static str = "janus.plugin.missing";

    /// Binds the listener and starts accepting connections.
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");

        let inner = Arc::new(MockInner {
            silent: AtomicBool::new(false),
            next_id: AtomicU64::new(1000),
            peers: Mutex::new(Vec::new()),
            counters: Counters::default(),
        });

        let accept_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_peer(Arc::clone(&accept_inner), stream));
            }
        });

        Self { addr, inner }
    }

    /// WebSocket URL clients should connect to.
    pub(crate) fn url(&self) -> String {
        format!("ws://{}/janus", self.addr)
    }

    /// Directory entry pointing at this mock.
    pub(crate) fn server(&self, name: &str) -> super::server::BackendServer {
        super::server::BackendServer::new(name, self.url())
    }

    /// When silent, requests are counted but never answered.
    pub(crate) fn set_silent(&self, silent: bool) {
        self.inner.silent.store(silent, Ordering::SeqCst);
    }

    /// Sends a server-initiated frame to every connected client.
    pub(crate) fn push(&self, msg: Value) {
        let frame = Message::Text(msg.to_string().into());
        self.inner
            .peers
            .lock()
            .retain(|peer| peer.send(PeerCommand::Frame(frame.clone())).is_ok());
    }

    /// Closes every client connection.
    pub(crate) fn disconnect_all(&self) {
        let mut peers = self.inner.peers.lock();
        for peer in peers.drain(..) {
            let _ = peer.send(PeerCommand::Close);
        }
    }

    pub(crate) fn create_count(&self) -> usize {
        self.inner.counters.create.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_count(&self) -> usize {
        self.inner.counters.attach.load(Ordering::SeqCst)
    }

    pub(crate) fn keepalive_count(&self) -> usize {
        self.inner.counters.keepalive.load(Ordering::SeqCst)
    }

    pub(crate) fn message_count(&self) -> usize {
        self.inner.counters.message.load(Ordering::SeqCst)
    }

    pub(crate) fn trickle_count(&self) -> usize {
        self.inner.counters.trickle.load(Ordering::SeqCst)
    }

    pub(crate) fn hangup_count(&self) -> usize {
        self.inner.counters.hangup.load(Ordering::SeqCst)
    }

    pub(crate) fn detach_count(&self) -> usize {
        self.inner.counters.detach.load(Ordering::SeqCst)
    }

    pub(crate) fn destroy_count(&self) -> usize {
        self.inner.counters.destroy.load(Ordering::SeqCst)
    }
}

/// Accepts the handshake, echoing the Janus subprotocol when requested.
fn negotiate_subprotocol(req: &Request, mut resp: Response) -> Result<Response, ErrorResponse> {
    if req.headers().contains_key("Sec-WebSocket-Protocol") {
        resp.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("janus-protocol"),
        );
    }
    Ok(resp)
}

async fn serve_peer(inner: Arc<MockInner>, stream: TcpStream) {
    let ws = match accept_hdr_async(stream, negotiate_subprotocol).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut ws_write, mut ws_read) = ws.split();
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<PeerCommand>();
    inner.peers.lock().push(peer_tx.clone());

    loop {
        tokio::select! {
            command = peer_rx.recv() => match command {
                Some(PeerCommand::Frame(frame)) => {
                    if ws_write.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(PeerCommand::Close) => {
                    let _ = ws_write.close().await;
                    break;
                }
                None => break,
            },
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_request(&inner, &peer_tx, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                _ => {}
            },
        }
    }
}

fn handle_request(inner: &MockInner, peer: &mpsc::UnboundedSender<PeerCommand>, text: &str) {
    let req: Value = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(_) => return,
    };
    let verb = req["janus"].as_str().unwrap_or_default().to_owned();

    match verb.as_str() {
        "create" => inner.counters.create.fetch_add(1, Ordering::SeqCst),
        "attach" => inner.counters.attach.fetch_add(1, Ordering::SeqCst),
        "keepalive" => inner.counters.keepalive.fetch_add(1, Ordering::SeqCst),
        "message" => inner.counters.message.fetch_add(1, Ordering::SeqCst),
        "trickle" => inner.counters.trickle.fetch_add(1, Ordering::SeqCst),
        "hangup" => inner.counters.hangup.fetch_add(1, Ordering::SeqCst),
        "detach" => inner.counters.detach.fetch_add(1, Ordering::SeqCst),
        "destroy" => inner.counters.destroy.fetch_add(1, Ordering::SeqCst),
        _ => 0,
    };

    if inner.silent.load(Ordering::SeqCst) {
        return;
    }

    let transaction = req["transaction"].as_str().unwrap_or_default();
    let session_id = req["session_id"].as_u64();

    match verb.as_str() {
        "info" => {
            reply(
                peer,
                json!({
                    "janus": "server_info",
                    "transaction": transaction,
                    "name": "Mock Janus",
                    "version": 123,
                    "session-timeout": MockBackend::SESSION_TIMEOUT_SECS,
                }),
            );
        }

        "create" => {
            let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
            reply(peer, success(transaction, session_id, json!({"id": id})));
        }

        "attach" => {
            let plugin = req["plugin"].as_str().unwrap_or_default();
            if plugin == MockBackend::MISSING_PLUGIN {
                reply(
                    peer,
                    error_reply(transaction, session_id, 460, "No such plugin"),
                );
                return;
            }
            let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
            reply(peer, success(transaction, session_id, json!({"id": id})));
        }

        "keepalive" | "trickle" => {
            reply(
                peer,
                json!({"janus": "ack", "transaction": transaction, "session_id": session_id}),
            );
        }

        "hangup" | "destroy" | "detach" => {
            reply(
                peer,
                json!({"janus": "success", "transaction": transaction, "session_id": session_id}),
            );
        }

        "message" => handle_message(peer, &req, transaction, session_id),

        _ => {
            reply(
                peer,
                error_reply(transaction, session_id, 453, "Unknown request"),
            );
        }
    }
}

fn handle_message(
    peer: &mpsc::UnboundedSender<PeerCommand>,
    req: &Value,
    transaction: &str,
    session_id: Option<u64>,
) {
    let handle_id = req["handle_id"].as_u64().unwrap_or_default();
    let body = req["body"].clone();
    let jsep_answer = req
        .get("jsep")
        .map(|_| json!({"type": "answer", "sdp": "v=0 mock answer"}));

    match body["trigger"].as_str() {
        Some("error") => {
            reply(
                peer,
                error_reply(transaction, session_id, 499, "triggered error"),
            );
        }
        Some("silence") => {}
        Some("async") => {
            reply(
                peer,
                json!({"janus": "ack", "transaction": transaction, "session_id": session_id}),
            );
            let mut event = json!({
                "janus": "event",
                "transaction": transaction,
                "session_id": session_id,
                "sender": handle_id,
                "plugindata": {"plugin": "janus.plugin.mock", "data": {"echo": body}},
            });
            if let Some(jsep) = jsep_answer {
                event["jsep"] = jsep;
            }
            reply(peer, event);
        }
        _ => {
            let mut answer = json!({
                "janus": "success",
                "transaction": transaction,
                "session_id": session_id,
                "sender": handle_id,
                "plugindata": {"plugin": "janus.plugin.mock", "data": {"echo": body}},
            });
            if let Some(jsep) = jsep_answer {
                answer["jsep"] = jsep;
            }
            reply(peer, answer);
        }
    }
}

fn success(transaction: &str, session_id: Option<u64>, data: Value) -> Value {
    json!({
        "janus": "success",
        "transaction": transaction,
        "session_id": session_id,
        "data": data,
    })
}

fn error_reply(transaction: &str, session_id: Option<u64>, code: i32, reason: &str) -> Value {
    json!({
        "janus": "error",
        "transaction": transaction,
        "session_id": session_id,
        "error": {"code": code, "reason": reason},
    })
}

fn reply(peer: &mpsc::UnboundedSender<PeerCommand>, msg: Value) {
    let _ = peer.send(PeerCommand::Frame(Message::Text(msg.to_string().into())));
}
