//! Scripted in-process gateway for integration tests.
//!
//! Accepts any number of WebSocket connections on `127.0.0.1:0`, sends a
//! challenge on each, answers `connect` according to [`Handshake`] and
//! every other request through a caller-supplied script. Every frame the
//! client sends is recorded.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

use agent_gateway::{Gateway, GatewayOptions};

// ============================================================================
// Types
// ============================================================================

/// How the mock answers the handshake.
#[derive(Debug, Clone)]
pub enum Handshake {
    /// Reply `hello-ok`.
    Accept,
    /// Reply `hello-ok` after a delay.
    AcceptAfter(Duration),
    /// Accept the first connection, stay silent on every later one.
    AcceptOnce,
    /// Reply `ok: false` with this message.
    Reject(String),
    /// Never send a challenge.
    Silent,
}

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `ok: true` with this payload.
    Ok(Value),
    /// `ok: false` with this message.
    Reject(String),
    /// `ok: true` with this payload, after a delay.
    Delay(Duration, Value),
    /// No answer.
    Ignore,
    /// Close the socket instead of answering.
    Close,
}

/// Request script: `(method, params) -> Reply`.
pub type Script = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

enum Outgoing {
    Text(String),
    Close,
}

/// Running mock gateway.
pub struct MockGateway {
    url: String,
    frames: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>>,
}

// ============================================================================
// MockGateway
// ============================================================================

impl MockGateway {
    /// Starts a mock that answers requests with `script`.
    pub async fn start<F>(handshake: Handshake, script: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock gateway");
        let port = listener.local_addr().expect("local addr").port();

        let mock = Self {
            url: format!("ws://127.0.0.1:{port}"),
            frames: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
            current: Arc::new(Mutex::new(None)),
        };

        let script: Script = Arc::new(script);
        let frames = Arc::clone(&mock.frames);
        let connections = Arc::clone(&mock.connections);
        let current = Arc::clone(&mock.current);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let number = connections.fetch_add(1, Ordering::SeqCst) + 1;

                let (tx, rx) = mpsc::unbounded_channel();
                *current.lock() = Some(tx.clone());

                let handshake = match &handshake {
                    Handshake::AcceptOnce if number > 1 => Handshake::Silent,
                    other => other.clone(),
                };

                tokio::spawn(serve(
                    ws,
                    number,
                    handshake,
                    Arc::clone(&script),
                    Arc::clone(&frames),
                    tx,
                    rx,
                ));
            }
        });

        mock
    }

    /// Starts a mock that accepts the handshake and echoes `chat.send`.
    pub async fn echo() -> Self {
        Self::start(Handshake::Accept, |method, params| match method {
            "chat.send" => Reply::Ok(json!({
                "text": format!("echo: {}", params["text"].as_str().unwrap_or_default())
            })),
            _ => Reply::Ok(json!({})),
        })
        .await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of accepted WebSocket connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every request frame received so far.
    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }

    /// Request frames with the given method.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|f| f["method"] == method)
            .collect()
    }

    /// Sends a raw text frame on the latest connection.
    pub fn push_raw(&self, text: &str) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Outgoing::Text(text.to_string()));
        }
    }

    /// Sends an event on the latest connection.
    pub fn push_event(&self, name: &str, payload: Value) {
        self.push_raw(&json!({ "type": "event", "event": name, "payload": payload }).to_string());
    }

    /// Closes the latest connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.current.lock().take() {
            let _ = tx.send(Outgoing::Close);
        }
    }

    /// Gateway pointed at this mock with fast reconnects.
    pub fn gateway(&self) -> Gateway {
        self.gateway_with(fast_options())
    }

    pub fn gateway_with(&self, options: GatewayOptions) -> Gateway {
        Gateway::builder()
            .url(self.url())
            .token("test-token")
            .options(options)
            .build()
            .expect("build gateway")
    }
}

/// Serves one WebSocket connection.
async fn serve(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    number: usize,
    handshake: Handshake,
    script: Script,
    frames: Arc<Mutex<Vec<Value>>>,
    tx: mpsc::UnboundedSender<Outgoing>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    if !matches!(handshake, Handshake::Silent) {
        let challenge = json!({
            "type": "event",
            "event": "connect.challenge",
            "payload": { "nonce": format!("nonce-{number}"), "ts": 1_700_000_000_000u64 }
        });
        if ws.send(Message::Text(challenge.to_string().into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            message = ws.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };

                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                frames.lock().push(frame.clone());

                let id = frame["id"].clone();
                let method = frame["method"].as_str().unwrap_or_default().to_string();

                let reply = if method == "connect" {
                    let hello = json!({
                        "type": "hello-ok",
                        "protocol": 3,
                        "server": { "version": "test", "connId": format!("conn-{number}") },
                        "policy": { "tickIntervalMs": 30_000 }
                    });
                    match &handshake {
                        Handshake::Reject(message) => Reply::Reject(message.clone()),
                        Handshake::AcceptAfter(delay) => Reply::Delay(*delay, hello),
                        _ => Reply::Ok(hello),
                    }
                } else {
                    script(&method, &frame["params"])
                };

                match reply {
                    Reply::Ok(payload) => {
                        let res = json!({ "type": "res", "id": id, "ok": true, "payload": payload });
                        let _ = ws.send(Message::Text(res.to_string().into())).await;
                    }
                    Reply::Reject(message) => {
                        let res = json!({
                            "type": "res", "id": id, "ok": false,
                            "error": { "code": "UNAVAILABLE", "message": message }
                        });
                        let _ = ws.send(Message::Text(res.to_string().into())).await;
                    }
                    Reply::Delay(delay, payload) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let res = json!({ "type": "res", "id": id, "ok": true, "payload": payload });
                            let _ = tx.send(Outgoing::Text(res.to_string()));
                        });
                    }
                    Reply::Ignore => {}
                    Reply::Close => {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }

            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    if ws.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = ws.close(None).await;
                    return;
                }
            },
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Options with short timeouts for tests.
pub fn fast_options() -> GatewayOptions {
    GatewayOptions::new()
        .with_reconnect_delay(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_secs(2))
        .with_handshake_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2))
        .with_chat_timeout(Duration::from_secs(2))
}

/// Polls `condition` every 10ms for up to 3s.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_gateway=warn")),
        )
        .with_test_writer()
        .try_init();
}
