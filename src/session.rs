//! Chat session facade.
//!
//! [`Gateway`] is the entry point applications use: one lazily connecting
//! handle shared by every caller. It ensures the connection before each
//! call and turns chat replies into plain text.
//!
//! # Example
//!
//! ```no_run
//! use agent_gateway::Gateway;
//!
//! # async fn example() -> agent_gateway::Result<()> {
//! let gateway = Gateway::builder()
//!     .url("ws://127.0.0.1:18789")
//!     .token("secret")
//!     .build()?;
//!
//! let reply = gateway.send("Where can I park?").await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::client::{ConnectionState, GatewayBuilder, GatewayClient, GatewayOptions};
use crate::error::{Error, Result};
use crate::identifiers::{IdempotencyKey, SessionKey, SubscriptionId};
use crate::protocol::chat::reply_text;
use crate::protocol::{
    ChatAbortParams, ChatHistory, ChatHistoryParams, ChatSendParams, Event, HelloOk,
    METHOD_CHAT_ABORT, METHOD_CHAT_HISTORY, METHOD_CHAT_SEND,
};
use crate::transport::EventFilter;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the gateway.
struct GatewayInner {
    /// Connection actor handle.
    client: GatewayClient,
    /// Tuning.
    options: GatewayOptions,
    /// Serializes connect and reconnect requests.
    connect_lock: Mutex<()>,
    /// Session used by [`Gateway::send`].
    session_key: RwLock<SessionKey>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Shared, lazily connecting gateway session.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

// ============================================================================
// Gateway - Display
// ============================================================================

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("url", &self.inner.client.url().as_str())
            .field("state", &self.state())
            .field("session_key", &self.session_key())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Gateway - Construction
// ============================================================================

impl Gateway {
    /// Creates a configuration builder for the gateway.
    #[inline]
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub(crate) fn new(client: GatewayClient, options: GatewayOptions, session_key: SessionKey) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                client,
                options,
                connect_lock: Mutex::new(()),
                session_key: RwLock::new(session_key),
            }),
        }
    }
}

// ============================================================================
// Gateway - Connection
// ============================================================================

impl Gateway {
    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.client.state()
    }

    /// Returns `true` if requests may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns a receiver that observes every state change.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.client.watch_state()
    }

    /// Returns the underlying client handle.
    #[inline]
    #[must_use]
    pub fn client(&self) -> &GatewayClient {
        &self.inner.client
    }

    /// Returns the tuning options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    /// Returns the `hello-ok` payload of the current connection.
    #[inline]
    #[must_use]
    pub fn hello(&self) -> Option<HelloOk> {
        self.inner.client.hello()
    }

    /// Returns when the last heartbeat arrived.
    #[inline]
    #[must_use]
    pub fn last_tick(&self) -> Option<Instant> {
        self.inner.client.last_tick()
    }

    /// Connects unless already connected, waiting at most `deadline`.
    ///
    /// Returns `true` once `Connected`; `false` on failure or timeout.
    pub async fn ensure_connected(&self, deadline: Duration) -> bool {
        match self.connect_within(deadline).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Gateway not connected");
                false
            }
        }
    }

    /// Connects unless already connected.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if `deadline` elapsed first
    /// - [`Error::HandshakeRejected`] if the gateway refused the handshake
    /// - [`Error::TransportFailure`] if the gateway was unreachable
    pub async fn connect_within(&self, deadline: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let attempt = async {
            let _guard = self.inner.connect_lock.lock().await;
            if self.is_connected() {
                return Ok(());
            }
            self.inner.client.connect().await?;
            self.inner.client.wait_connected(deadline).await
        };

        timeout(deadline, attempt)
            .await
            .unwrap_or_else(|_| Err(Error::connection_timeout(deadline.as_millis() as u64)))
    }

    /// Drops the current connection and connects again.
    ///
    /// Returns `true` once `Connected`.
    pub async fn reconnect(&self, deadline: Duration) -> bool {
        {
            let _guard = self.inner.connect_lock.lock().await;
            info!(url = %self.inner.client.url(), "Reconnect requested");
            self.inner.client.disconnect().await;
        }
        self.ensure_connected(deadline).await
    }

    /// Closes the connection and cancels any scheduled reconnect.
    pub async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.client.disconnect().await;
    }
}

// ============================================================================
// Gateway - Chat
// ============================================================================

impl Gateway {
    /// Returns the default session key.
    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        self.inner.session_key.read().clone()
    }

    /// Replaces the default session key.
    pub fn set_session_key(&self, key: impl Into<SessionKey>) {
        *self.inner.session_key.write() = key.into();
    }

    /// Sends `text` to the default session and returns the reply.
    ///
    /// # Errors
    ///
    /// See [`Gateway::send_message`].
    pub async fn send(&self, text: &str) -> Result<String> {
        let session_key = self.session_key();
        self.send_message(text, &session_key, self.inner.options.chat_timeout)
            .await
    }

    /// Sends `text` to `session_key` and returns the reply.
    ///
    /// A fresh idempotency key is generated for the call.
    ///
    /// # Errors
    ///
    /// - Connection errors from [`Gateway::connect_within`]
    /// - [`Error::RequestRejected`] if the gateway refused the message
    /// - [`Error::RequestTimeout`] if no reply arrived within `deadline`
    /// - [`Error::TransportFailure`] if the connection dropped meanwhile
    /// - [`Error::Protocol`] if the reply carried no text
    pub async fn send_message(
        &self,
        text: &str,
        session_key: &SessionKey,
        deadline: Duration,
    ) -> Result<String> {
        self.send_message_with_key(text, session_key, IdempotencyKey::generate(), deadline)
            .await
    }

    /// Like [`Gateway::send_message`] with a caller-chosen idempotency key.
    ///
    /// Reusing the key on retry lets the gateway drop duplicates.
    ///
    /// # Errors
    ///
    /// See [`Gateway::send_message`].
    pub async fn send_message_with_key(
        &self,
        text: &str,
        session_key: &SessionKey,
        idempotency_key: IdempotencyKey,
        deadline: Duration,
    ) -> Result<String> {
        let params = ChatSendParams {
            session_key: session_key.clone(),
            text: text.to_string(),
            idempotency_key,
        };

        let payload = self
            .request(METHOD_CHAT_SEND, serde_json::to_value(params)?, deadline)
            .await?;

        reply_text(&payload)
    }

    /// Fetches the recent messages of `session_key`.
    ///
    /// # Errors
    ///
    /// Same as [`Gateway::request`], plus [`Error::Protocol`] for a
    /// malformed payload.
    pub async fn chat_history(
        &self,
        session_key: &SessionKey,
        limit: Option<u32>,
    ) -> Result<ChatHistory> {
        let params = ChatHistoryParams {
            session_key: session_key.clone(),
            limit,
        };

        let payload = self
            .request(
                METHOD_CHAT_HISTORY,
                serde_json::to_value(params)?,
                self.inner.options.request_timeout,
            )
            .await?;

        ChatHistory::from_payload(&payload)
    }

    /// Aborts the running reply of `session_key`.
    ///
    /// # Errors
    ///
    /// Same as [`Gateway::request`].
    pub async fn abort(&self, session_key: &SessionKey) -> Result<()> {
        let params = ChatAbortParams {
            session_key: session_key.clone(),
        };

        self.request(
            METHOD_CHAT_ABORT,
            serde_json::to_value(params)?,
            self.inner.options.request_timeout,
        )
        .await?;
        Ok(())
    }

    /// Connects if needed, then sends a correlated request.
    ///
    /// `deadline` covers connecting and waiting for the response together.
    ///
    /// # Errors
    ///
    /// Connection errors from [`Gateway::connect_within`], then
    /// everything [`GatewayClient::request`] returns.
    pub async fn request(&self, method: &str, params: Value, deadline: Duration) -> Result<Value> {
        let started = Instant::now();
        self.connect_within(deadline).await?;

        let remaining = deadline.saturating_sub(started.elapsed());
        self.inner.client.request(method, params, remaining).await
    }
}

// ============================================================================
// Gateway - Events
// ============================================================================

impl Gateway {
    /// Registers a callback for events passing `filter`.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.client.subscribe(filter, handler)
    }

    /// Registers a channel for events passing `filter`.
    pub fn subscribe_channel(
        &self,
        filter: EventFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        self.inner.client.subscribe_channel(filter)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.client.unsubscribe(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
