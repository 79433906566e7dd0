//! WebSocket connection and I/O loop.
//!
//! A [`Connection`] owns one WebSocket to the gateway. It spawns a tokio
//! task that:
//!
//! - Dials the gateway (bounded by the connect timeout)
//! - Forwards inbound text frames as [`TransportEvent::Frame`]
//! - Writes outbound text frames queued with [`Connection::send_text`]
//! - Sends protocol-level pings on a fixed interval
//! - Reports the end of the socket as `Closed` or `Failed`
//!
//! Every lifecycle callback is posted as a [`TransportSignal`] onto a
//! single-consumer queue, tagged with the attempt number it belongs to.
//! The consumer is the connection state machine; signals from a
//! superseded attempt are ignored there.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Lifecycle callback of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The WebSocket handshake completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket closed cleanly.
    Closed {
        /// Close reason.
        reason: String,
    },
    /// The socket failed (dial error, I/O error, protocol error).
    Failed {
        /// Error description.
        error: String,
    },
}

impl TransportEvent {
    /// Returns `true` if the transport is gone after this event.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }
}

/// A [`TransportEvent`] tagged with its connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSignal {
    /// Attempt number the event belongs to.
    pub attempt: u64,
    /// The event.
    pub event: TransportEvent,
}

/// Socket-level settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Maximum time to dial and upgrade.
    pub connect_timeout: Duration,
    /// Interval between protocol pings.
    pub ping_interval: Duration,
}

/// Frames queued for the I/O task.
enum Outbound {
    /// Send a text frame.
    Text(String),
    /// Close the socket.
    Close,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to one WebSocket connection attempt.
///
/// Dropping every handle closes the socket.
pub struct Connection {
    /// Attempt number this connection belongs to.
    attempt: u64,
    /// Channel for frames to the I/O task.
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Starts dialing `url` and returns immediately.
    ///
    /// The outcome is reported on `signals` as `Opened` or `Failed`.
    pub fn open(
        url: &Url,
        options: TransportOptions,
        attempt: u64,
        signals: mpsc::UnboundedSender<TransportSignal>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_io_loop(
            url.clone(),
            options,
            attempt,
            outbound_rx,
            signals,
        ));

        Self {
            attempt,
            outbound_tx,
        }
    }

    /// Returns the attempt number.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`] if the I/O task has exited.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Text(text))
            .map_err(|_| Error::transport("connection closed"))
    }

    /// Asks the I/O task to close the socket.
    pub fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }

    /// Dials, then pumps frames until the socket ends.
    async fn run_io_loop(
        url: Url,
        options: TransportOptions,
        attempt: u64,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        signals: mpsc::UnboundedSender<TransportSignal>,
    ) {
        let emit = |event: TransportEvent| {
            let _ = signals.send(TransportSignal { attempt, event });
        };

        debug!(attempt, url = %url, "Dialing gateway");

        let dial = timeout(options.connect_timeout, connect_async(url.as_str()));
        tokio::pin!(dial);

        let ws_stream = loop {
            tokio::select! {
                result = &mut dial => match result {
                    Ok(Ok((ws_stream, _response))) => break ws_stream,
                    Ok(Err(e)) => {
                        warn!(attempt, error = %e, "Gateway dial failed");
                        emit(TransportEvent::Failed { error: e.to_string() });
                        return;
                    }
                    Err(_) => {
                        let ms = options.connect_timeout.as_millis();
                        warn!(attempt, timeout_ms = ms as u64, "Gateway dial timed out");
                        emit(TransportEvent::Failed {
                            error: format!("connect timed out after {ms}ms"),
                        });
                        return;
                    }
                },

                command = outbound_rx.recv() => match command {
                    Some(Outbound::Text(_)) => {
                        warn!(attempt, "Dropping frame queued before transport opened");
                    }
                    Some(Outbound::Close) | None => {
                        debug!(attempt, "Connection closed before it opened");
                        return;
                    }
                },
            }
        };

        debug!(attempt, "WebSocket connection established");
        emit(TransportEvent::Opened);

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let mut ping = interval_at(Instant::now() + options.ping_interval, options.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                // Incoming messages from the gateway
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(attempt, len = text.len(), "Frame received");
                            emit(TransportEvent::Frame(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => emit(TransportEvent::Frame(text.to_owned())),
                            Err(e) => warn!(attempt, error = %e, "Dropping non-UTF-8 binary frame"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            let reason = match frame {
                                Some(f) => format!(
                                    "closed by gateway ({}): {}",
                                    u16::from(f.code),
                                    f.reason.as_str()
                                ),
                                None => "closed by gateway".to_string(),
                            };
                            debug!(attempt, %reason, "WebSocket closed by remote");
                            break TransportEvent::Closed { reason };
                        }

                        Some(Err(e)) => {
                            warn!(attempt, error = %e, "WebSocket error");
                            break TransportEvent::Failed { error: e.to_string() };
                        }

                        None => {
                            debug!(attempt, "WebSocket stream ended");
                            break TransportEvent::Closed { reason: "stream ended".to_string() };
                        }

                        // Ping/Pong are answered by tungstenite
                        _ => {}
                    }
                }

                // Keep-alive
                _ = ping.tick() => {
                    if let Err(e) = ws_write.send(Message::Ping(Default::default())).await {
                        warn!(attempt, error = %e, "Failed to send ping");
                        break TransportEvent::Failed { error: e.to_string() };
                    }
                    trace!(attempt, "Ping sent");
                }

                // Frames from the client
                command = outbound_rx.recv() => {
                    match command {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(attempt, error = %e, "Failed to send frame");
                                break TransportEvent::Failed { error: e.to_string() };
                            }
                        }

                        Some(Outbound::Close) | None => {
                            debug!(attempt, "Closing connection");
                            let _ = ws_write.close().await;
                            break TransportEvent::Closed { reason: "closed by client".to_string() };
                        }
                    }
                }
            }
        };

        emit(end);
        debug!(attempt, "I/O loop terminated");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn options() -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(30),
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportSignal>) -> TransportSignal {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("signal in time")
            .expect("signal channel open")
    }

    #[test]
    fn test_terminal_events() {
        assert!(TransportEvent::Closed { reason: String::new() }.is_terminal());
        assert!(TransportEvent::Failed { error: String::new() }.is_terminal());
        assert!(!TransportEvent::Opened.is_terminal());
        assert!(!TransportEvent::Frame(String::new()).is_terminal());
    }

    #[tokio::test]
    async fn test_dial_failure_reports_failed() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _connection = Connection::open(&url, options(), 7, tx);

        let signal = next(&mut rx).await;
        assert_eq!(signal.attempt, 7);
        assert!(matches!(signal.event, TransportEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            ws.send(Message::Text(r#"{"type":"event","event":"tick"}"#.into()))
                .await
                .expect("send");
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    return text.as_str().to_owned();
                }
            }
            String::new()
        });

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::open(&url, options(), 1, tx);

        assert_eq!(next(&mut rx).await.event, TransportEvent::Opened);
        assert_eq!(
            next(&mut rx).await.event,
            TransportEvent::Frame(r#"{"type":"event","event":"tick"}"#.to_string())
        );

        connection.send_text("hello".to_string()).expect("queue");
        assert_eq!(server.await.expect("server"), "hello");

        assert!(next(&mut rx).await.event.is_terminal());
    }

    #[tokio::test]
    async fn test_close_before_open_is_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::open(&url, options(), 3, tx);
        connection.close();
        drop(connection);

        // Accept the TCP connection but never upgrade it.
        let _held = listener.accept().await;
        let outcome = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(outcome, Ok(Some(TransportSignal { event: TransportEvent::Opened, .. }))));
    }
}
