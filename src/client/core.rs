//! Gateway client actor.
//!
//! [`GatewayClient`] is a cloneable handle to one actor task. The actor is
//! the only place connection state changes: caller commands, transport
//! signals and timer expirations all arrive on queues it drains one at a
//! time, so no two transitions ever interleave.
//!
//! ```text
//!  GatewayClient ──Command──┐
//!  Connection ────Signal────┼──► actor ──► StateMachine
//!  timers ────────Timer─────┘      │
//!                                  ├──► Correlator (responses)
//!                                  ├──► EventDispatcher (events)
//!                                  └──► watch<ConnectionState>
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SubscriptionId};
use crate::protocol::event::EVENT_TICK;
use crate::protocol::{
    ConnectParams, Envelope, Event, HelloOk, METHOD_CONNECT, Request, Response, decode, encode,
};
use crate::transport::{
    Connection, Correlator, EventDispatcher, EventFilter, TransportEvent, TransportSignal,
};

use super::identity::ClientIdentity;
use super::options::GatewayOptions;
use super::state::{ConnectionState, HandshakeOutcome, LossOutcome, Origin, StateMachine};

// ============================================================================
// Types
// ============================================================================

/// Requests from handles to the actor.
enum Command {
    /// Start an attempt unless one is running; replies with the new state.
    Connect { done: oneshot::Sender<ConnectionState> },
    /// Tear down and stop reconnecting.
    Disconnect { done: oneshot::Sender<()> },
    /// Transmit an encoded request already registered with the correlator.
    Send { id: RequestId, frame: String },
}

/// Timer expirations, tagged with the attempt that armed them.
#[derive(Debug, Clone, Copy)]
enum Timer {
    ReconnectDue { attempt: u64 },
    HandshakeDeadline { attempt: u64 },
}

/// Why the last attempt ended.
#[derive(Debug, Clone)]
enum Failure {
    Handshake(String),
    Transport(String),
}

impl Failure {
    fn to_error(&self) -> Error {
        match self {
            Self::Handshake(message) => Error::handshake_rejected(message.clone()),
            Self::Transport(message) => Error::transport(message.clone()),
        }
    }
}

/// Connection facts readable from any handle.
#[derive(Debug, Default)]
struct Status {
    hello: Option<HelloOk>,
    last_tick: Option<Instant>,
    last_failure: Option<Failure>,
}

/// Shared state behind every handle.
struct ClientInner {
    url: Url,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    correlator: Arc<Correlator>,
    dispatcher: Arc<EventDispatcher>,
    status: Arc<Mutex<Status>>,
}

// ============================================================================
// GatewayClient
// ============================================================================

/// Handle to a gateway connection.
///
/// Cloning is cheap; all clones drive the same connection. The actor task
/// stops, closing the socket and failing pending requests, once the last
/// handle is dropped.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Spawns the actor task. Must be called within a Tokio runtime.
    pub(crate) fn spawn(
        url: Url,
        token: Option<String>,
        identity: ClientIdentity,
        options: GatewayOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let correlator = Arc::new(Correlator::new(options.max_pending_requests));
        let dispatcher = Arc::new(EventDispatcher::new());
        let status = Arc::new(Mutex::new(Status::default()));

        let actor = Actor {
            url: url.clone(),
            token,
            identity,
            machine: StateMachine::new(options.reconnect, options.reconnect_delay),
            options,
            connection: None,
            commands: commands_rx,
            signals_tx,
            signals: signals_rx,
            timers_tx,
            timers: timers_rx,
            reconnect_timer: None,
            handshake_timer: None,
            correlator: Arc::clone(&correlator),
            dispatcher: Arc::clone(&dispatcher),
            status: Arc::clone(&status),
            state_tx,
        };

        tokio::spawn(actor.run());

        Self {
            inner: Arc::new(ClientInner {
                url,
                commands: commands_tx,
                state_rx,
                correlator,
                dispatcher,
                status,
            }),
        }
    }

    /// Returns the gateway URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Returns a receiver that observes every state change.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Returns the `hello-ok` payload of the current connection.
    #[must_use]
    pub fn hello(&self) -> Option<HelloOk> {
        self.inner.status.lock().hello.clone()
    }

    /// Returns when the last `tick` event arrived.
    #[must_use]
    pub fn last_tick(&self) -> Option<Instant> {
        self.inner.status.lock().last_tick
    }

    /// Starts a connection attempt unless one is running or the client is
    /// connected.
    ///
    /// Returns the state right after the request was processed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the actor has stopped.
    pub async fn connect(&self) -> Result<ConnectionState> {
        let (done, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Connect { done })
            .map_err(|_| Error::NotConnected)?;
        Ok(rx.await?)
    }

    /// Waits until the current attempt settles.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if `deadline` elapsed first
    /// - [`Error::HandshakeRejected`] if the gateway refused the handshake
    /// - [`Error::TransportFailure`] if the attempt failed at socket level
    /// - [`Error::NotConnected`] if the client was disconnected meanwhile
    pub async fn wait_connected(&self, deadline: Duration) -> Result<()> {
        let mut rx = self.watch_state();
        let settled = timeout(
            deadline,
            rx.wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Connected
                        | ConnectionState::Error
                        | ConnectionState::Disconnected
                )
            }),
        )
        .await;

        match settled {
            Err(_) => Err(Error::connection_timeout(deadline.as_millis() as u64)),
            Ok(Err(_)) => Err(Error::NotConnected),
            Ok(Ok(state)) => {
                let state = *state;
                match state {
                    ConnectionState::Connected => Ok(()),
                    ConnectionState::Error => Err(self.failure_error()),
                    _ => Err(Error::NotConnected),
                }
            }
        }
    }

    /// Closes the connection and cancels any scheduled reconnect.
    ///
    /// Pending requests fail with [`Error::NotConnected`].
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Disconnect { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Sends a correlated request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the state is not `Connected`
    /// - [`Error::Protocol`] if too many requests are in flight
    /// - [`Error::RequestRejected`] if the gateway answered `ok: false`
    /// - [`Error::RequestTimeout`] if `deadline` elapsed first
    /// - [`Error::TransportFailure`] if the connection dropped meanwhile
    pub async fn request(&self, method: &str, params: Value, deadline: Duration) -> Result<Value> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }

        let correlator = &self.inner.correlator;
        let id = correlator.next_id(method);
        let frame = encode(&Envelope::Request(Request::new(id.clone(), method, params)))?;
        let slot = correlator.register(id.clone(), method)?;

        if self
            .inner
            .commands
            .send(Command::Send {
                id: id.clone(),
                frame,
            })
            .is_err()
        {
            correlator.remove(&id);
            return Err(Error::NotConnected);
        }

        debug!(%id, method, "Request queued");
        correlator.wait(id, slot, deadline).await
    }

    /// Registers a callback for events passing `filter`.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(filter, handler)
    }

    /// Registers a channel for events passing `filter`.
    pub fn subscribe_channel(
        &self,
        filter: EventFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        self.inner.dispatcher.subscribe_channel(filter)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.dispatcher.unsubscribe(id)
    }

    fn failure_error(&self) -> Error {
        self.inner
            .status
            .lock()
            .last_failure
            .as_ref()
            .map_or(Error::NotConnected, Failure::to_error)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Owns the state machine and the live transport.
struct Actor {
    url: Url,
    token: Option<String>,
    identity: ClientIdentity,
    options: GatewayOptions,
    machine: StateMachine,
    connection: Option<Connection>,

    commands: mpsc::UnboundedReceiver<Command>,
    signals_tx: mpsc::UnboundedSender<TransportSignal>,
    signals: mpsc::UnboundedReceiver<TransportSignal>,
    timers_tx: mpsc::UnboundedSender<Timer>,
    timers: mpsc::UnboundedReceiver<Timer>,
    reconnect_timer: Option<JoinHandle<()>>,
    handshake_timer: Option<JoinHandle<()>>,

    correlator: Arc<Correlator>,
    dispatcher: Arc<EventDispatcher>,
    status: Arc<Mutex<Status>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Actor {
    async fn run(mut self) {
        debug!(url = %self.url, "Gateway client started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(signal) = self.signals.recv() => self.handle_signal(signal),

                Some(timer) = self.timers.recv() => self.handle_timer(timer),
            }
        }

        self.teardown();
        debug!(url = %self.url, "Gateway client stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { done } => {
                if let Some(attempt) = self.machine.connect(Origin::Caller) {
                    cancel(&mut self.reconnect_timer);
                    self.start_attempt(attempt);
                }
                let _ = done.send(self.machine.state());
            }

            Command::Disconnect { done } => {
                self.teardown();
                info!(url = %self.url, "Disconnected from gateway");
                let _ = done.send(());
            }

            Command::Send { id, frame } => {
                if !self.machine.state().is_connected() {
                    self.correlator.reject(&id, Error::NotConnected);
                    return;
                }

                let sent = match &self.connection {
                    Some(connection) => connection.send_text(frame),
                    None => Err(Error::NotConnected),
                };

                match sent {
                    Ok(()) => trace!(%id, "Request transmitted"),
                    Err(e) => {
                        self.correlator.reject(&id, e);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transport Signals
    // ------------------------------------------------------------------------

    fn handle_signal(&mut self, signal: TransportSignal) {
        let TransportSignal { attempt, event } = signal;

        if !self.machine.is_current(attempt) {
            trace!(attempt, current = self.machine.attempt(), "Ignoring stale transport signal");
            return;
        }

        match event {
            TransportEvent::Opened => {
                if self.machine.transport_opened(attempt) {
                    debug!(attempt, "Transport open, awaiting challenge");
                    self.publish();
                }
            }

            TransportEvent::Frame(text) => self.handle_frame(attempt, &text),

            TransportEvent::Closed { reason } => {
                let outcome = self.machine.transport_lost(attempt);
                self.on_lost(outcome, reason);
            }

            TransportEvent::Failed { error } => {
                let outcome = self.machine.transport_lost(attempt);
                self.on_lost(outcome, error);
            }
        }
    }

    fn handle_frame(&mut self, attempt: u64, text: &str) {
        let envelope = match decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(attempt, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match envelope {
            Envelope::Event(event) => self.handle_event(attempt, event),
            Envelope::Response(response) => self.handle_response(response),
            Envelope::Request(request) => {
                debug!(id = %request.id, method = %request.method, "Ignoring gateway-initiated request");
            }
        }
    }

    fn handle_event(&mut self, attempt: u64, event: Event) {
        if event.is_challenge() {
            let correlator = &self.correlator;
            match self
                .machine
                .challenge_received(attempt, || correlator.next_id(METHOD_CONNECT))
            {
                Some(id) => self.send_handshake(id),
                None => debug!(attempt, "Ignoring challenge outside handshake"),
            }
            return;
        }

        if event.name() == EVENT_TICK {
            self.status.lock().last_tick = Some(Instant::now());
        }

        self.dispatcher.dispatch(&event);
    }

    fn handle_response(&mut self, response: Response) {
        match self.machine.handshake_response(&response) {
            HandshakeOutcome::Unrelated => {
                self.correlator.resolve(response);
            }

            HandshakeOutcome::Accepted(hello) => {
                cancel(&mut self.handshake_timer);
                info!(
                    url = %self.url,
                    conn_id = hello.conn_id().unwrap_or("-"),
                    protocol = hello.protocol,
                    "Connected to gateway"
                );
                let mut status = self.status.lock();
                status.hello = Some(*hello);
                status.last_failure = None;
                drop(status);
                self.publish();
            }

            HandshakeOutcome::Rejected(message) => {
                cancel(&mut self.handshake_timer);
                warn!(url = %self.url, %message, "Gateway rejected handshake");
                self.status.lock().last_failure = Some(Failure::Handshake(message));
                self.connection = None;
                self.publish();
            }
        }
    }

    fn send_handshake(&mut self, id: RequestId) {
        let params = ConnectParams::new(&self.identity, self.token.as_deref());
        let frame = serde_json::to_value(&params)
            .map_err(Error::from)
            .and_then(|params| {
                encode(&Envelope::Request(Request::new(
                    id.clone(),
                    METHOD_CONNECT,
                    params,
                )))
            });

        let sent = match (frame, &self.connection) {
            (Ok(text), Some(connection)) => connection.send_text(text),
            (Ok(_), None) => Err(Error::NotConnected),
            (Err(e), _) => Err(e),
        };

        match sent {
            Ok(()) => debug!(%id, "Handshake sent"),
            Err(e) => {
                let outcome = self.machine.transport_lost(self.machine.attempt());
                self.on_lost(outcome, e.to_string());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::ReconnectDue { attempt } => {
                if let Some(next) = self.machine.reconnect_due(attempt) {
                    self.reconnect_timer = None;
                    info!(url = %self.url, attempt = next, "Reconnecting to gateway");
                    self.start_attempt(next);
                }
            }

            Timer::HandshakeDeadline { attempt } => {
                let outcome = self.machine.handshake_expired(attempt);
                let ms = self.options.handshake_timeout.as_millis();
                self.on_lost(outcome, format!("handshake timed out after {ms}ms"));
            }
        }
    }

    fn schedule(&self, delay: Duration, timer: Timer) -> JoinHandle<()> {
        let timers = self.timers_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(timer);
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    fn start_attempt(&mut self, attempt: u64) {
        cancel(&mut self.handshake_timer);

        debug!(attempt, url = %self.url, "Starting connection attempt");
        self.connection = Some(Connection::open(
            &self.url,
            self.options.transport(),
            attempt,
            self.signals_tx.clone(),
        ));
        self.handshake_timer = Some(self.schedule(
            self.options.handshake_timeout,
            Timer::HandshakeDeadline { attempt },
        ));

        self.publish();
    }

    fn on_lost(&mut self, outcome: LossOutcome, reason: String) {
        let LossOutcome::Lost {
            was_connected,
            reconnect_in,
        } = outcome
        else {
            return;
        };

        cancel(&mut self.handshake_timer);
        self.connection = None;

        let failed = self.correlator.fail_all(|| Error::transport(reason.clone()));

        if was_connected {
            warn!(url = %self.url, %reason, failed, "Gateway connection lost");
        } else {
            warn!(url = %self.url, %reason, "Gateway connection attempt failed");
        }

        let mut status = self.status.lock();
        status.hello = None;
        status.last_failure = Some(Failure::Transport(reason));
        drop(status);

        if let Some(delay) = reconnect_in {
            let attempt = self.machine.attempt();
            info!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
            self.reconnect_timer = Some(self.schedule(delay, Timer::ReconnectDue { attempt }));
        }

        self.publish();
    }

    fn teardown(&mut self) {
        cancel(&mut self.reconnect_timer);
        cancel(&mut self.handshake_timer);
        self.machine.disconnect();
        self.connection = None;
        self.correlator.fail_all(|| Error::NotConnected);
        self.status.lock().hello = None;
        self.publish();
    }

    fn publish(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }
}

fn cancel(timer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}
