//! Connection state machine.
//!
//! [`StateMachine`] is the pure transition logic behind
//! [`GatewayClient`](super::GatewayClient). It owns no I/O: the actor feeds
//! it transport signals and timer expirations, and it answers with what to
//! do next. Every input carries the attempt number it belongs to, so
//! signals from a superseded transport never move the state.
//!
//! ```text
//!                 connect()
//! Disconnected ───────────────► Connecting ──opened──► Handshaking
//!      ▲                            │                      │
//!      │ lost (no reconnect)        │ failed               │ challenge → send connect (once)
//!      │                            ▼                      │ hello-ok
//!  Connected ◄──────────────────────┼──────────────────────┘
//!      │                            ▼
//!      │ lost (reconnect)         Error ◄── rejected / failed
//!      ▼
//! Reconnecting ──delay──► Connecting
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::identifiers::RequestId;
use crate::protocol::{HelloOk, Response};

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable lifecycle state of the gateway connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and nothing scheduled.
    #[default]
    Disconnected,
    /// Dialing the gateway.
    Connecting,
    /// Transport open, handshake in progress.
    Handshaking,
    /// Handshake accepted; requests may be sent.
    Connected,
    /// Connection lost, retry scheduled.
    Reconnecting,
    /// Last attempt failed; waits for an explicit connect.
    Error,
}

impl ConnectionState {
    /// Returns `true` if requests may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Returns `true` while an attempt is in progress.
    #[inline]
    #[must_use]
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Handshaking)
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Who started a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A caller asked for the connection.
    Caller,
    /// The reconnect timer fired.
    Reconnect,
}

/// Result of offering a response to the handshake.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HandshakeOutcome {
    /// Not the handshake response; route it to the correlator.
    Unrelated,
    /// Handshake accepted.
    Accepted(Box<HelloOk>),
    /// Handshake refused.
    Rejected(String),
}

/// Result of losing (or timing out) a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LossOutcome {
    /// The signal belongs to a superseded attempt or nothing was live.
    Stale,
    /// The current attempt ended.
    Lost {
        /// The connection had reached `Connected`.
        was_connected: bool,
        /// Delay before the automatic reconnect, if one is scheduled.
        reconnect_in: Option<Duration>,
    },
}

// ============================================================================
// StateMachine
// ============================================================================

/// Transition logic of one gateway connection.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: ConnectionState,
    /// Generation of the current attempt.
    attempt: u64,
    /// Who started the current attempt.
    origin: Origin,
    /// ID of the `connect` request of the current attempt, once sent.
    handshake_id: Option<RequestId>,
    reconnect: bool,
    reconnect_delay: Duration,
}

impl StateMachine {
    /// Creates a machine in `Disconnected`.
    pub fn new(reconnect: bool, reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            origin: Origin::Caller,
            handshake_id: None,
            reconnect,
            reconnect_delay,
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Returns `true` if `attempt` is the live generation.
    #[inline]
    pub fn is_current(&self, attempt: u64) -> bool {
        attempt == self.attempt
    }

    /// Starts a new attempt.
    ///
    /// Returns the new attempt number, or `None` if an attempt is already
    /// running or the connection is up. A caller joining a running
    /// automatic attempt adopts it, so its failure ends in `Error`.
    pub fn connect(&mut self, origin: Origin) -> Option<u64> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Handshaking => {
                if origin == Origin::Caller {
                    self.origin = Origin::Caller;
                }
                None
            }
            ConnectionState::Connected => None,
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Error => {
                self.attempt += 1;
                self.origin = origin;
                self.handshake_id = None;
                self.state = ConnectionState::Connecting;
                Some(self.attempt)
            }
        }
    }

    /// The transport of `attempt` opened.
    pub fn transport_opened(&mut self, attempt: u64) -> bool {
        if self.is_current(attempt) && self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Handshaking;
            true
        } else {
            false
        }
    }

    /// A challenge arrived on `attempt`.
    ///
    /// Returns the ID to send the `connect` request under, at most once
    /// per attempt. `next_id` is only called when a request is due.
    pub fn challenge_received(
        &mut self,
        attempt: u64,
        next_id: impl FnOnce() -> RequestId,
    ) -> Option<RequestId> {
        if !self.is_current(attempt)
            || self.state != ConnectionState::Handshaking
            || self.handshake_id.is_some()
        {
            return None;
        }

        let id = next_id();
        self.handshake_id = Some(id.clone());
        Some(id)
    }

    /// Offers a response to the handshake.
    pub fn handshake_response(&mut self, response: &Response) -> HandshakeOutcome {
        if self.state != ConnectionState::Handshaking
            || self.handshake_id.as_ref() != Some(&response.id)
        {
            return HandshakeOutcome::Unrelated;
        }

        self.handshake_id = None;

        if !response.ok {
            self.state = ConnectionState::Error;
            return HandshakeOutcome::Rejected(response.error_message());
        }

        match response.payload.as_ref().and_then(HelloOk::from_payload) {
            Some(hello) => {
                self.state = ConnectionState::Connected;
                HandshakeOutcome::Accepted(Box::new(hello))
            }
            None => {
                self.state = ConnectionState::Error;
                HandshakeOutcome::Rejected("unexpected handshake reply".to_string())
            }
        }
    }

    /// The transport of `attempt` closed or failed.
    pub fn transport_lost(&mut self, attempt: u64) -> LossOutcome {
        if !self.is_current(attempt) {
            return LossOutcome::Stale;
        }

        let was_connected = match self.state {
            ConnectionState::Connected => true,
            ConnectionState::Connecting | ConnectionState::Handshaking => false,
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Error => return LossOutcome::Stale,
        };

        self.handshake_id = None;

        let retry = self.reconnect && (was_connected || self.origin == Origin::Reconnect);
        let reconnect_in = if retry {
            self.state = ConnectionState::Reconnecting;
            Some(self.reconnect_delay)
        } else if was_connected {
            self.state = ConnectionState::Disconnected;
            None
        } else {
            self.state = ConnectionState::Error;
            None
        };

        LossOutcome::Lost {
            was_connected,
            reconnect_in,
        }
    }

    /// The handshake deadline of `attempt` elapsed.
    ///
    /// Has no effect once the attempt reached `Connected`.
    pub fn handshake_expired(&mut self, attempt: u64) -> LossOutcome {
        if self.is_current(attempt) && self.state.is_connecting() {
            self.transport_lost(attempt)
        } else {
            LossOutcome::Stale
        }
    }

    /// The reconnect timer scheduled after `attempt` fired.
    pub fn reconnect_due(&mut self, attempt: u64) -> Option<u64> {
        if self.is_current(attempt) && self.state == ConnectionState::Reconnecting {
            self.connect(Origin::Reconnect)
        } else {
            None
        }
    }

    /// Tears everything down and invalidates the current attempt.
    ///
    /// Returns `false` if the machine was already `Disconnected`.
    pub fn disconnect(&mut self) -> bool {
        let changed = self.state != ConnectionState::Disconnected;
        self.attempt += 1;
        self.handshake_id = None;
        self.state = ConnectionState::Disconnected;
        changed
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, HashSet};

    use proptest::prelude::*;
    use serde_json::json;

    const DELAY: Duration = Duration::from_millis(5);

    fn hello_ok(id: RequestId) -> Response {
        Response::success(id, json!({ "type": "hello-ok", "protocol": 3 }))
    }

    /// Drives a machine to `Connected` and returns its attempt.
    fn connected(machine: &mut StateMachine) -> u64 {
        let attempt = machine.connect(Origin::Caller).expect("attempt");
        assert!(machine.transport_opened(attempt));
        let id = machine
            .challenge_received(attempt, || RequestId::from("connect-1"))
            .expect("handshake");
        assert!(matches!(machine.handshake_response(&hello_ok(id)), HandshakeOutcome::Accepted(_)));
        attempt
    }

    #[test]
    fn test_happy_path() {
        let mut machine = StateMachine::new(true, DELAY);
        connected(&mut machine);
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_is_idempotent_while_running() {
        let mut machine = StateMachine::new(true, DELAY);
        assert!(machine.connect(Origin::Caller).is_some());
        assert!(machine.connect(Origin::Caller).is_none());
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_single_handshake_per_attempt() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = machine.connect(Origin::Caller).expect("attempt");

        assert!(machine.challenge_received(attempt, || RequestId::from("x")).is_none());
        machine.transport_opened(attempt);
        assert!(machine.challenge_received(attempt, || RequestId::from("connect-1")).is_some());
        assert!(machine.challenge_received(attempt, || RequestId::from("connect-2")).is_none());
    }

    #[test]
    fn test_rejected_handshake_goes_to_error() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = machine.connect(Origin::Caller).expect("attempt");
        machine.transport_opened(attempt);
        let id = machine
            .challenge_received(attempt, || RequestId::from("connect-1"))
            .expect("handshake");

        let outcome = machine.handshake_response(&Response::failure(id, "bad token"));
        assert_eq!(outcome, HandshakeOutcome::Rejected("bad token".to_string()));
        assert_eq!(machine.state(), ConnectionState::Error);
    }

    #[test]
    fn test_unexpected_hello_payload_is_rejection() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = machine.connect(Origin::Caller).expect("attempt");
        machine.transport_opened(attempt);
        let id = machine
            .challenge_received(attempt, || RequestId::from("connect-1"))
            .expect("handshake");

        let outcome = machine.handshake_response(&Response::success(id, json!({ "type": "nope" })));
        assert!(matches!(outcome, HandshakeOutcome::Rejected(_)));
        assert_eq!(machine.state(), ConnectionState::Error);
    }

    #[test]
    fn test_other_responses_are_unrelated() {
        let mut machine = StateMachine::new(true, DELAY);
        connected(&mut machine);
        let outcome = machine.handshake_response(&hello_ok(RequestId::from("chat-1")));
        assert_eq!(outcome, HandshakeOutcome::Unrelated);
    }

    #[test]
    fn test_loss_with_reconnect() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = connected(&mut machine);

        let outcome = machine.transport_lost(attempt);
        assert_eq!(
            outcome,
            LossOutcome::Lost {
                was_connected: true,
                reconnect_in: Some(DELAY)
            }
        );
        assert_eq!(machine.state(), ConnectionState::Reconnecting);

        let next = machine.reconnect_due(attempt).expect("reconnect");
        assert_eq!(next, attempt + 1);
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_loss_without_reconnect() {
        let mut machine = StateMachine::new(false, DELAY);
        let attempt = connected(&mut machine);

        machine.transport_lost(attempt);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_failed_caller_attempt_goes_to_error() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = machine.connect(Origin::Caller).expect("attempt");

        let outcome = machine.transport_lost(attempt);
        assert_eq!(
            outcome,
            LossOutcome::Lost {
                was_connected: false,
                reconnect_in: None
            }
        );
        assert_eq!(machine.state(), ConnectionState::Error);
        assert!(machine.connect(Origin::Caller).is_some());
    }

    #[test]
    fn test_failed_automatic_attempt_keeps_retrying() {
        let mut machine = StateMachine::new(true, DELAY);
        let first = connected(&mut machine);
        machine.transport_lost(first);
        let second = machine.reconnect_due(first).expect("reconnect");

        machine.transport_lost(second);
        assert_eq!(machine.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_caller_joining_automatic_attempt_gets_error() {
        let mut machine = StateMachine::new(true, DELAY);
        let first = connected(&mut machine);
        machine.transport_lost(first);
        let second = machine.reconnect_due(first).expect("reconnect");
        machine.transport_opened(second);

        assert!(machine.connect(Origin::Caller).is_none());
        assert!(matches!(machine.handshake_expired(second), LossOutcome::Lost { reconnect_in: None, .. }));
        assert_eq!(machine.state(), ConnectionState::Error);
    }

    #[test]
    fn test_stale_signals_are_ignored() {
        let mut machine = StateMachine::new(true, DELAY);
        let old = connected(&mut machine);
        machine.transport_lost(old);
        let new = machine.reconnect_due(old).expect("reconnect");

        assert!(!machine.transport_opened(old));
        assert_eq!(machine.transport_lost(old), LossOutcome::Stale);
        assert!(machine.reconnect_due(old).is_none());
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(machine.is_current(new));
    }

    #[test]
    fn test_handshake_deadline() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = machine.connect(Origin::Caller).expect("attempt");
        machine.transport_opened(attempt);

        assert!(matches!(machine.handshake_expired(attempt), LossOutcome::Lost { .. }));
        assert_eq!(machine.state(), ConnectionState::Error);

        let mut machine = StateMachine::new(true, DELAY);
        let attempt = connected(&mut machine);
        assert_eq!(machine.handshake_expired(attempt), LossOutcome::Stale);
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_invalidates_attempt() {
        let mut machine = StateMachine::new(true, DELAY);
        let attempt = connected(&mut machine);

        assert!(machine.disconnect());
        assert!(!machine.disconnect());
        assert_eq!(machine.transport_lost(attempt), LossOutcome::Stale);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Handshaking.to_string(), "handshaking");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------------
    // Handshake invariant
    // ------------------------------------------------------------------------

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Connect,
        Open,
        Challenge,
        StaleChallenge,
        OtherEvent,
        HelloOk,
        Close,
        ReconnectDue,
        Deadline,
        Disconnect,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Connect),
            Just(Step::Open),
            Just(Step::Challenge),
            Just(Step::StaleChallenge),
            Just(Step::OtherEvent),
            Just(Step::HelloOk),
            Just(Step::Close),
            Just(Step::ReconnectDue),
            Just(Step::Deadline),
            Just(Step::Disconnect),
        ]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_handshake_per_attempt(
            reconnect in any::<bool>(),
            steps in prop::collection::vec(step(), 0..64),
        ) {
            let mut machine = StateMachine::new(reconnect, DELAY);
            let mut sent: HashMap<u64, u32> = HashMap::new();
            let mut opened: HashSet<u64> = HashSet::new();
            let mut last_id: Option<RequestId> = None;
            let mut counter = 0u32;

            for step in steps {
                let attempt = machine.attempt();
                match step {
                    Step::Connect => {
                        machine.connect(Origin::Caller);
                    }
                    Step::Open => {
                        if machine.transport_opened(attempt) {
                            opened.insert(attempt);
                        }
                    }
                    Step::Challenge | Step::StaleChallenge => {
                        let target = if matches!(step, Step::StaleChallenge) {
                            attempt.saturating_sub(1)
                        } else {
                            attempt
                        };
                        if let Some(id) = machine.challenge_received(target, || {
                            counter += 1;
                            RequestId::new(format!("connect-{counter}"))
                        }) {
                            prop_assert!(opened.contains(&target), "handshake before open");
                            *sent.entry(target).or_default() += 1;
                            last_id = Some(id);
                        }
                    }
                    Step::OtherEvent => {
                        let _ = machine.handshake_response(&hello_ok(RequestId::from("chat-1")));
                    }
                    Step::HelloOk => {
                        if let Some(id) = last_id.clone() {
                            let _ = machine.handshake_response(&hello_ok(id));
                        }
                    }
                    Step::Close => {
                        let _ = machine.transport_lost(attempt);
                    }
                    Step::ReconnectDue => {
                        let _ = machine.reconnect_due(attempt);
                    }
                    Step::Deadline => {
                        let _ = machine.handshake_expired(attempt);
                    }
                    Step::Disconnect => {
                        machine.disconnect();
                    }
                }

                if machine.state() == ConnectionState::Connected {
                    prop_assert_eq!(sent.get(&machine.attempt()).copied(), Some(1));
                }
            }

            for (attempt, count) in sent {
                prop_assert!(count <= 1, "attempt {} sent {} handshakes", attempt, count);
            }
        }
    }
}
