//! Event message types.
//!
//! Events are unsolicited pushes from the gateway. The connection state
//! machine consumes `connect.challenge`; every other event goes to the
//! event dispatcher.
//!
//! # Event Types
//!
//! | Name | Meaning |
//! |------|---------|
//! | `connect.challenge` | Starts the handshake (also accepted as `challenge`) |
//! | `tick` | Heartbeat, informational |
//! | `agent` | Server-side task/session status change |
//! | `chat` | Complete or partial reply |
//! | `chat.chunk` | Incremental text fragment for streaming display |
//! | `presence` | Online/offline signal, informational |
//! | `shutdown` | Gateway is going away |
//!
//! Unknown names parse to [`ParsedEvent::Unknown`] so new gateway events
//! never break the client.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chat::extract_text;

// ============================================================================
// Event Names
// ============================================================================

/// Handshake challenge event.
pub const EVENT_CHALLENGE: &str = "connect.challenge";

/// Short alias some gateways use for the challenge.
pub const EVENT_CHALLENGE_SHORT: &str = "challenge";

/// Heartbeat event.
pub const EVENT_TICK: &str = "tick";

/// Agent status event.
pub const EVENT_AGENT: &str = "agent";

/// Chat reply event.
pub const EVENT_CHAT: &str = "chat";

/// Streaming chat fragment event.
pub const EVENT_CHAT_CHUNK: &str = "chat.chunk";

/// Presence event.
pub const EVENT_PRESENCE: &str = "presence";

/// Gateway shutdown notice.
pub const EVENT_SHUTDOWN: &str = "shutdown";

// ============================================================================
// Event
// ============================================================================

/// An event notification from gateway to client.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "event": "chat",
///   "payload": { ... },
///   "seq": 12
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name.
    pub event: String,

    /// Event-specific data.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    /// Gateway sequence number, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl Event {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            event: name.into(),
            payload,
            seq: None,
        }
    }

    /// Returns the event name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.event
    }

    /// Returns the namespace before the first `.` (`chat.chunk` → `chat`).
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.event.split('.').next().unwrap_or_default()
    }

    /// Returns `true` if this event starts the handshake.
    #[inline]
    #[must_use]
    pub fn is_challenge(&self) -> bool {
        self.event == EVENT_CHALLENGE || self.event == EVENT_CHALLENGE_SHORT
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        match self.event.as_str() {
            EVENT_CHALLENGE | EVENT_CHALLENGE_SHORT => ParsedEvent::Challenge {
                nonce: self.get_optional_string("nonce"),
                ts: self.get_optional_u64("ts"),
            },

            EVENT_TICK => ParsedEvent::Tick {
                ts: self.get_optional_u64("ts"),
            },

            EVENT_AGENT => ParsedEvent::Agent {
                session_key: self.get_optional_string("sessionKey"),
                run_id: self.get_optional_string("runId"),
                status: self
                    .get_optional_string("status")
                    .or_else(|| self.get_optional_string("stream")),
                payload: self.payload.clone(),
            },

            EVENT_CHAT => ParsedEvent::Chat {
                session_key: self.get_optional_string("sessionKey"),
                run_id: self.get_optional_string("runId"),
                text: extract_text(&self.payload),
                is_final: self.chat_is_final(),
                error: self.get_optional_string("errorMessage"),
            },

            EVENT_CHAT_CHUNK => ParsedEvent::ChatChunk {
                session_key: self.get_optional_string("sessionKey"),
                run_id: self.get_optional_string("runId"),
                text: self
                    .get_optional_string("delta")
                    .or_else(|| extract_text(&self.payload))
                    .unwrap_or_default(),
            },

            EVENT_PRESENCE => ParsedEvent::Presence {
                online: self.presence_online(),
                payload: self.payload.clone(),
            },

            EVENT_SHUTDOWN => ParsedEvent::Shutdown {
                reason: self.get_optional_string("reason"),
            },

            _ => ParsedEvent::Unknown {
                name: self.event.clone(),
                payload: self.payload.clone(),
            },
        }
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Parsed event types for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Handshake challenge.
    Challenge {
        /// Server nonce.
        nonce: Option<String>,
        /// Server timestamp (ms).
        ts: Option<u64>,
    },

    /// Heartbeat.
    Tick {
        /// Server timestamp (ms).
        ts: Option<u64>,
    },

    /// Agent task/session status change.
    Agent {
        /// Session the status belongs to.
        session_key: Option<String>,
        /// Agent run ID.
        run_id: Option<String>,
        /// Status or stream label.
        status: Option<String>,
        /// Full payload.
        payload: Value,
    },

    /// Complete or partial chat reply.
    Chat {
        /// Session the reply belongs to.
        session_key: Option<String>,
        /// Agent run ID.
        run_id: Option<String>,
        /// Reply text, if any.
        text: Option<String>,
        /// `false` for partial (streaming) replies.
        is_final: bool,
        /// Error message for failed runs.
        error: Option<String>,
    },

    /// Incremental text fragment.
    ChatChunk {
        /// Session the fragment belongs to.
        session_key: Option<String>,
        /// Agent run ID.
        run_id: Option<String>,
        /// Fragment text.
        text: String,
    },

    /// Online/offline signal.
    Presence {
        /// Online flag, when the payload carries one.
        online: Option<bool>,
        /// Full payload.
        payload: Value,
    },

    /// Gateway shutdown notice.
    Shutdown {
        /// Reason given by the gateway.
        reason: Option<String>,
    },

    /// Unknown event type.
    Unknown {
        /// Event name.
        name: String,
        /// Event payload.
        payload: Value,
    },
}

// ============================================================================
// Event Parsing Helpers
// ============================================================================

impl Event {
    /// Derives the final/partial flag of a chat event.
    ///
    /// `state` wins over `final`, which wins over `partial`. Events with
    /// none of them are complete replies.
    fn chat_is_final(&self) -> bool {
        if let Some(state) = self.payload.get("state").and_then(Value::as_str) {
            return state != "delta";
        }
        if let Some(is_final) = self.payload.get("final").and_then(Value::as_bool) {
            return is_final;
        }
        if let Some(partial) = self.payload.get("partial").and_then(Value::as_bool) {
            return !partial;
        }
        true
    }

    /// Reads the online flag of a presence event.
    fn presence_online(&self) -> Option<bool> {
        if let Some(online) = self.payload.get("online").and_then(Value::as_bool) {
            return Some(online);
        }
        match self.payload.get("status").and_then(Value::as_str) {
            Some("online") => Some(true),
            Some("offline") => Some(false),
            _ => None,
        }
    }

    /// Gets an optional string from the payload.
    #[inline]
    fn get_optional_string(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Gets an optional u64 from the payload.
    #[inline]
    fn get_optional_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
