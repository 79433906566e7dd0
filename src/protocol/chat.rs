//! Chat method shapes.
//!
//! Concrete request/response types for the chat methods the session
//! facade calls. The envelope stays untyped; these are decoded from and
//! encoded into its `params` / `payload`.
//!
//! | Method | Params | Payload |
//! |--------|--------|---------|
//! | `chat.send` | [`ChatSendParams`] | `text` or `content` |
//! | `chat.history` | [`ChatHistoryParams`] | [`ChatHistory`] |
//! | `chat.abort` | [`ChatAbortParams`] | ignored |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{IdempotencyKey, SessionKey};

// ============================================================================
// Method Names
// ============================================================================

/// Send a user message and wait for the agent's reply.
pub const METHOD_CHAT_SEND: &str = "chat.send";

/// Fetch recent messages of a session.
pub const METHOD_CHAT_HISTORY: &str = "chat.history";

/// Abort the running reply of a session.
pub const METHOD_CHAT_ABORT: &str = "chat.abort";

// ============================================================================
// chat.send
// ============================================================================

/// Parameters of `chat.send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    /// Conversation the message belongs to.
    pub session_key: SessionKey,
    /// Message text.
    pub text: String,
    /// Token for server-side duplicate detection.
    pub idempotency_key: IdempotencyKey,
}

/// Extracts the reply text from a `chat.send` payload.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the payload carries no text.
pub fn reply_text(payload: &Value) -> Result<String> {
    extract_text(payload)
        .ok_or_else(|| Error::protocol("chat reply carries neither text nor content"))
}

/// Pulls display text out of a reply-like value.
///
/// Looks at, in order: `text`, `content` (string or array of
/// `{"type":"text","text":..}` parts, joined), then `message`.
#[must_use]
pub fn extract_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    match value.get("content") {
        Some(Value::String(text)) => return Some(text.clone()),
        Some(Value::Array(parts)) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect();
            if !texts.is_empty() {
                return Some(texts.concat());
            }
        }
        _ => {}
    }

    value
        .get("message")
        .filter(|message| message.is_object())
        .and_then(extract_text)
}

// ============================================================================
// chat.history
// ============================================================================

/// Parameters of `chat.history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    /// Conversation to read.
    pub session_key: SessionKey,
    /// Maximum number of messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One message of a session's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// `user`, `assistant`, ...
    pub role: String,
    /// Display text (empty for non-text messages).
    pub text: String,
    /// Gateway timestamp (ms), when supplied.
    pub timestamp: Option<u64>,
}

impl ChatMessage {
    /// Returns `true` if the user wrote this message.
    #[inline]
    #[must_use]
    pub fn is_from_user(&self) -> bool {
        self.role == "user"
    }
}

/// Decoded `chat.history` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatHistory {
    /// Messages, oldest first.
    pub messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Decodes a `chat.history` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `messages` is missing or not an array.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let entries = payload
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::protocol("chat history payload has no messages array"))?;

        let messages = entries
            .iter()
            .map(|entry| ChatMessage {
                role: entry
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("assistant")
                    .to_string(),
                text: extract_text(entry).unwrap_or_default(),
                timestamp: entry.get("timestamp").and_then(Value::as_u64),
            })
            .collect();

        Ok(Self { messages })
    }
}

// ============================================================================
// chat.abort
// ============================================================================

/// Parameters of `chat.abort`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbortParams {
    /// Conversation whose run to abort.
    pub session_key: SessionKey,
}

// ============================================================================
// Tests
// ============================================================================
