//! Envelope frames and the text codec.
//!
//! Every WebSocket text message carries exactly one JSON object whose
//! `type` field selects the frame kind:
//!
//! ```text
//! Request:  {"type":"req","id":"<string>","method":"<string>","params":{...}}
//! Response: {"type":"res","id":"<string>","ok":true,"payload":{...}}
//!         | {"type":"res","id":"<string>","ok":false,"error":{"message":"<string>"}}
//! Event:    {"type":"event","event":"<name>","payload":{...}}
//! ```
//!
//! `params` and `payload` stay untyped ([`serde_json::Value`]); concrete
//! shapes are decoded per method by the caller.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Event;

// ============================================================================
// Request
// ============================================================================

/// A method call from client to gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Method name, e.g. `chat.send`.
    pub method: String,

    /// Method parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    /// Creates a request. `Value::Null` params are sent as `{}`.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// The gateway's answer to a [`Request`] with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Whether the request succeeded.
    pub ok: bool,

    /// Result data (if ok).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Error object (if not ok). Usually `{"code": .., "message": ..}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, payload: Value) -> Self {
        Self {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(serde_json::json!({ "message": message.into() })),
        }
    }

    /// Returns the error message, tolerating string or object errors.
    #[must_use]
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            _ => "unknown error".to_string(),
        }
    }

    /// Returns the error code, if the gateway supplied one.
    #[must_use]
    pub fn error_code(&self) -> Option<String> {
        self.error
            .as_ref()
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Extracts the payload, returning an error if the response was not ok.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestRejected`] carrying the gateway's message.
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            return Ok(self.payload.unwrap_or(Value::Null));
        }
        let message = self.error_message();
        let code = self.error_code();
        Err(Error::request_rejected(self.id, code, message))
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// The unit of wire exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Client → gateway method call.
    #[serde(rename = "req")]
    Request(Request),
    /// Gateway → client result.
    #[serde(rename = "res")]
    Response(Response),
    /// Gateway → client unsolicited push.
    #[serde(rename = "event")]
    Event(Event),
}

impl Envelope {
    /// Returns the wire discriminator for this frame.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "req",
            Self::Response(_) => "res",
            Self::Event(_) => "event",
        }
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Serializes an envelope into a text frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parses a text frame into an envelope.
///
/// Only the envelope is validated; `params` and `payload` pass through.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the frame is not a JSON object, has no
/// `type` discriminator, has an unrecognized `type`, or is missing
/// envelope fields.
pub fn decode(text: &str) -> Result<Envelope> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::decode(format!("invalid JSON: {e}")))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => return Err(Error::decode("frame type is not a string")),
        None if value.is_object() => return Err(Error::decode("missing frame type")),
        None => return Err(Error::decode("frame is not a JSON object")),
    };

    let envelope = match kind.as_str() {
        "req" => serde_json::from_value(value).map(Envelope::Request),
        "res" => serde_json::from_value(value).map(Envelope::Response),
        "event" => serde_json::from_value(value).map(Envelope::Event),
        other => return Err(Error::decode(format!("unknown frame type '{other}'"))),
    };

    envelope.map_err(|e| Error::decode(format!("malformed '{kind}' frame: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
