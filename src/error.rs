//! Error types for the gateway client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use agent_gateway::{Gateway, Result};
//!
//! async fn example(gateway: &Gateway) -> Result<()> {
//!     let reply = gateway.send("hello").await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Url`] |
//! | Connection | [`Error::TransportFailure`], [`Error::ConnectionTimeout`], [`Error::NotConnected`], [`Error::HandshakeRejected`] |
//! | Protocol | [`Error::Decode`], [`Error::Protocol`] |
//! | Request | [`Error::RequestRejected`], [`Error::RequestTimeout`] |
//! | External | [`Error::Json`], [`Error::ChannelClosed`] |
//!
//! No variant is fatal to the process. Connection-level failures are
//! recovered by reconnecting; request-level failures affect only the
//! request that produced them.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when gateway configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Gateway URL could not be parsed.
    #[error("Invalid gateway URL: {0}")]
    Url(#[from] url::ParseError),

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Socket-level failure.
    ///
    /// Fails every pending request and moves the connection state
    /// machine to `Reconnecting` or `Error`.
    #[error("Transport failure: {message}")]
    TransportFailure {
        /// Description of the transport failure.
        message: String,
    },

    /// The gateway rejected the `connect` handshake.
    #[error("Handshake rejected: {message}")]
    HandshakeRejected {
        /// Message supplied by the gateway.
        message: String,
    },

    /// Connection was not established within the deadline.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A request was attempted while not connected.
    #[error("Not connected")]
    NotConnected,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed inbound frame.
    ///
    /// Logged and dropped by the connection; never fatal.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// Protocol violation or unexpected payload shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The gateway answered a request with `ok: false`.
    #[error("Request {request_id} rejected: {message}")]
    RequestRejected {
        /// The rejected request ID.
        request_id: RequestId,
        /// Error code supplied by the gateway, if any.
        code: Option<String>,
        /// Error message supplied by the gateway.
        message: String,
    },

    /// No response arrived before the caller's deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport failure error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(message: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a request rejected error.
    #[inline]
    pub fn request_rejected(
        request_id: RequestId,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RequestRejected {
            request_id,
            code,
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. }
                | Self::HandshakeRejected { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotConnected
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry, possibly after reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotConnected
                | Self::RequestTimeout { .. }
        )
    }

    /// Translates the error into a single message suitable for end users.
    ///
    /// Internal detail (request IDs, codec messages) is left out.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { .. } | Self::Url(_) => {
                "The gateway is not configured correctly. Check the gateway URL and token."
                    .to_string()
            }
            Self::HandshakeRejected { message } => {
                format!("The gateway refused the connection: {message}")
            }
            Self::TransportFailure { .. } | Self::ChannelClosed(_) => {
                "Lost connection to the gateway. Reconnecting…".to_string()
            }
            Self::ConnectionTimeout { .. } | Self::NotConnected => {
                "Could not reach the gateway. Please try again.".to_string()
            }
            Self::RequestTimeout { .. } => {
                "The agent took too long to answer. Please try again.".to_string()
            }
            Self::RequestRejected { message, .. } => format!("The agent reported an error: {message}"),
            Self::Decode { .. } | Self::Protocol { .. } | Self::Json(_) => {
                "Received an unexpected reply from the gateway.".to_string()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transport("socket reset");
        assert_eq!(err.to_string(), "Transport failure: socket reset");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing gateway url");
        assert_eq!(err.to_string(), "Configuration error: missing gateway url");
    }

    #[test]
    fn test_request_rejected_display() {
        let err = Error::request_rejected(RequestId::from("chat-3"), None, "quota exceeded");
        assert_eq!(err.to_string(), "Request chat-3 rejected: quota exceeded");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(RequestId::from("chat-1"), 1);
        let other_err = Error::NotConnected;

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::transport("x").is_connection_error());
        assert!(Error::handshake_rejected("bad token").is_connection_error());
        assert!(Error::NotConnected.is_connection_error());
        assert!(!Error::decode("x").is_connection_error());
        assert!(!Error::request_timeout(RequestId::from("a-1"), 5).is_connection_error());
    }

    #[test]
    fn test_socket_failure_maps_to_transport_failure() {
        let err = Error::transport("IO error: Connection refused (os error 111)");
        assert!(err.is_connection_error());
        assert!(err.is_recoverable());
        assert_eq!(err.user_message(), "Lost connection to the gateway. Reconnecting…");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::transport("x").is_recoverable());
        assert!(Error::request_timeout(RequestId::from("a-1"), 5).is_recoverable());
        assert!(!Error::handshake_rejected("bad token").is_recoverable());
        assert!(!Error::config("x").is_recoverable());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = Error::request_timeout(RequestId::from("chat-42"), 120_000);
        let message = err.user_message();
        assert!(!message.contains("chat-42"));
        assert!(message.contains("too long"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
