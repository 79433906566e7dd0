//! Connection and request tuning.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use agent_gateway::GatewayOptions;
//!
//! let options = GatewayOptions::new()
//!     .with_reconnect_delay(Duration::from_secs(2))
//!     .with_chat_timeout(Duration::from_secs(60));
//!
//! assert!(options.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::TransportOptions;

// ============================================================================
// Constants
// ============================================================================

/// Default delay before an automatic reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default WebSocket dial timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time allowed from dial start until `Connected`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default protocol ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for control requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for `chat.send`.
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default maximum number of in-flight requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 256;

// ============================================================================
// GatewayOptions
// ============================================================================

/// Timeouts, reconnect policy and limits of a gateway client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Reconnect automatically after losing an established connection.
    pub reconnect: bool,

    /// Delay before the automatic reconnect.
    pub reconnect_delay: Duration,

    /// WebSocket dial timeout.
    pub connect_timeout: Duration,

    /// Deadline from `Connecting` until `Connected`.
    pub handshake_timeout: Duration,

    /// Protocol ping interval.
    pub ping_interval: Duration,

    /// Timeout for control requests (`chat.history`, `chat.abort`, ...).
    pub request_timeout: Duration,

    /// Timeout for `chat.send`.
    pub chat_timeout: Duration,

    /// Maximum number of in-flight requests.
    pub max_pending_requests: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl GatewayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chat_timeout: DEFAULT_CHAT_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl GatewayOptions {
    /// Disables automatic reconnect.
    #[inline]
    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }

    /// Sets the automatic reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the WebSocket dial timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the control request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the `chat.send` timeout.
    #[inline]
    #[must_use]
    pub fn with_chat_timeout(mut self, timeout: Duration) -> Self {
        self.chat_timeout = timeout;
        self
    }

    /// Sets the in-flight request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl GatewayOptions {
    /// Checks that every duration and limit is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("ping_interval", self.ping_interval),
            ("request_timeout", self.request_timeout),
            ("chat_timeout", self.chat_timeout),
        ];

        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if self.max_pending_requests == 0 {
            return Err(Error::config("max_pending_requests must be at least 1"));
        }

        Ok(())
    }

    /// Socket-level subset of the options.
    #[inline]
    #[must_use]
    pub(crate) fn transport(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: self.connect_timeout,
            ping_interval: self.ping_interval,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
