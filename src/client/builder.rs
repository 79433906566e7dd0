//! Builder pattern for gateway configuration.
//!
//! Provides a fluent API for configuring and creating [`Gateway`] instances.
//!
//! # Example
//!
//! ```no_run
//! use agent_gateway::{ClientIdentity, Gateway};
//!
//! # async fn example() -> agent_gateway::Result<()> {
//! let gateway = Gateway::builder()
//!     .url("ws://127.0.0.1:18789")
//!     .token("secret")
//!     .identity(ClientIdentity::new("carplay", "1.0.0"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionKey;
use crate::session::Gateway;
use crate::settings::SettingsStore;

use super::core::GatewayClient;
use super::identity::ClientIdentity;
use super::options::GatewayOptions;

// ============================================================================
// GatewayBuilder
// ============================================================================

/// Builder for configuring a [`Gateway`] instance.
///
/// Use [`Gateway::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct GatewayBuilder {
    /// Gateway WebSocket URL.
    url: Option<String>,
    /// Auth token.
    token: Option<String>,
    /// Client identity.
    identity: Option<ClientIdentity>,
    /// Device ID read from settings.
    device_id: Option<String>,
    /// Tuning.
    options: GatewayOptions,
    /// Initial default session.
    session_key: Option<SessionKey>,
}

// ============================================================================
// GatewayBuilder Implementation
// ============================================================================

impl GatewayBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gateway URL (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the auth token.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the client identity.
    #[inline]
    #[must_use]
    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the tuning options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the initial default session key.
    #[inline]
    #[must_use]
    pub fn session_key(mut self, key: impl Into<SessionKey>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Fills URL and token from `store` where not already set, and takes
    /// the store's device ID (creating one if needed).
    #[must_use]
    pub fn settings(mut self, store: &dyn SettingsStore) -> Self {
        if self.url.is_none() {
            self.url = store.gateway_url();
        }
        if self.token.is_none() {
            self.token = store.auth_token();
        }
        self.device_id = Some(store.device_id_or_create());
        self
    }

    /// Builds the gateway with validation.
    ///
    /// The gateway connects lazily, on the first call that needs it.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is missing or not `ws`/`wss`
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] if an option is invalid
    /// - [`Error::Config`] if called outside a Tokio runtime
    pub fn build(self) -> Result<Gateway> {
        let url = self.validate_url()?;
        self.options.validate()?;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config(
                "Gateway::build() must be called within a Tokio runtime",
            ));
        }

        let mut identity = self.identity.unwrap_or_default();
        if identity.device_id.is_none() {
            identity.device_id = self.device_id;
        }

        debug!(url = %url, client_id = %identity.client_id, "Building gateway client");

        let client = GatewayClient::spawn(url, self.token, identity, self.options.clone());
        Ok(Gateway::new(
            client,
            self.options,
            self.session_key.unwrap_or_default(),
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl GatewayBuilder {
    /// Validates the URL configuration.
    fn validate_url(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            Error::config(
                "Gateway URL is required. Use .url() or .settings() to set it.\n\
                 Example: Gateway::builder().url(\"ws://127.0.0.1:18789\")",
            )
        })?;

        let url = Url::parse(raw.trim())?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "Gateway URL must use ws:// or wss://, got '{other}://'"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
