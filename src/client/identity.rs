//! Client identity announced during the handshake.

// ============================================================================
// Constants
// ============================================================================

/// Role requested when none is configured.
pub const DEFAULT_ROLE: &str = "operator";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: [&str; 2] = ["operator.read", "operator.write"];

/// Client mode announced when none is configured.
pub const DEFAULT_MODE: &str = "ui";

// ============================================================================
// ClientIdentity
// ============================================================================

/// Who this client is, as told to the gateway in `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client application ID.
    pub client_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Client version.
    pub version: String,
    /// Platform tag (`linux`, `ios`, ...).
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Per-install instance ID.
    pub instance_id: Option<String>,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// UI locale.
    pub locale: Option<String>,
    /// Persistent device ID.
    pub device_id: Option<String>,
}

impl ClientIdentity {
    /// Creates an operator identity for `client_id` at `version`.
    ///
    /// The display name defaults to the client ID and the platform to the
    /// host OS.
    #[must_use]
    pub fn new(client_id: impl Into<String>, version: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            display_name: client_id.clone(),
            client_id,
            version: version.into(),
            platform: std::env::consts::OS.to_string(),
            mode: DEFAULT_MODE.to_string(),
            instance_id: None,
            role: DEFAULT_ROLE.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            locale: None,
            device_id: None,
        }
    }

    /// Sets the display name.
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the platform tag.
    #[inline]
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Sets the client mode.
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Sets the instance ID.
    #[inline]
    #[must_use]
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Sets the requested role.
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Replaces the requested scopes.
    #[inline]
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the locale.
    #[inline]
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the device ID.
    #[inline]
    #[must_use]
    pub fn with_device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

// ============================================================================
// Tests
// ============================================================================
