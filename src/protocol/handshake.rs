//! Handshake message shapes.
//!
//! After the transport opens, the gateway sends `connect.challenge`. The
//! client answers with exactly one `connect` request built from
//! [`ConnectParams`]; the gateway replies with a `hello-ok` payload.
//!
//! ```text
//! gateway → {"type":"event","event":"connect.challenge","payload":{"nonce":..}}
//! client  → {"type":"req","id":"connect-1","method":"connect","params":{...}}
//! gateway → {"type":"res","id":"connect-1","ok":true,"payload":{"type":"hello-ok",...}}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientIdentity;

// ============================================================================
// Constants
// ============================================================================

/// The single protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 3;

/// Handshake method name.
pub const METHOD_CONNECT: &str = "connect";

/// Payload discriminator of a successful handshake.
pub const HELLO_OK: &str = "hello-ok";

// ============================================================================
// ConnectParams
// ============================================================================

/// Parameters of the `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest acceptable protocol version.
    pub min_protocol: u32,
    /// Highest acceptable protocol version.
    pub max_protocol: u32,
    /// Client descriptor.
    pub client: ClientInfo,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
    /// UI locale, e.g. `en-US`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Persistent device descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

impl ConnectParams {
    /// Builds handshake parameters from the client identity.
    #[must_use]
    pub fn new(identity: &ClientIdentity, token: Option<&str>) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: identity.client_id.clone(),
                display_name: identity.display_name.clone(),
                version: identity.version.clone(),
                platform: identity.platform.clone(),
                mode: identity.mode.clone(),
                instance_id: identity.instance_id.clone(),
            },
            role: identity.role.clone(),
            scopes: identity.scopes.clone(),
            auth: token
                .filter(|t| !t.is_empty())
                .map(|t| ConnectAuth {
                    token: t.to_string(),
                }),
            locale: identity.locale.clone(),
            device: identity
                .device_id
                .as_ref()
                .map(|id| DeviceInfo { id: id.clone() }),
        }
    }
}

/// `client` block of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client application ID.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Semantic version.
    pub version: String,
    /// Platform tag.
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Per-install instance ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// `auth` block of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAuth {
    /// Gateway token.
    pub token: String,
}

/// `device` block of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Persistent device ID.
    pub id: String,
}

// ============================================================================
// HelloOk
// ============================================================================

/// Successful handshake payload.
///
/// Only `type` is required; everything else is optional so older and
/// newer gateways both parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    /// Always `hello-ok`.
    #[serde(rename = "type")]
    pub hello_type: String,
    /// Negotiated protocol version.
    #[serde(default)]
    pub protocol: Option<u32>,
    /// Server descriptor.
    #[serde(default)]
    pub server: Option<ServerInfo>,
    /// Connection policy.
    #[serde(default)]
    pub policy: Option<Policy>,
}

impl HelloOk {
    /// Parses a handshake response payload.
    ///
    /// Returns `None` unless the payload's `type` is `hello-ok`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if payload.get("type").and_then(Value::as_str) != Some(HELLO_OK) {
            return None;
        }
        serde_json::from_value(payload.clone()).ok()
    }

    /// Returns the server-assigned connection ID.
    #[inline]
    #[must_use]
    pub fn conn_id(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.conn_id.as_deref())
    }

    /// Returns the advertised heartbeat interval in milliseconds.
    #[inline]
    #[must_use]
    pub fn tick_interval_ms(&self) -> Option<u64> {
        self.policy.as_ref().and_then(|p| p.tick_interval_ms)
    }
}

/// Server descriptor in `hello-ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Gateway version.
    #[serde(default)]
    pub version: Option<String>,
    /// Gateway host name.
    #[serde(default)]
    pub host: Option<String>,
    /// Connection ID.
    #[serde(default)]
    pub conn_id: Option<String>,
}

/// Connection policy in `hello-ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Maximum frame size in bytes.
    #[serde(default)]
    pub max_payload: Option<u64>,
    /// Heartbeat interval in milliseconds.
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
}

// ============================================================================
// Tests
// ============================================================================
