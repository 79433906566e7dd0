//! Persisted client settings.
//!
//! The gateway URL, the auth token and the device ID live in whatever
//! key/value store the host application uses. [`SettingsStore`] is the
//! seam; [`MemorySettings`] keeps everything in process.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

// ============================================================================
// Keys
// ============================================================================

/// Key of the gateway URL.
pub const KEY_GATEWAY_URL: &str = "gateway.url";

/// Key of the gateway auth token.
pub const KEY_AUTH_TOKEN: &str = "gateway.token";

/// Key of the persistent device ID.
pub const KEY_DEVICE_ID: &str = "device.id";

// ============================================================================
// SettingsStore
// ============================================================================

/// Source of connection settings.
///
/// Lookups return `None` for unset keys. Empty strings count as unset.
pub trait SettingsStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a value.
    fn set(&self, key: &str, value: &str);

    /// Gateway WebSocket URL.
    fn gateway_url(&self) -> Option<String> {
        self.get(KEY_GATEWAY_URL).filter(|v| !v.is_empty())
    }

    /// Gateway auth token.
    fn auth_token(&self) -> Option<String> {
        self.get(KEY_AUTH_TOKEN).filter(|v| !v.is_empty())
    }

    /// Persistent device ID.
    fn device_id(&self) -> Option<String> {
        self.get(KEY_DEVICE_ID).filter(|v| !v.is_empty())
    }

    /// Returns the device ID, generating and storing one on first use.
    fn device_id_or_create(&self) -> String {
        if let Some(id) = self.device_id() {
            return id;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set(KEY_DEVICE_ID, &id);
        id
    }
}

// ============================================================================
// MemorySettings
// ============================================================================

/// In-process [`SettingsStore`].
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<FxHashMap<String, String>>,
}

impl MemorySettings {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, builder-style.
    #[must_use]
    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.values.write().insert(key.to_string(), value.into());
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        let store = MemorySettings::new()
            .with(KEY_GATEWAY_URL, "wss://gw.example:18789")
            .with(KEY_AUTH_TOKEN, "");

        assert_eq!(store.gateway_url().as_deref(), Some("wss://gw.example:18789"));
        assert!(store.auth_token().is_none());
        assert!(store.device_id().is_none());
    }

    #[test]
    fn test_device_id_is_stable() {
        let store = MemorySettings::new();
        let first = store.device_id_or_create();
        let second = store.device_id_or_create();

        assert_eq!(first, second);
        assert_eq!(store.device_id(), Some(first));
    }
}
