//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers keep request IDs, session keys and idempotency tokens
//! from being mixed up at compile time. All of them serialize as plain
//! strings (or numbers, for [`SubscriptionId`]).
//!
//! | Type | Format | Source |
//! |------|--------|--------|
//! | [`RequestId`] | `<prefix>-<counter>` | [`RequestIdGenerator`] |
//! | [`SessionKey`] | caller-chosen | caller |
//! | [`IdempotencyKey`] | UUID v4 | [`IdempotencyKey::generate`] |
//! | [`SubscriptionId`] | process-wide counter | [`SubscriptionId::next`] |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Opaque identifier correlating a request with its response.
///
/// Responses are matched to requests solely by equality of this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request ID from an arbitrary string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for RequestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// RequestIdGenerator
// ============================================================================

/// Issues request IDs as `<method-prefix>-<counter>`.
///
/// The prefix is the method name up to its first `.` (`chat.send` → `chat`).
/// Each prefix has its own monotonic counter starting at 1, so IDs are
/// unique for the lifetime of the generator.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counters: Mutex<FxHashMap<String, u64>>,
}

impl RequestIdGenerator {
    /// Creates a generator with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh ID for `method`.
    pub fn next(&self, method: &str) -> RequestId {
        let prefix = Self::prefix(method);
        let mut counters = self.counters.lock();
        let counter = counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        RequestId(format!("{prefix}-{counter}"))
    }

    /// Extracts the ID prefix for a method name.
    #[inline]
    fn prefix(method: &str) -> &str {
        match method.split('.').next() {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => "req",
        }
    }
}

// ============================================================================
// SessionKey
// ============================================================================

/// Partitions server-side conversational context.
///
/// Attached to every chat-style request. Independent of the connection:
/// any number of session keys may share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key used when the caller does not pick one.
    pub const MAIN: &'static str = "main";

    /// Creates a session key.
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the default `main` session key.
    #[inline]
    #[must_use]
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ============================================================================
// IdempotencyKey
// ============================================================================

/// Token letting the gateway detect a retried send as a duplicate.
///
/// Generate one per logical user action and reuse it across retries of
/// that action for at-most-once delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generates a fresh random key.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Global counter for subscription IDs.
static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle for an event subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returns the next process-unique subscription ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_uses_method_prefix() {
        let ids = RequestIdGenerator::new();
        assert_eq!(ids.next("connect").as_str(), "connect-1");
        assert_eq!(ids.next("chat.send").as_str(), "chat-1");
        assert_eq!(ids.next("chat.history").as_str(), "chat-2");
        assert_eq!(ids.next("connect").as_str(), "connect-2");
    }

    #[test]
    fn test_generator_empty_method() {
        let ids = RequestIdGenerator::new();
        assert_eq!(ids.next("").as_str(), "req-1");
        assert_eq!(ids.next(".odd").as_str(), "req-2");
    }

    #[test]
    fn test_request_id_serializes_as_string() {
        let id = RequestId::from("chat-7");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), r#""chat-7""#);
    }

    #[test]
    fn test_session_key_default_is_main() {
        assert_eq!(SessionKey::default().as_str(), "main");
        assert_eq!(SessionKey::from("car").to_string(), "car");
    }

    #[test]
    fn test_idempotency_keys_are_unique() {
        let a = IdempotencyKey::generate();
        let b = IdempotencyKey::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_subscription_ids_increase() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert!(b > a);
    }
}
