//! Request/response correlation.
//!
//! The [`Correlator`] maps outstanding request IDs to the callers waiting
//! on them. Entries are registered before the request is transmitted, so
//! a fast response can never arrive ahead of its entry.
//!
//! An entry leaves the table exactly once, by one of:
//!
//! - a matching response (`ok` → payload, `!ok` → [`Error::RequestRejected`])
//! - an explicit rejection (send failure, state change)
//! - the caller's deadline or abandonment ([`Error::RequestTimeout`])
//! - connection loss, which rejects every entry at once

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, RequestIdGenerator};
use crate::protocol::Response;

// ============================================================================
// Types
// ============================================================================

/// Single-assignment result slot of a pending request.
pub type ResultSlot = oneshot::Receiver<Result<Value>>;

/// An outstanding request.
struct PendingRequest {
    /// Method name, for logging.
    method: String,
    /// When the entry was registered.
    submitted_at: Instant,
    /// Completes the caller's wait.
    slot: oneshot::Sender<Result<Value>>,
}

/// Map of request IDs to pending requests.
type PendingMap = FxHashMap<RequestId, PendingRequest>;

// ============================================================================
// Correlator
// ============================================================================

/// Table of in-flight requests shared by every caller.
///
/// All mutations happen under one lock.
pub struct Correlator {
    /// Request ID source.
    ids: RequestIdGenerator,
    /// Outstanding requests.
    pending: Mutex<PendingMap>,
    /// Maximum outstanding requests.
    max_pending: usize,
}

impl Correlator {
    /// Creates an empty table.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            ids: RequestIdGenerator::new(),
            pending: Mutex::new(PendingMap::default()),
            max_pending,
        }
    }

    /// Returns a fresh request ID for `method`.
    #[inline]
    pub fn next_id(&self, method: &str) -> RequestId {
        self.ids.next(method)
    }

    /// Registers a pending request and returns its result slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the table is full or `id` is
    /// already pending.
    pub fn register(&self, id: RequestId, method: &str) -> Result<ResultSlot> {
        let mut pending = self.pending.lock();

        if pending.len() >= self.max_pending {
            warn!(
                pending = pending.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::protocol(format!(
                "Too many pending requests: {}/{}",
                pending.len(),
                self.max_pending
            )));
        }

        if pending.contains_key(&id) {
            return Err(Error::protocol(format!("Request {id} is already pending")));
        }

        let (slot, rx) = oneshot::channel();
        trace!(%id, method, "Request registered");
        pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                submitted_at: Instant::now(),
                slot,
            },
        );

        Ok(rx)
    }

    /// Completes the entry matching `response.id`.
    ///
    /// Returns `false` (and does nothing else) when no entry matches.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(entry) = self.pending.lock().remove(&response.id) else {
            debug!(id = %response.id, "Response for unknown request");
            return false;
        };

        debug!(
            id = %response.id,
            method = %entry.method,
            ok = response.ok,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            "Response received"
        );
        let _ = entry.slot.send(response.into_result());
        true
    }

    /// Rejects one entry with `error`.
    ///
    /// Returns `false` when no entry matches.
    pub fn reject(&self, id: &RequestId, error: Error) -> bool {
        match self.pending.lock().remove(id) {
            Some(entry) => {
                debug!(%id, method = %entry.method, error = %error, "Request rejected");
                let _ = entry.slot.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Removes an entry without completing it.
    ///
    /// Used when the caller stops waiting; the server-side operation is
    /// not cancelled.
    pub fn remove(&self, id: &RequestId) -> bool {
        let removed = self.pending.lock().remove(id).is_some();
        if removed {
            debug!(%id, "Removed abandoned request");
        }
        removed
    }

    /// Rejects every entry with an error built by `make_error` and clears
    /// the table. Returns the number of rejected requests.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            let _ = entry.slot.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Waits for the result of `id` for at most `deadline`.
    ///
    /// The entry is removed if the deadline elapses or if the returned
    /// future is dropped before completion.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the deadline elapsed
    /// - [`Error::RequestRejected`] if the gateway answered `ok: false`
    /// - whatever error the entry was rejected with
    pub async fn wait(&self, id: RequestId, slot: ResultSlot, deadline: Duration) -> Result<Value> {
        let mut guard = PendingGuard {
            correlator: self,
            id: Some(id),
        };

        let outcome = timeout(deadline, slot).await;
        let id = guard.disarm();

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::transport("request dropped before completion")),
            Err(_) => {
                self.remove(&id);
                Err(Error::request_timeout(id, deadline.as_millis() as u64))
            }
        }
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Removes the entry if the waiting future is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: Option<RequestId>,
}

impl PendingGuard<'_> {
    /// Takes the ID so drop does nothing.
    fn disarm(&mut self) -> RequestId {
        self.id.take().unwrap_or_else(|| RequestId::new(""))
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.correlator.remove(&id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_success() {
        let correlator = Correlator::new(8);
        let id = correlator.next_id("chat.send");
        let slot = correlator.register(id.clone(), "chat.send").expect("register");

        assert!(correlator.resolve(Response::success(id.clone(), json!({ "text": "hi" }))));
        let value = correlator
            .wait(id, slot, Duration::from_secs(1))
            .await
            .expect("resolved");
        assert_eq!(value["text"], "hi");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_rejection() {
        let correlator = Correlator::new(8);
        let id = correlator.next_id("chat.send");
        let slot = correlator.register(id.clone(), "chat.send").expect("register");

        correlator.resolve(Response::failure(id.clone(), "agent offline"));
        let err = correlator
            .wait(id, slot, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestRejected { ref message, .. } if message == "agent offline"));
    }

    #[test]
    fn test_unknown_response_ignored() {
        let correlator = Correlator::new(8);
        let id = correlator.next_id("chat.send");
        let _slot = correlator.register(id.clone(), "chat.send").expect("register");

        assert!(!correlator.resolve(Response::success(RequestId::from("chat-99"), json!({}))));
        assert!(correlator.contains(&id));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let correlator = Correlator::new(8);
        let id = correlator.next_id("chat.send");
        let slot = correlator.register(id.clone(), "chat.send").expect("register");

        let err = correlator
            .wait(id.clone(), slot, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }));
        assert!(!correlator.contains(&id));

        // Late response is a no-op.
        assert!(!correlator.resolve(Response::success(id, json!({ "text": "late" }))));
    }

    #[tokio::test]
    async fn test_abandoned_wait_removes_entry() {
        let correlator = Correlator::new(8);
        let id = correlator.next_id("chat.send");
        let slot = correlator.register(id.clone(), "chat.send").expect("register");

        {
            let wait = correlator.wait(id.clone(), slot, Duration::from_secs(60));
            let _ = timeout(Duration::from_millis(5), wait).await;
        }
        assert!(!correlator.contains(&id));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_everything() {
        let correlator = Correlator::new(8);
        let mut waits = Vec::new();
        for _ in 0..3 {
            let id = correlator.next_id("chat.send");
            let slot = correlator.register(id.clone(), "chat.send").expect("register");
            waits.push((id, slot));
        }

        assert_eq!(correlator.fail_all(|| Error::transport("connection lost")), 3);
        assert_eq!(correlator.pending_count(), 0);

        for (id, slot) in waits {
            let err = correlator
                .wait(id, slot, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::TransportFailure { .. }));
        }
    }

    #[test]
    fn test_register_limits() {
        let correlator = Correlator::new(1);
        let first = correlator.next_id("a");
        let _slot = correlator.register(first.clone(), "a").expect("register");

        assert!(correlator.register(first, "a").is_err());
        assert!(correlator.register(correlator.next_id("a"), "a").is_err());
    }

    #[test]
    fn test_reject_single() {
        let correlator = Correlator::new(8);
        let a = correlator.next_id("a");
        let b = correlator.next_id("a");
        let _sa = correlator.register(a.clone(), "a").expect("register");
        let _sb = correlator.register(b.clone(), "a").expect("register");

        assert!(correlator.reject(&a, Error::NotConnected));
        assert!(!correlator.reject(&a, Error::NotConnected));
        assert!(correlator.contains(&b));
    }
}
