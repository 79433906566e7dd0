//! Event fan-out to subscribers.
//!
//! Subscribers register with an [`EventFilter`] and receive every matching
//! event either through a callback or through an unbounded channel.
//! Events with no matching subscriber are dropped.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::identifiers::SubscriptionId;
use crate::protocol::Event;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for matching events.
///
/// Runs on the connection's processing task; keep it short. A panic is
/// caught and logged, and the event still reaches the other subscribers.
/// Builds with `panic = "abort"` still abort the process.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    All,
    /// Events with exactly this name.
    Name(String),
    /// Events in this namespace (`chat` matches `chat` and `chat.chunk`).
    Prefix(String),
}

impl EventFilter {
    /// Filter on an exact event name.
    #[inline]
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Filter on an event namespace.
    #[inline]
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Returns `true` if an event named `event_name` passes the filter.
    #[must_use]
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Name(name) => name == event_name,
            Self::Prefix(prefix) => event_name
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.')),
        }
    }
}

/// Where matching events go.
#[derive(Clone)]
enum Sink {
    Callback(EventHandler),
    Channel(mpsc::UnboundedSender<Event>),
}

/// A registered subscriber.
#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    sink: Sink,
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Registry of event subscribers.
///
/// Delivery happens outside the registry lock, so handlers may subscribe
/// or unsubscribe without deadlocking.
#[derive(Default)]
pub struct EventDispatcher {
    /// Subscribers in registration order.
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for events passing `filter`.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(filter, Sink::Callback(Arc::new(handler)))
    }

    /// Registers a channel for events passing `filter`.
    ///
    /// The subscription is dropped automatically once the receiver is
    /// dropped.
    pub fn subscribe_channel(
        &self,
        filter: EventFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.insert(filter, Sink::Channel(tx)), rx)
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        let removed = subscriptions.len() != before;

        if removed {
            debug!(%id, "Unsubscribed");
        }
        removed
    }

    /// Returns the number of subscriptions.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Delivers `event` to every matching subscriber.
    ///
    /// Returns the number of subscribers it reached.
    pub fn dispatch(&self, event: &Event) -> usize {
        let targets: Vec<Subscription> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.filter.matches(event.name()))
            .cloned()
            .collect();

        if targets.is_empty() {
            trace!(event = %event.name(), "No subscribers for event");
            return 0;
        }

        let mut delivered = 0;
        let mut closed = Vec::new();

        for subscription in targets {
            match &subscription.sink {
                Sink::Callback(handler) => {
                    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_ok() {
                        delivered += 1;
                    } else {
                        warn!(id = %subscription.id, event = %event.name(), "Event handler panicked");
                    }
                }
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(subscription.id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.subscriptions
                .write()
                .retain(|s| !closed.contains(&s.id));
            debug!(count = closed.len(), "Pruned closed event channels");
        }

        trace!(event = %event.name(), delivered, "Event dispatched");
        delivered
    }

    fn insert(&self, filter: EventFilter, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId::next();
        debug!(%id, ?filter, "Subscribed");
        self.subscriptions.write().push(Subscription { id, filter, sink });
        id
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    #[test]
    fn test_filter_matching() {
        assert!(EventFilter::All.matches("anything"));
        assert!(EventFilter::name("chat").matches("chat"));
        assert!(!EventFilter::name("chat").matches("chat.chunk"));
        assert!(EventFilter::prefix("chat").matches("chat"));
        assert!(EventFilter::prefix("chat").matches("chat.chunk"));
        assert!(!EventFilter::prefix("chat").matches("chatter"));
        assert!(!EventFilter::prefix("chat").matches("agent"));
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(EventFilter::All, |_| panic!("handler bug"));
        let counter = Arc::clone(&hits);
        dispatcher.subscribe(EventFilter::All, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&Event::new("agent", json!({}))), 1);
        assert_eq!(dispatcher.dispatch(&Event::new("agent", json!({}))), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.subscriber_count(), 2);
    }

    #[test]
    fn test_callback_delivery() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        dispatcher.subscribe(EventFilter::name("agent"), move |event| {
            assert_eq!(event.name(), "agent");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&Event::new("agent", json!({}))), 1);
        assert_eq!(dispatcher.dispatch(&Event::new("presence", json!({}))), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_delivery_and_pruning() {
        let dispatcher = EventDispatcher::new();
        let (_, mut rx) = dispatcher.subscribe_channel(EventFilter::All);

        dispatcher.dispatch(&Event::new("tick", json!({ "ts": 1 })));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.name(), "tick");

        drop(rx);
        assert_eq!(dispatcher.dispatch(&Event::new("tick", json!({}))), 0);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let dispatcher = EventDispatcher::new();
        let id = dispatcher.subscribe(EventFilter::All, |_| {});

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert_eq!(dispatcher.dispatch(&Event::new("tick", json!({}))), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let slot = Arc::new(parking_lot::Mutex::new(None::<SubscriptionId>));

        let inner = Arc::clone(&dispatcher);
        let own_id = Arc::clone(&slot);
        let id = dispatcher.subscribe(EventFilter::All, move |_| {
            if let Some(id) = *own_id.lock() {
                inner.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        assert_eq!(dispatcher.dispatch(&Event::new("tick", json!({}))), 1);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
