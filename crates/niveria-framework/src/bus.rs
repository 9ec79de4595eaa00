//! Capability-change event bus.
//!
//! Single-writer-many-reader fan-out with a commit-order guarantee:
//! [`EventBus::commit`] runs a cache mutation and publishes the events it
//! produced while holding one (re-entrant) ordering lock, so listeners see
//! events in exactly the order changes were committed.
//!
//! | Delivery | Invoked on | Use for |
//! |----------|------------|---------|
//! | [`Delivery::Inline`] | the publishing task, before `publish` returns | cache invalidation, ordering-sensitive logic |
//! | [`Delivery::Background`] | a dedicated dispatcher task, in publish order | slow listeners that must not block capability calls |
//!
//! # Example
//!
//! ```rust,ignore
//! let id = bus.subscribe(Delivery::Background, |event: &CapabilityEvent| {
//!     tracing::info!(%event, "capability changed");
//! });
//! // …later…
//! bus.unsubscribe(id);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use niveria_core::CapabilityEvent;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Identifies a subscription for [`EventBus::unsubscribe`].
pub type SubscriptionId = u64;

/// Receives capability-change events.
///
/// Implemented for any `Fn(&CapabilityEvent) + Send + Sync`.
pub trait CapabilityListener: Send + Sync + 'static {
    /// Handles one event. Must not block on capability calls when inline.
    fn on_event(&self, event: &CapabilityEvent);
}

impl<F> CapabilityListener for F
where
    F: Fn(&CapabilityEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &CapabilityEvent) {
        self(event)
    }
}

/// How a listener is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Synchronously on the publishing task.
    Inline,
    /// Deferred to the bus dispatcher task.
    Background,
}

struct Subscription {
    id: SubscriptionId,
    delivery: Delivery,
    listener: Arc<dyn CapabilityListener>,
}

struct Envelope {
    event: CapabilityEvent,
    listeners: Vec<Arc<dyn CapabilityListener>>,
}

/// The event bus. Shared as `Arc<EventBus>`.
pub struct EventBus {
    order: ReentrantMutex<()>,
    subscribers: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    background: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            order: ReentrantMutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            background: Mutex::new(None),
        }
    }

    // ─── Subscriptions ───────────────────────────────────────────────────────

    /// Registers a listener.
    ///
    /// Background delivery needs a Tokio runtime to host the dispatcher
    /// task; outside one the listener is demoted to inline delivery.
    pub fn subscribe<L>(&self, delivery: Delivery, listener: L) -> SubscriptionId
    where
        L: CapabilityListener,
    {
        let delivery = match delivery {
            Delivery::Background if !self.ensure_dispatcher() => {
                warn!("No async runtime for background delivery, listener will run inline");
                Delivery::Inline
            }
            other => other,
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscription {
            id,
            delivery,
            listener: Arc::new(listener),
        });
        trace!(subscription = id, ?delivery, "Listener subscribed");
        id
    }

    /// Returns a channel receiving every event published after this call.
    ///
    /// The forwarding listener drops events silently once the receiver is
    /// gone; call [`unsubscribe`](Self::unsubscribe) to detach it.
    pub fn stream(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<CapabilityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Delivery::Inline, move |event: &CapabilityEvent| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Removes a listener. Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    // ─── Publishing ──────────────────────────────────────────────────────────

    /// Publishes one event.
    pub fn publish(&self, event: CapabilityEvent) {
        let _order = self.order.lock();
        self.dispatch(event);
    }

    /// Runs `commit` and publishes the events it pushed, atomically with
    /// respect to every other commit and publish on this bus.
    pub fn commit<F, R>(&self, commit: F) -> R
    where
        F: FnOnce(&mut Vec<CapabilityEvent>) -> R,
    {
        let _order = self.order.lock();
        let mut events = Vec::new();
        let result = commit(&mut events);
        for event in events {
            self.dispatch(event);
        }
        result
    }

    fn dispatch(&self, event: CapabilityEvent) {
        let (inline, background): (Vec<_>, Vec<_>) = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .map(|s| (s.delivery, Arc::clone(&s.listener)))
                .partition(|(delivery, _)| *delivery == Delivery::Inline)
        };

        trace!(event = %event, inline = inline.len(), background = background.len(), "Publishing");

        for (_, listener) in &inline {
            listener.on_event(&event);
        }

        if !background.is_empty() {
            let envelope = Envelope {
                event,
                listeners: background.into_iter().map(|(_, l)| l).collect(),
            };
            if let Some(tx) = self.background.lock().as_ref()
                && tx.send(envelope).is_err()
            {
                warn!("Background dispatcher stopped, event dropped for background listeners");
            }
        }
    }

    /// Starts the background dispatcher on first use.
    fn ensure_dispatcher(&self) -> bool {
        let mut slot = self.background.lock();
        if slot.is_some() {
            return true;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        handle.spawn(async move {
            while let Some(envelope) = rx.recv().await {
                for listener in &envelope.listeners {
                    listener.on_event(&envelope.event);
                }
            }
        });
        *slot = Some(tx);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_core::{CapabilityKind, EntityKey};
    use std::sync::atomic::AtomicUsize;

    fn invalidated(n: u128) -> CapabilityEvent {
        CapabilityEvent::RecordInvalidated {
            key: EntityKey::new(uuid::Uuid::from_u128(n)),
            kind: CapabilityKind::Permissions,
        }
    }

    #[test]
    fn test_inline_listeners_see_commit_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(Delivery::Inline, move |e: &CapabilityEvent| {
            sink.lock().push(e.clone());
        });

        bus.commit(|events| {
            events.push(invalidated(1));
            events.push(invalidated(2));
        });
        bus.publish(invalidated(3));

        let seen = seen.lock();
        assert_eq!(*seen, vec![invalidated(1), invalidated(2), invalidated(3)]);
    }

    #[test]
    fn test_listener_may_publish_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let weak = Arc::downgrade(&bus);
        let counter = Arc::clone(&count);
        bus.subscribe(Delivery::Inline, move |e: &CapabilityEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            if *e == invalidated(1)
                && let Some(bus) = weak.upgrade()
            {
                bus.publish(invalidated(2));
            }
        });

        bus.publish(invalidated(1));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = bus.subscribe(Delivery::Inline, move |_: &CapabilityEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(invalidated(1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(invalidated(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_background_delivery_preserves_order() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(Delivery::Background, move |e: &CapabilityEvent| {
            let _ = tx.send(e.clone());
        });

        for n in 0..5 {
            bus.publish(invalidated(n));
        }
        for n in 0..5 {
            assert_eq!(rx.recv().await, Some(invalidated(n)));
        }
    }

    #[tokio::test]
    async fn test_stream_receives_events() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.stream();
        bus.publish(invalidated(7));
        assert_eq!(rx.recv().await, Some(invalidated(7)));
    }
}
