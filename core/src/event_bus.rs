//! # Event Bus
//!
//! A single process-wide publish/subscribe dispatcher. The Round Driver does
//! not know the repository, the mempool, or the propagators exist; they in
//! turn do not know the Driver exists. The bus is the only thing that couples
//! them, and it couples them asynchronously: `notify` schedules one task per
//! handler and returns as soon as dispatch is scheduled, so a slow or wedged
//! handler can never block the publisher.

use crate::model::{Event, EventType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A one-shot handle returned by `subscribe`. Re-subscribing always yields a
/// distinct handle, even for the same handler and event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscriber(u64);

/// `Some(event)` on a targeted `notify`, `None` on `notify_all` — mirrors the
/// "nil payload" broadcast the source's event center supports.
pub type Handler = Arc<dyn Fn(Option<&Event>) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("no subscriber has ever registered for this event type")]
    NoSuchType,
    #[error("no subscriber with that handle is registered for this event type")]
    NoSuchSubscriber,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<EventType, Vec<(Subscriber, Handler)>>,
}

/// Cheap to clone: internally an `Arc` around the subscriber registry, so
/// every clone observes the same subscriptions.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
    published_total: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(0)),
            published_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers `handler` under `event_type`. Subscribers of the same type
    /// are an unordered set; insertion order is not observable.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscriber
    where
        F: Fn(Option<&Event>) + Send + Sync + 'static,
    {
        let id = Subscriber(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .write()
            .subscribers
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, event_type: EventType, subscriber: Subscriber) -> Result<(), EventBusError> {
        let mut guard = self.inner.write();
        let handlers = guard.subscribers.get_mut(&event_type).ok_or(EventBusError::NoSuchType)?;
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscriber);
        if handlers.len() == before {
            return Err(EventBusError::NoSuchSubscriber);
        }
        Ok(())
    }

    /// Delivers `event` to every handler registered for its type, each on its
    /// own spawned task. Returns as soon as dispatch is scheduled; handler
    /// panics are caught and logged, never propagated to the publisher.
    pub fn notify(&self, event: Event) -> Result<(), EventBusError> {
        self.published_total.fetch_add(1, Ordering::Relaxed);
        let event_type = event.event_type();
        let handlers = {
            let guard = self.inner.read();
            let handlers = guard.subscribers.get(&event_type).ok_or(EventBusError::NoSuchType)?;
            handlers.iter().map(|(_, h)| h.clone()).collect::<Vec<_>>()
        };
        let event = Arc::new(event);
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                dispatch(&handler, Some(&event));
            });
        }
        Ok(())
    }

    /// `Notify` with a nil payload across every registered type.
    pub fn notify_all(&self) {
        let guard = self.inner.read();
        for handlers in guard.subscribers.values() {
            for (_, handler) in handlers {
                let handler = handler.clone();
                tokio::spawn(async move {
                    dispatch(&handler, None);
                });
            }
        }
    }

    /// Atomically drops every subscription across every event type.
    pub fn unsubscribe_all(&self) {
        self.inner.write().subscribers.clear();
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.inner
            .read()
            .subscribers
            .get(&event_type)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch(handler: &Handler, payload: Option<&Event>) {
    if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
        tracing::error!("event bus handler panicked during dispatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn online(bus: &EventBus) {
        bus.notify(Event::Online).unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(EventType::Online, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        online(&bus);
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let counts: Vec<Arc<AtomicUsize>> = (0..5).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for c in &counts {
            let c = c.clone();
            bus.subscribe(EventType::Online, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        online(&bus);
        settle().await;
        for c in &counts {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = bus.subscribe(EventType::Online, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(EventType::Online, sub).unwrap();
        online(&bus);
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_unknown_type_errors() {
        let bus = EventBus::new();
        assert_eq!(
            bus.unsubscribe(EventType::Online, Subscriber(0)),
            Err(EventBusError::NoSuchType)
        );
    }

    #[test]
    fn unsubscribe_unknown_subscriber_errors() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventType::Online, |_| {});
        bus.unsubscribe(EventType::Online, sub).unwrap();
        assert_eq!(
            bus.unsubscribe(EventType::Online, sub),
            Err(EventBusError::NoSuchSubscriber)
        );
    }

    #[test]
    fn notify_unsubscribed_type_errors_without_side_effect() {
        let bus = EventBus::new();
        assert_eq!(bus.notify(Event::Online), Err(EventBusError::NoSuchType));
    }

    #[tokio::test]
    async fn notify_all_delivers_nil_payload_to_every_type() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(EventType::Online, move |payload| {
            assert!(payload.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(EventType::BlockWithoutTxs, |payload| {
            assert!(payload.is_none());
        });
        bus.notify_all();
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_all_clears_every_type() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(EventType::Online, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe_all();
        assert!(bus.notify(Event::Online).is_err());
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn published_total_counts_every_notify_attempt() {
        let bus = EventBus::new();
        bus.subscribe(EventType::Online, |_| {});
        online(&bus);
        online(&bus);
        assert_eq!(bus.published_total(), 2);
    }

    #[tokio::test]
    async fn handler_panic_does_not_affect_other_subscribers() {
        let bus = EventBus::new();
        bus.subscribe(EventType::Online, |_| panic!("boom"));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.subscribe(EventType::Online, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        online(&bus);
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clone_shares_the_same_subscriber_set() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        clone.subscribe(EventType::Online, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.notify(Event::Online).unwrap();
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
