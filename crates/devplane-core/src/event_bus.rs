//! C2 — Event Bus.
//!
//! In-process publish/subscribe of resource-change notifications. Publishes
//! funnel through a single publisher-side critical section so every
//! subscriber observes the same global, monotonically increasing sequence
//!. Each subscriber owns a bounded `VecDeque` queue rather
//! than a shared `broadcast` channel, because subscribers filter by
//! resource type independently (`broadcast` has no cheap way to do that
//! without every subscriber paying for every event) — the same
//! synthetic-control-signal-interleaved-with-data-events shape this
//! codebase's token manager uses for its own notification channels.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::Notify;

use devplane_types::models::{Event, EventKind, ResourceType, Subscription};

/// Default per-subscriber buffer depth.
pub const DEFAULT_BUFFER: usize = 256;

struct SubscriberQueue {
    subscription: Subscription,
    capacity: usize,
    buffer: Mutex<VecDeque<Event>>,
    notify: Notify,
    lagged: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl SubscriberQueue {
    /// Enqueues `event` if it matches this subscriber's filter. On overflow,
    /// drops the oldest queued event and splices in a single
    /// `RESUBSCRIBE_HINT` marker in its place (never more than one
    /// consecutive hint — repeated overflow just bumps `lagged`).
    fn offer(&self, event: &Event) {
        if !self.subscription.matches(event) {
            return;
        }
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.len() >= self.capacity {
            let dropped_was_hint =
                matches!(buffer.front(), Some(front) if front.kind == EventKind::ResubscribeHint);
            buffer.pop_front();
            self.lagged.fetch_add(1, Ordering::Relaxed);
            if !dropped_was_hint {
                buffer.push_front(resubscribe_hint(event));
            }
        }
        buffer.push_back(event.clone());
        drop(buffer);
        self.notify.notify_one();
    }
}

fn resubscribe_hint(triggering: &Event) -> Event {
    Event {
        sequence: triggering.sequence,
        resource_type: triggering.resource_type,
        resource_id: triggering.resource_id.clone(),
        kind: EventKind::ResubscribeHint,
        payload: Value::Null,
        emitted_at: chrono::Utc::now(),
    }
}

/// The singleton event bus. Cheaply cloneable — every component that needs
/// to publish or subscribe holds a clone; subscriber queues are `Arc`-owned
/// by the subscriber handle and only `Weak`-referenced here so a dropped
/// `Subscriber` is pruned on the next publish rather than leaking forever.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Default)]
struct EventBusInner {
    sequence: AtomicU64,
    subscribers: Mutex<Vec<Weak<SubscriberQueue>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber filtered to `resource_types` (empty set =
    /// all types) with the default buffer depth.
    pub fn subscribe(&self, resource_types: HashSet<ResourceType>) -> Subscriber {
        self.subscribe_with_buffer(resource_types, DEFAULT_BUFFER)
    }

    pub fn subscribe_with_buffer(&self, resource_types: HashSet<ResourceType>, buffer: usize) -> Subscriber {
        let queue = Arc::new(SubscriberQueue {
            subscription: Subscription { resource_types },
            capacity: buffer.max(1),
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            lagged: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(Arc::downgrade(&queue));
        Subscriber { id: uuid::Uuid::new_v4(), queue }
    }

    /// Publishes an event, assigning it the next global sequence number,
    /// and offers it to every live subscriber's queue. A publish with zero
    /// active subscribers is not an error — the event simply has no
    /// listeners right now.
    pub fn publish(
        &self,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        kind: EventKind,
        payload: Value,
    ) -> Event {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            sequence,
            resource_type,
            resource_id: resource_id.into(),
            kind,
            payload,
            emitted_at: chrono::Utc::now(),
        };

        let mut subscribers = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|weak| {
            let Some(queue) = weak.upgrade() else { return false };
            queue.offer(&event);
            true
        });

        event
    }
}

/// A single subscriber's handle: its own queue plus a wakeup notifier.
/// Dropping this ends the subscription (the bus prunes the dead weak
/// reference on the next publish).
pub struct Subscriber {
    pub id: uuid::Uuid,
    queue: Arc<SubscriberQueue>,
}

impl Subscriber {
    pub fn lagged_count(&self) -> u64 {
        self.queue.lagged.load(Ordering::Relaxed)
    }

    /// Awaits the next event matching this subscriber's filter, in sequence
    /// order. Returns `None` only once this subscriber has been explicitly
    /// closed (there is no "bus shutdown" signal — the process owns the bus
    /// for its whole lifetime).
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.queue.buffer.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_matching_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(HashSet::from([ResourceType::Container]));

        bus.publish(ResourceType::Container, "a", EventKind::ContainerStateChanged, Value::Null);
        bus.publish(ResourceType::App, "b", EventKind::AppStateChanged, Value::Null);
        bus.publish(ResourceType::Container, "a", EventKind::ContainerStateChanged, Value::Null);

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.resource_type, ResourceType::Container);
        assert_eq!(second.resource_type, ResourceType::Container);
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_emits_hint() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_with_buffer(HashSet::new(), 2);

        for i in 0..10 {
            bus.publish(ResourceType::Container, format!("c{i}"), EventKind::ContainerCreated, Value::Null);
        }

        let first = sub.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::ResubscribeHint);
        assert!(sub.lagged_count() > 0);
    }

    #[tokio::test]
    async fn unmatched_resource_types_are_filtered() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(HashSet::from([ResourceType::App]));
        bus.publish(ResourceType::Container, "a", EventKind::ContainerCreated, Value::Null);
        bus.publish(ResourceType::App, "b", EventKind::AppDeployed, Value::Null);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.resource_type, ResourceType::App);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe(HashSet::new());
            assert_eq!(bus.inner.subscribers.lock().unwrap().len(), 1);
        }
        bus.publish(ResourceType::Container, "a", EventKind::ContainerCreated, Value::Null);
        assert_eq!(bus.inner.subscribers.lock().unwrap().len(), 0);
    }
}
