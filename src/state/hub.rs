//! Per-room publish/subscribe fan-out.
//!
//! Delivery is best effort: every subscriber owns a bounded queue and a
//! broadcast that finds it full simply skips that subscriber. Each mutation
//! is followed by a full snapshot, so a missed event heals on the next one.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::dto::events::RoomEvent;

/// Identifier of a subscription inside its hub.
pub type SubscriptionId = u64;

/// Receiving end of a subscription.
pub type EventReceiver = mpsc::Receiver<Arc<RoomEvent>>;

/// Fan-out point for the events of a single room.
pub struct Hub {
    room_id: Uuid,
    subscribers: DashMap<SubscriptionId, mpsc::Sender<Arc<RoomEvent>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Hub {
    /// Create an open hub for `room_id`.
    pub fn new(room_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            room_id,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Room this hub serves.
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Register a subscriber whose queue holds at most `buffer` events.
    ///
    /// Dropping or cancelling the returned guard unsubscribes. Subscribing to
    /// a closed hub yields a receiver that is already terminated.
    pub fn subscribe(self: &Arc<Self>, buffer: usize) -> (EventReceiver, SubscriptionGuard) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.insert(id, tx);
            // A concurrent close may have cleared the map before our insert.
            if self.closed.load(Ordering::Acquire) {
                self.subscribers.remove(&id);
            }
        }

        let guard = SubscriptionGuard {
            id,
            hub: Arc::downgrade(self),
        };
        (rx, guard)
    }

    /// Push `event` to every subscriber without waiting, returning how many accepted it.
    pub fn broadcast(&self, mut event: RoomEvent) -> usize {
        if event.timestamp.is_none() {
            event.timestamp = Some(SystemTime::now());
        }
        let event = Arc::new(event);

        let mut delivered = 0;
        let mut stale = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        room_id = %self.room_id,
                        subscription = *entry.key(),
                        kind = event.kind,
                        "subscriber queue full; dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => stale.push(*entry.key()),
            }
        }

        // Removal must happen outside the iteration, which holds shard locks.
        for id in stale {
            self.subscribers.remove(&id);
        }
        delivered
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop every subscriber and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.clear();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }
}

/// Cancel handle of a subscription; unsubscribes when dropped.
pub struct SubscriptionGuard {
    id: SubscriptionId,
    hub: Weak<Hub>,
}

impl SubscriptionGuard {
    /// Identifier of the subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery to this subscription right away.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

/// Process-wide map of room hubs.
#[derive(Default)]
pub struct HubRegistry {
    hubs: DashMap<Uuid, Arc<Hub>>,
}

impl HubRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the hub of `room_id`, creating it on first use.
    pub fn room(&self, room_id: Uuid) -> Arc<Hub> {
        self.hubs
            .entry(room_id)
            .or_insert_with(|| Hub::new(room_id))
            .clone()
    }

    /// Return the hub of `room_id` only if it already exists.
    pub fn get(&self, room_id: Uuid) -> Option<Arc<Hub>> {
        self.hubs.get(&room_id).map(|hub| Arc::clone(hub.value()))
    }

    /// Broadcast to an existing hub; rooms nobody listens to are skipped.
    pub fn broadcast(&self, room_id: Uuid, event: RoomEvent) -> usize {
        match self.get(room_id) {
            Some(hub) => hub.broadcast(event),
            None => 0,
        }
    }

    /// Detach and close the hub of `room_id`.
    pub fn remove(&self, room_id: Uuid) -> bool {
        match self.hubs.remove(&room_id) {
            Some((_, hub)) => {
                hub.close();
                true
            }
            None => false,
        }
    }

    /// Number of hubs currently registered.
    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    /// Whether no hub is registered.
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::dto::events::EVENT_ROOM_SNAPSHOT;

    fn event(room_id: Uuid, n: u64) -> RoomEvent {
        RoomEvent::json(EVENT_ROOM_SNAPSHOT, room_id, &json!({ "n": n })).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_and_cancel_keep_exact_count() {
        let hub = Hub::new(Uuid::new_v4());
        let (n, m) = (200usize, 120usize);

        let mut joins = Vec::new();
        for _ in 0..n {
            let hub = Arc::clone(&hub);
            joins.push(tokio::spawn(async move { hub.subscribe(4) }));
        }
        let mut subscriptions = Vec::new();
        for join in joins {
            subscriptions.push(join.await.unwrap());
        }

        let cancelled: Vec<_> = subscriptions.drain(..m).collect();
        let mut joins = Vec::new();
        for (_rx, guard) in cancelled {
            joins.push(tokio::spawn(async move { guard.cancel() }));
        }
        // Broadcasts racing with the cancellations must not disturb the count.
        for i in 0..20 {
            hub.broadcast(event(hub.room_id(), i));
        }
        for join in joins {
            join.await.unwrap();
        }

        assert_eq!(hub.subscriber_count(), n - m);
        drop(subscriptions);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_event_without_blocking() {
        let hub = Hub::new(Uuid::new_v4());
        let (mut slow_rx, _slow) = hub.subscribe(1);
        let (mut fast_rx, _fast) = hub.subscribe(8);

        let sent = tokio::time::timeout(Duration::from_millis(100), async {
            hub.broadcast(event(hub.room_id(), 1));
            hub.broadcast(event(hub.room_id(), 2))
        })
        .await
        .expect("broadcast must not block");
        assert_eq!(sent, 1);

        assert_eq!(slow_rx.recv().await.unwrap().payload["n"], 1);
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.recv().await.unwrap().payload["n"], 1);
        assert_eq!(fast_rx.recv().await.unwrap().payload["n"], 2);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn broadcast_stamps_missing_timestamp() {
        let hub = Hub::new(Uuid::new_v4());
        let (mut rx, _guard) = hub.subscribe(2);
        hub.broadcast(event(hub.room_id(), 1));

        let stamped = event(hub.room_id(), 2);
        let fixed = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        hub.broadcast(RoomEvent {
            timestamp: Some(fixed),
            ..stamped
        });

        assert!(rx.recv().await.unwrap().timestamp.is_some());
        assert_eq!(rx.recv().await.unwrap().timestamp, Some(fixed));
    }

    #[tokio::test]
    async fn cancelled_and_dropped_receivers_stop_receiving() {
        let hub = Hub::new(Uuid::new_v4());
        let (mut cancelled_rx, guard) = hub.subscribe(4);
        let (dropped_rx, _kept_guard) = hub.subscribe(4);

        guard.cancel();
        drop(dropped_rx);
        assert_eq!(hub.broadcast(event(hub.room_id(), 1)), 0);
        assert!(cancelled_rx.recv().await.is_none());
        // The closed queue was pruned during the broadcast.
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn registry_remove_closes_hub() {
        let registry = HubRegistry::new();
        let room = Uuid::new_v4();
        let hub = registry.room(room);
        assert!(Arc::ptr_eq(&hub, &registry.room(room)));
        let (mut rx, _guard) = hub.subscribe(4);

        assert!(registry.remove(room));
        assert!(!registry.remove(room));
        assert!(hub.is_closed());
        assert!(rx.recv().await.is_none());
        assert_eq!(registry.broadcast(room, event(room, 1)), 0);

        let (mut late_rx, _late) = hub.subscribe(4);
        assert!(late_rx.recv().await.is_none());
        assert!(registry.is_empty());
    }
}
