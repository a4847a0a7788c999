//! In-process event bus with one bounded queue per subscriber.
//!
//! Unlike a shared broadcast ring, every `Subscription` owns its own queue, so
//! a slow consumer only loses its own events. All registry mutation and the
//! whole publish fan-out happen under a single mutex; the fan-out only makes
//! non-blocking send attempts, so the lock is never held across a wait.
//!
//! Lifecycle is `Active -> Closed`. Once closed, every mutating operation
//! returns `BusError::Closed` instead of touching a dead queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, trace};

use super::subscription::{Subscription, SubscriptionId};

/// Errors returned by bus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus has been closed; it accepts no further work.
    #[error("event bus is closed")]
    Closed,
}

/// Outcome of a single `publish` fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscriptions that accepted the event.
    pub delivered: usize,
    /// Subscriptions whose queue was full (or had no waiting receiver at
    /// capacity zero), so the event was discarded for them.
    pub dropped: usize,
}

impl Delivery {
    /// Number of subscriptions the fan-out visited.
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped
    }
}

/// Point-in-time view of one registered subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub id: SubscriptionId,
    pub capacity: usize,
    /// Events currently waiting in the queue.
    pub queued: usize,
    /// Events discarded for this subscription since it was created.
    pub dropped: u64,
}

/// Producer side of one subscription, owned exclusively by the registry.
struct Entry<T> {
    id: SubscriptionId,
    capacity: usize,
    sender: flume::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Entry<T> {
    fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            id: self.id,
            capacity: self.capacity,
            queued: self.sender.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

enum Registry<T> {
    /// Live subscriptions in subscribe order.
    Active(Vec<Entry<T>>),
    Closed,
}

pub(crate) struct BusInner<T> {
    registry: Mutex<Registry<T>>,
    events_published: AtomicU64,
}

impl<T> BusInner<T> {
    // No code path panics while the registry is half-mutated, so a poisoned
    // lock still guards a consistent registry.
    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a subscription by id, closing its queue.
    ///
    /// Returns `Ok(false)` if the id is not registered.
    pub(crate) fn remove(&self, id: SubscriptionId) -> Result<bool, BusError> {
        let mut registry = self.lock();
        let Registry::Active(entries) = &mut *registry else {
            return Err(BusError::Closed);
        };

        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            trace!(subscription = %id, "unsubscribe of unknown subscription ignored");
            return Ok(false);
        };

        // Dropping the only sender closes the queue for the consumer.
        let entry = entries.remove(index);
        debug!(
            subscription = %entry.id,
            remaining = entries.len(),
            "subscription removed from event bus"
        );
        drop(entry);
        Ok(true)
    }
}

/// Typed publish/subscribe hub.
///
/// Cloning the bus is cheap and every clone addresses the same registry, so
/// producers and consumers can each hold their own handle.
pub struct Bus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T: Clone> Bus<T> {
    /// Create an empty, active bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::Active(Vec::new())),
                events_published: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscription whose queue holds at most `capacity` events.
    ///
    /// A capacity of zero creates a rendezvous queue: an event is only
    /// delivered if the consumer is blocked in a receive call at publish time.
    pub fn subscribe(&self, capacity: usize) -> Result<Subscription<T>, BusError> {
        let mut registry = self.inner.lock();
        let Registry::Active(entries) = &mut *registry else {
            return Err(BusError::Closed);
        };

        let (sender, receiver) = flume::bounded(capacity);
        let id = SubscriptionId::new();
        let dropped = Arc::new(AtomicU64::new(0));

        entries.push(Entry {
            id,
            capacity,
            sender,
            dropped: Arc::clone(&dropped),
        });
        debug!(subscription = %id, capacity, total = entries.len(), "subscribed to event bus");

        Ok(Subscription::new(
            id,
            capacity,
            receiver,
            dropped,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Offer `event` to every registered subscription without blocking.
    ///
    /// Subscriptions registered when the lock is taken either receive the
    /// event or have it dropped because their queue is full. Drops are
    /// counted per subscription and reported in the returned `Delivery`;
    /// they are never an error.
    pub fn publish(&self, event: T) -> Result<Delivery, BusError> {
        let registry = self.inner.lock();
        let Registry::Active(entries) = &*registry else {
            return Err(BusError::Closed);
        };

        let mut delivery = Delivery::default();
        for entry in entries {
            match entry.sender.try_send(event.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(flume::TrySendError::Full(_)) | Err(flume::TrySendError::Disconnected(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    delivery.dropped += 1;
                    trace!(
                        subscription = %entry.id,
                        capacity = entry.capacity,
                        "subscriber queue full, event dropped"
                    );
                }
            }
        }

        self.inner.events_published.fetch_add(1, Ordering::Relaxed);
        Ok(delivery)
    }
}

impl<T> Bus<T> {
    /// Deregister `subscription` and close its queue.
    ///
    /// The consumer still receives anything already queued, then observes
    /// end-of-stream. Returns `Ok(false)` without side effects if the handle
    /// is no longer (or was never) registered on this bus.
    pub fn unsubscribe(&self, subscription: &Subscription<T>) -> Result<bool, BusError> {
        self.inner.remove(subscription.id())
    }

    /// Snapshot of the registry in subscribe order.
    ///
    /// Taken under the lock; later bus activity does not affect the returned
    /// vector. Empty once the bus is closed.
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        match &*self.inner.lock() {
            Registry::Active(entries) => entries.iter().map(Entry::info).collect(),
            Registry::Closed => Vec::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match &*self.inner.lock() {
            Registry::Active(entries) => entries.len(),
            Registry::Closed => 0,
        }
    }

    /// Total successful `publish` calls, including those with no subscribers.
    pub fn events_published(&self) -> u64 {
        self.inner.events_published.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        matches!(&*self.inner.lock(), Registry::Closed)
    }

    /// Close every subscription queue, empty the registry and retire the bus.
    ///
    /// Returns `BusError::Closed` if the bus was already closed; nothing is
    /// closed a second time.
    pub fn close(&self) -> Result<(), BusError> {
        let mut registry = self.inner.lock();
        match std::mem::replace(&mut *registry, Registry::Closed) {
            Registry::Active(entries) => {
                debug!(subscribers = entries.len(), "closing event bus");
                drop(entries);
                Ok(())
            }
            Registry::Closed => Err(BusError::Closed),
        }
    }
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Bus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("subscriber_count", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .field("events_published", &self.events_published())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SubscriptionError;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn new_bus_has_no_subscribers() {
        let bus: Bus<&str> = Bus::new();
        assert!(bus.subscribers().is_empty());
        assert!(!bus.is_closed());
        assert_eq!(bus.events_published(), 0);
    }

    #[test]
    fn subscribe_registers_with_requested_capacity() {
        let bus: Bus<u32> = Bus::new();
        for capacity in [0, 5, 100] {
            let sub = bus.subscribe(capacity).unwrap();
            assert_eq!(sub.capacity(), capacity);

            let subscribers = bus.subscribers();
            assert_eq!(subscribers.len(), 1);
            assert_eq!(subscribers[0].id, sub.id());
            assert_eq!(subscribers[0].capacity, capacity);

            bus.unsubscribe(&sub).unwrap();
        }
    }

    #[test]
    fn subscribers_snapshot_preserves_subscribe_order() {
        let bus: Bus<u32> = Bus::new();
        let subs: Vec<_> = (0..4).map(|_| bus.subscribe(1).unwrap()).collect();

        let ids: Vec<_> = bus.subscribers().into_iter().map(|info| info.id).collect();
        let expected: Vec<_> = subs.iter().map(Subscription::id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn subscriber_receives_min_of_published_and_capacity_in_order() {
        for capacity in [0usize, 1, 2, 5, 10] {
            for published in [0usize, 1, 3, 7] {
                let bus = Bus::new();
                let sub = bus.subscribe(capacity).unwrap();

                for i in 0..published {
                    bus.publish(i).unwrap();
                }

                let received = sub.drain();
                let expected: Vec<usize> = (0..published.min(capacity)).collect();
                assert_eq!(received, expected, "capacity {capacity}, published {published}");
                assert_eq!(sub.dropped(), published.saturating_sub(capacity) as u64);

                // Nothing dropped is ever delivered late.
                bus.publish(usize::MAX).unwrap();
                let late = sub.drain();
                if capacity == 0 {
                    assert!(late.is_empty());
                } else {
                    assert_eq!(late, vec![usize::MAX]);
                }
            }
        }
    }

    #[test]
    fn publish_fans_out_to_every_subscription() {
        let bus = Bus::new();
        let subs: Vec<_> = (0..3).map(|_| bus.subscribe(4).unwrap()).collect();

        let delivery = bus.publish("e").unwrap();
        assert_eq!(delivery, Delivery { delivered: 3, dropped: 0 });

        for sub in &subs {
            assert_eq!(sub.try_recv(), Ok(Some("e")));
        }
    }

    #[test]
    fn publish_with_no_subscribers_is_counted() {
        let bus: Bus<&str> = Bus::new();
        let delivery = bus.publish("nobody").unwrap();
        assert_eq!(delivery.attempted(), 0);
        assert_eq!(bus.events_published(), 1);
    }

    #[test]
    fn full_queue_drops_only_for_that_subscriber() {
        let bus = Bus::new();
        let small = bus.subscribe(1).unwrap();
        let large = bus.subscribe(8).unwrap();

        bus.publish(1).unwrap();
        let delivery = bus.publish(2).unwrap();
        assert_eq!(delivery, Delivery { delivered: 1, dropped: 1 });

        assert_eq!(small.drain(), vec![1]);
        assert_eq!(large.drain(), vec![1, 2]);

        let info = bus.subscribers();
        assert_eq!(info[0].dropped, 1);
        assert_eq!(info[1].dropped, 0);
    }

    #[test]
    fn subscribers_reports_queued_events() {
        let bus = Bus::new();
        let _sub = bus.subscribe(4).unwrap();
        bus.publish('a').unwrap();
        bus.publish('b').unwrap();
        assert_eq!(bus.subscribers()[0].queued, 2);
    }

    #[test]
    fn unsubscribe_closes_stream_and_shrinks_registry() {
        let bus = Bus::new();
        let sub1 = bus.subscribe(1).unwrap();
        let sub2 = bus.subscribe(1).unwrap();
        let sub3 = bus.subscribe(1).unwrap();
        assert_eq!(bus.subscriber_count(), 3);

        assert_eq!(bus.unsubscribe(&sub2), Ok(true));
        assert!(sub2.is_closed());
        assert_eq!(sub2.recv(), None);
        assert_eq!(sub2.try_recv(), Err(SubscriptionError::Closed));

        bus.publish("test").unwrap();
        assert_eq!(sub1.try_recv(), Ok(Some("test")));
        assert_eq!(sub3.try_recv(), Ok(Some("test")));
        assert_eq!(sub2.try_recv(), Err(SubscriptionError::Closed));

        let remaining: Vec<_> = bus.subscribers().into_iter().map(|info| info.id).collect();
        assert_eq!(remaining, vec![sub1.id(), sub3.id()]);
    }

    #[test]
    fn unsubscribe_still_yields_buffered_events_before_end_of_stream() {
        let bus = Bus::new();
        let sub = bus.subscribe(2).unwrap();
        bus.publish(1).unwrap();
        bus.unsubscribe(&sub).unwrap();

        assert_eq!(sub.recv(), Some(1));
        assert_eq!(sub.recv(), None);
    }

    #[test]
    fn unsubscribe_unknown_handle_is_noop() {
        let bus: Bus<u8> = Bus::new();
        let other_bus: Bus<u8> = Bus::new();
        let sub = bus.subscribe(1).unwrap();
        let keep = bus.subscribe(1).unwrap();
        let foreign = other_bus.subscribe(1).unwrap();

        assert_eq!(bus.unsubscribe(&sub), Ok(true));
        assert_eq!(bus.unsubscribe(&sub), Ok(false));
        assert_eq!(bus.unsubscribe(&foreign), Ok(false));

        assert_eq!(bus.subscriber_count(), 1);
        assert!(!keep.is_closed());
        assert!(!foreign.is_closed());
        assert_eq!(other_bus.subscriber_count(), 1);
    }

    #[test]
    fn dropping_subscription_deregisters_it() {
        let bus: Bus<u8> = Bus::new();
        let keep = bus.subscribe(1).unwrap();
        {
            let _temporary = bus.subscribe(1).unwrap();
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.subscribers()[0].id, keep.id());
    }

    #[test]
    fn close_ends_every_stream_and_empties_registry() {
        let bus: Bus<u8> = Bus::new();
        let subs: Vec<_> = (0..3).map(|_| bus.subscribe(1).unwrap()).collect();

        bus.close().unwrap();

        for sub in &subs {
            assert!(sub.is_closed());
            assert_eq!(sub.recv(), None);
        }
        assert!(bus.subscribers().is_empty());
        assert!(bus.is_closed());
    }

    #[test]
    fn close_twice_is_an_error() {
        let bus: Bus<u8> = Bus::new();
        let _sub = bus.subscribe(1).unwrap();
        assert_eq!(bus.close(), Ok(()));
        assert_eq!(bus.close(), Err(BusError::Closed));
    }

    #[test]
    fn operations_after_close_are_rejected() {
        let bus: Bus<u8> = Bus::new();
        let sub = bus.subscribe(1).unwrap();
        bus.close().unwrap();

        assert_eq!(bus.subscribe(1).unwrap_err(), BusError::Closed);
        assert_eq!(bus.publish(1), Err(BusError::Closed));
        assert_eq!(bus.unsubscribe(&sub), Err(BusError::Closed));
        assert_eq!(bus.events_published(), 0);

        // Dropping a handle after close must not panic.
        drop(sub);
    }

    #[test]
    fn clones_share_one_registry() {
        let bus: Bus<u8> = Bus::new();
        let producer = bus.clone();
        let sub = bus.subscribe(1).unwrap();

        producer.publish(7).unwrap();
        assert_eq!(sub.try_recv(), Ok(Some(7)));

        producer.close().unwrap();
        assert!(bus.is_closed());
    }

    #[test]
    fn scenario_capacity_two_three_events() {
        let bus = Bus::new();
        let h1 = bus.subscribe(2).unwrap();
        let h2 = bus.subscribe(2).unwrap();

        bus.publish("a").unwrap();
        bus.publish("b").unwrap();
        let delivery = bus.publish("c").unwrap();
        assert_eq!(delivery, Delivery { delivered: 0, dropped: 2 });

        assert_eq!(h1.len(), 2);
        assert_eq!(h2.len(), 2);

        bus.unsubscribe(&h1).unwrap();
        assert_eq!(h1.drain(), vec!["a", "b"]);
        assert_eq!(h1.recv(), None);
        assert_eq!(bus.subscribers().len(), 1);

        bus.close().unwrap();
        assert_eq!(h2.drain(), vec!["a", "b"]);
        assert_eq!(h2.recv(), None);
        assert!(bus.subscribers().is_empty());
    }

    #[test]
    fn zero_capacity_drops_without_waiting_receiver() {
        let bus = Bus::new();
        let sub = bus.subscribe(0).unwrap();

        let delivery = bus.publish("x").unwrap();
        assert_eq!(delivery, Delivery { delivered: 0, dropped: 1 });
        assert_eq!(sub.try_recv(), Ok(None));
        assert_eq!(sub.dropped(), 1);
    }

    #[test]
    fn zero_capacity_hands_off_to_waiting_receiver() {
        let bus = Bus::new();
        let sub = bus.subscribe(0).unwrap();

        let consumer = thread::spawn(move || {
            let received = sub.recv();
            (received, sub)
        });

        // Keep offering until the consumer is parked in `recv`.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if bus.publish("x").unwrap().delivered == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "consumer never became ready");
            thread::sleep(Duration::from_millis(1));
        }

        let (received, _sub) = consumer.join().unwrap();
        assert_eq!(received, Some("x"));
    }

    #[test]
    fn concurrent_publish_and_unsubscribe() {
        const PUBLISHERS: usize = 10;
        const EVENTS_PER_PUBLISHER: usize = 100;
        const SUBSCRIBERS: usize = 5;
        const UNSUBSCRIBERS: usize = 3;

        let bus = Bus::new();
        let mut subs: Vec<_> = (0..SUBSCRIBERS)
            .map(|_| bus.subscribe(EVENTS_PER_PUBLISHER).unwrap())
            .collect();
        let kept = subs.split_off(UNSUBSCRIBERS);

        let mut handles = Vec::new();
        for publisher in 0..PUBLISHERS {
            let bus = bus.clone();
            handles.push(thread::spawn(move || {
                for j in 0..EVENTS_PER_PUBLISHER {
                    bus.publish(publisher * EVENTS_PER_PUBLISHER + j).unwrap();
                    thread::sleep(Duration::from_micros(1));
                }
            }));
        }
        for (i, sub) in subs.into_iter().enumerate() {
            let bus = bus.clone();
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(i as u64 * 5));
                assert_eq!(bus.unsubscribe(&sub), Ok(true));
                assert!(sub.is_closed());
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(bus.events_published(), (PUBLISHERS * EVENTS_PER_PUBLISHER) as u64);
        assert_eq!(bus.subscriber_count(), SUBSCRIBERS - UNSUBSCRIBERS);

        for sub in &kept {
            assert!(!sub.is_closed());
            let received = sub.drain();
            assert_eq!(received.len(), EVENTS_PER_PUBLISHER);
            assert_eq!(
                received.len() as u64 + sub.dropped(),
                (PUBLISHERS * EVENTS_PER_PUBLISHER) as u64
            );
        }

        bus.close().unwrap();
        for sub in &kept {
            assert!(sub.is_closed());
        }
    }

    #[test]
    fn single_publisher_order_is_preserved_per_subscriber() {
        let bus = Bus::new();
        let sub = bus.subscribe(1000).unwrap();
        let producer = bus.clone();

        thread::spawn(move || {
            for i in 0..500u32 {
                producer.publish(i).unwrap();
            }
        })
        .join()
        .unwrap();

        let received = sub.drain();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn async_consumer_ends_on_unsubscribe() {
        let bus = Bus::new();
        let sub = bus.subscribe(8).unwrap();
        let id = sub.id();

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = sub.recv_async().await {
                seen.push(event);
            }
            (seen, sub)
        });

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();
        // Wait until both events are consumed before tearing down.
        let deadline = Instant::now() + Duration::from_secs(5);
        while bus.subscribers()[0].queued > 0 {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(bus.inner.remove(id), Ok(true));

        let (seen, _sub) = consumer.await.unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn async_consumers_end_on_close() {
        let bus: Bus<String> = Bus::new();
        let mut consumers = Vec::new();
        for _ in 0..3 {
            let sub = bus.subscribe(4).unwrap();
            consumers.push(tokio::spawn(async move {
                let mut count = 0;
                while sub.recv_async().await.is_some() {
                    count += 1;
                }
                count
            }));
        }

        bus.publish("one".to_string()).unwrap();
        bus.close().unwrap();

        for consumer in consumers {
            let count = tokio::time::timeout(Duration::from_secs(5), consumer)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(count, 1);
        }
    }

    #[test]
    fn debug_impl() {
        let bus: Bus<u8> = Bus::new();
        let _sub = bus.subscribe(1).unwrap();
        let debug = format!("{bus:?}");
        assert!(debug.contains("Bus"));
        assert!(debug.contains("subscriber_count: 1"));
    }
}
