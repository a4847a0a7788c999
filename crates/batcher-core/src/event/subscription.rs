//! Consumer end of a bus subscription.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::bus::BusInner;

/// Unique identifier for a subscription, wrapping a UUID v7 (time-sortable).
///
/// Identifiers are unique across buses, so a handle from another bus never
/// matches an entry in this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Errors from receiving on a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The queue was closed by unsubscribe or bus shutdown and is drained.
    #[error("subscription closed")]
    Closed,
}

/// A bounded, receive-only event stream handed out by `Bus::subscribe`.
///
/// The bus keeps the only producer side; the queue is closed when the
/// subscription is removed from the registry. Dropping the handle removes it.
pub struct Subscription<T> {
    id: SubscriptionId,
    capacity: usize,
    receiver: flume::Receiver<T>,
    dropped: Arc<AtomicU64>,
    bus: Weak<BusInner<T>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        capacity: usize,
        receiver: flume::Receiver<T>,
        dropped: Arc<AtomicU64>,
        bus: Weak<BusInner<T>>,
    ) -> Self {
        Self {
            id,
            capacity,
            receiver,
            dropped,
            bus,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until the next event arrives.
    ///
    /// Returns `None` once the queue is closed and every buffered event has
    /// been received.
    pub fn recv(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Like `recv`, but gives up after `timeout` with `Ok(None)`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, SubscriptionError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Await the next event. Returns `None` at end-of-stream.
    pub async fn recv_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }

    /// Take the next event if one is queued.
    ///
    /// - `Ok(Some(event))` -- an event was waiting
    /// - `Ok(None)` -- the queue is empty but still open
    /// - `Err(SubscriptionError::Closed)` -- closed and drained
    pub fn try_recv(&self) -> Result<Option<T>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Take every event currently queued without waiting.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.drain().collect()
    }

    /// Events currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Events discarded for this subscription because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the bus has closed this queue. Buffered events may remain.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_disconnected()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            // Already removed or bus closed: nothing left to release.
            let _ = bus.remove(self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("queued", &self.receiver.len())
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}
