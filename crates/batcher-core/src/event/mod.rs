//! Typed publish/subscribe bus with bounded, independently-paced subscribers.
//!
//! - `bus` -- `Bus<T>`: the registry of live subscriptions, fan-out and teardown
//! - `subscription` -- `Subscription<T>`: the consumer end of one bounded queue
//!
//! Publishing never blocks: an event that does not fit in a subscriber's queue
//! is dropped for that subscriber and counted, never retried.

pub mod bus;
pub mod subscription;

pub use bus::{Bus, BusError, Delivery, SubscriberInfo};
pub use subscription::{Subscription, SubscriptionError, SubscriptionId};
