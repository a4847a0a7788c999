//! Core runtime pieces for batcher.
//!
//! - `event` -- typed, in-process publish/subscribe hub with bounded
//!   per-subscriber queues and explicit teardown
//! - `shutdown` -- bridges OS termination signals onto a `CancellationToken`
//!
//! Nothing here performs I/O beyond signal registration.

pub mod event;
pub mod shutdown;

pub use event::{
    Bus, BusError, Delivery, SubscriberInfo, Subscription, SubscriptionError, SubscriptionId,
};
pub use shutdown::{ShutdownContext, ShutdownError, Signal, SignalError};
