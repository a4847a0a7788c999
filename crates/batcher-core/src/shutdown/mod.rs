//! Graceful shutdown driven by OS termination signals.
//!
//! - `signal` -- the signals we react to and the error recorded for them
//! - `context` -- `ShutdownContext`, which cancels a token on SIGINT/SIGTERM

pub mod context;
pub mod signal;

pub use context::ShutdownContext;
pub use signal::{ShutdownError, Signal, SignalError};
