//! Shared domain types for batcher.
//!
//! Configuration, the pipeline event payload and configuration errors.
//! Zero runtime dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
