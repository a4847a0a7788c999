//! Event payload carried on the batcher pipeline bus.
//!
//! All variants are `Clone + Send` so the bus can hand an independent copy to
//! every subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events published by the input reader of `batcher run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// One line of input.
    Line {
        /// 1-based position of the line in the input.
        seq: u64,
        text: String,
        received_at: DateTime<Utc>,
    },

    /// The input reached end-of-file after `total` lines.
    EndOfInput { total: u64 },
}

impl PipelineEvent {
    /// Sequence number of the event (the line count for `EndOfInput`).
    pub fn seq(&self) -> u64 {
        match self {
            PipelineEvent::Line { seq, .. } => *seq,
            PipelineEvent::EndOfInput { total } => *total,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, PipelineEvent::EndOfInput { .. })
    }
}
