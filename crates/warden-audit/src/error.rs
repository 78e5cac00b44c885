//! Error types for the audit crate.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Why an event was not accepted by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity; the event was dropped.
    #[error("audit queue full, event dropped")]
    Overflow,

    /// The pipeline has shut down; the event was dropped.
    #[error("audit queue closed, event dropped")]
    Closed,
}

/// Errors that can occur while delivering a batch to a sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The sink answered with a non-success status.
    #[error("sink returned HTTP {status}")]
    Status { status: u16 },

    /// The request could not be sent or the response not read.
    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The attempt exceeded the sink timeout.
    #[error("sink attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The batch could not be encoded in the sink's wire format.
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    /// The encoded batch could not be compressed.
    #[error("failed to compress batch: {0}")]
    Compress(#[from] std::io::Error),

    /// The sink circuit is open; no attempt was made.
    #[error("sink circuit open, retry after {0:?}")]
    CircuitOpen(Duration),

    /// Every allowed attempt failed, or the circuit opened before they ran out.
    #[error("delivery failed after {attempts} attempt(s): {reason}")]
    Exhausted {
        attempts: u32,
        first_failed_at: DateTime<Utc>,
        reason: String,
    },
}

/// Errors from the dead-letter file.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A line of the dead-letter log is not a record.
    #[error("malformed dead-letter record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
