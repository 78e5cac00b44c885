//! SIEM sinks.
//!
//! A [`Sink`] delivers one batch per call and reports success or a typed
//! failure. Retries, timeouts and circuit breaking are the forwarder's job,
//! so a sink makes exactly one attempt.

pub mod format;
pub mod http;

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::DeliveryError;

pub use format::WireFormat;
pub use http::{Gzip, HttpSink};

/// Trait for batch destinations.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs, metrics and dead-letter records.
    fn name(&self) -> &str;

    /// Make one delivery attempt for `batch`.
    async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError>;

    /// Check that the destination is reachable and accepting data. Sinks with
    /// nothing to check report healthy.
    async fn health_check(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}
