//! # warden-audit
//!
//! The audit pipeline that ships every authorization decision off-box.
//!
//! ```text
//! Authorizer ──enqueue──▶ AuditEventQueue ──▶ AuditBatcher ──┬─▶ SiemForwarder (splunk) ──▶ HttpSink
//!                                                            ├─▶ SiemForwarder (datadog) ─▶ HttpSink
//!                                                            └─▶ ...
//!                                  exhausted / backlog full / drain timeout ──▶ DeadLetterSink
//! ```
//!
//! - [`queue`]: bounded, non-blocking queue; a full queue drops and counts
//! - [`batcher`]: groups events by size or time and fans batches out
//! - [`forwarder`]: per-sink delivery with retry, backoff and a circuit breaker
//! - [`sink`]: the [`Sink`] trait and the HTTP sink with JSON, Splunk HEC and
//!   Datadog wire formats
//! - [`dead_letter`]: terminal storage for batches that could not be delivered
//! - [`pipeline`]: wiring, task ownership and graceful shutdown
//!
//! Nothing in this crate ever blocks or fails the decision path. Every event
//! reaches every configured sink or is dead-lettered.

pub mod batch;
pub mod batcher;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod sink;

pub use batch::Batch;
pub use batcher::AuditBatcher;
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, read_log, rotated_files};
pub use error::{DeadLetterError, DeliveryError, QueueError};
pub use event::AuditEvent;
pub use forwarder::{SiemForwarder, SinkInbox, SinkCheck};
pub use pipeline::AuditPipeline;
pub use queue::AuditEventQueue;
pub use retry::RetryPolicy;
pub use sink::{Gzip, HttpSink, Sink, WireFormat};
