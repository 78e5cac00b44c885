//! Bounded audit event queue.
//!
//! The queue sits on the decision path, so [`AuditEventQueue::enqueue`] never
//! waits: when the queue is full the event is dropped and counted.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use warden_core::Metrics;
use warden_core::config::MAX_CAPACITY;

use crate::error::QueueError;
use crate::event::AuditEvent;

/// Producer side of the audit queue. Cheap to clone.
#[derive(Clone)]
pub struct AuditEventQueue {
    sender: mpsc::Sender<AuditEvent>,
    metrics: Arc<Metrics>,
}

impl AuditEventQueue {
    /// Create a queue holding up to `capacity` events, returning the
    /// producer handle and the receiver for the batcher.
    pub fn channel(capacity: usize, metrics: Arc<Metrics>) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.clamp(1, MAX_CAPACITY));
        (Self { sender, metrics }, receiver)
    }

    /// Offer an event without blocking.
    pub fn enqueue(&self, event: AuditEvent) -> Result<(), QueueError> {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.metrics.record_enqueued();
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.metrics.record_queue_overflow();
                tracing::debug!(event_id = %event.event_id, "Audit queue full, dropping event");
                Err(QueueError::Overflow)
            }
            Err(TrySendError::Closed(event)) => {
                self.metrics.record_queue_overflow();
                tracing::debug!(event_id = %event.event_id, "Audit queue closed, dropping event");
                Err(QueueError::Closed)
            }
        }
    }

    /// Events currently waiting to be batched.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
