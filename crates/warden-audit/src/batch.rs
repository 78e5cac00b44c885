//! Batches of audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::AuditEvent;

/// An ordered group of events flushed together.
///
/// The batcher hands one batch to every sink behind an `Arc`; a batch is
/// only ever cloned whole, when it is dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub events: Vec<AuditEvent>,
}

impl Batch {
    pub fn new(events: Vec<AuditEvent>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
