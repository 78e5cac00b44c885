//! Audit event types.
//!
//! One [`AuditEvent`] is produced for every authorization decision, allow or
//! deny. Events are immutable once built and are shared read-only by every
//! sink that receives the batch they belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use warden_core::decision::{DecisionRequest, DecisionResult};

/// A recorded authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// The decision being recorded.
    pub decision: DecisionResult,

    /// Request attributes and caller-supplied metadata.
    ///
    /// Always carries `subject`, `action` and `resource`; `tool` when the
    /// request named one.
    pub context: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Create an event with an empty context.
    pub fn new(decision: DecisionResult) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            decision,
            context: BTreeMap::new(),
        }
    }

    /// Create an event for `decision`, copying the request attributes into
    /// the context.
    pub fn for_decision(request: &DecisionRequest, decision: DecisionResult) -> Self {
        let mut event = Self::new(decision)
            .with_context("subject", &request.subject)
            .with_context("action", &request.action)
            .with_context("resource", &request.resource);
        if let Some(tool) = &request.tool {
            event = event.with_context("tool", tool);
        }
        event
    }

    /// Add one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Add several context entries. Existing request attributes are kept.
    pub fn extend_context<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.context.entry(key.into()).or_insert_with(|| value.into());
        }
        self
    }

    /// Context value for `key`.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Format the event as a human-readable log line.
    ///
    /// Format: `[timestamp] ALLOW|DENY subject=... action=... resource=... [tool=...] reason="..."`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} subject={} action={} resource={}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            if self.decision.allow { "ALLOW" } else { "DENY" },
            self.context_value("subject").unwrap_or("-"),
            self.context_value("action").unwrap_or("-"),
            self.context_value("resource").unwrap_or("-"),
        );

        if let Some(tool) = self.context_value("tool") {
            line.push_str(&format!(" tool={}", tool));
        }

        line.push_str(&format!(
            " sensitivity={} reason=\"{}\"",
            self.decision.sensitivity,
            self.decision.reason.replace('"', "'")
        ));
        line
    }
}
