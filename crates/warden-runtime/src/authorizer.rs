use std::collections::BTreeMap;
use warden_audit::{AuditEvent, AuditEventQueue};
use warden_core::decision::{DecisionRequest, DecisionResult};
use warden_policy::DecisionCache;

/// Decide and audit one request.
///
/// Cheap to clone; every clone shares the same cache and audit queue.
#[derive(Clone)]
pub struct Authorizer {
    cache: DecisionCache,
    queue: AuditEventQueue,
}

impl Authorizer {
    pub fn new(cache: DecisionCache, queue: AuditEventQueue) -> Self {
        Self { cache, queue }
    }

    /// Return the decision for `request` and queue an audit event for it.
    ///
    /// Never fails: an unavailable policy engine yields a deny, and an event
    /// the audit queue cannot take is dropped and counted.
    pub async fn authorize(
        &self,
        request: &DecisionRequest,
        extra_context: BTreeMap<String, String>,
    ) -> DecisionResult {
        let decision = self.cache.get_or_evaluate(request).await;

        let event = AuditEvent::for_decision(request, decision.clone()).extend_context(extra_context);
        let event_id = event.event_id;
        if let Err(e) = self.queue.enqueue(event) {
            tracing::warn!(event_id = %event_id, error = %e, "Audit event not recorded");
        }

        tracing::debug!(
            subject = %request.subject,
            action = %request.action,
            resource = %request.resource,
            allow = decision.allow,
            event_id = %event_id,
            "Authorization decided"
        );
        decision
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn queue(&self) -> &AuditEventQueue {
        &self.queue
    }
}
