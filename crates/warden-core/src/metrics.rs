//! Prometheus counters for the decision path and the audit pipeline.
//!
//! One [`Metrics`] instance is built by the runtime and shared through an
//! `Arc` with every component that records something. Nothing here is global;
//! tests build their own instance and read the counters back.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for per-sink counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SinkLabels {
    pub sink: String,
}

/// Labels for circuit breaker transitions.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub breaker: String,
    pub from: String,
    pub to: String,
}

/// Counter registry for a Warden process.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,

    cache_hits: Counter,
    cache_misses: Counter,
    cache_coalesced: Counter,
    cache_stale_hits: Counter,
    fail_closed: Counter,

    circuit_transitions: Family<TransitionLabels, Counter>,

    audit_enqueued: Counter,
    queue_overflow: Counter,

    sink_delivered: Family<SinkLabels, Counter>,
    sink_batches_delivered: Family<SinkLabels, Counter>,
    sink_attempt_failures: Family<SinkLabels, Counter>,
    sink_retries: Family<SinkLabels, Counter>,
    sink_dead_lettered: Family<SinkLabels, Counter>,

    dead_letter_records: Counter,
    dead_letter_evicted: Counter,
    dead_letter_persist_failures: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("warden");

        let cache_hits = Counter::default();
        let cache_misses = Counter::default();
        let cache_coalesced = Counter::default();
        let cache_stale_hits = Counter::default();
        let fail_closed = Counter::default();
        let circuit_transitions = Family::<TransitionLabels, Counter>::default();
        let audit_enqueued = Counter::default();
        let queue_overflow = Counter::default();
        let sink_delivered = Family::<SinkLabels, Counter>::default();
        let sink_batches_delivered = Family::<SinkLabels, Counter>::default();
        let sink_attempt_failures = Family::<SinkLabels, Counter>::default();
        let sink_retries = Family::<SinkLabels, Counter>::default();
        let sink_dead_lettered = Family::<SinkLabels, Counter>::default();
        let dead_letter_records = Counter::default();
        let dead_letter_evicted = Counter::default();
        let dead_letter_persist_failures = Counter::default();

        registry.register(
            "cache_hits",
            "Decisions answered from the cache",
            cache_hits.clone(),
        );
        registry.register(
            "cache_misses",
            "Decisions that required a policy evaluation",
            cache_misses.clone(),
        );
        registry.register(
            "cache_coalesced",
            "Callers that waited on another caller's in-flight evaluation",
            cache_coalesced.clone(),
        );
        registry.register(
            "cache_stale_hits",
            "Cached decisions served while a background refresh ran",
            cache_stale_hits.clone(),
        );
        registry.register(
            "decisions_fail_closed",
            "Deny decisions issued because the policy engine was unavailable",
            fail_closed.clone(),
        );
        registry.register(
            "circuit_transitions",
            "Circuit breaker state transitions",
            circuit_transitions.clone(),
        );
        registry.register(
            "audit_enqueued",
            "Audit events accepted by the queue",
            audit_enqueued.clone(),
        );
        registry.register(
            "audit_queue_overflow",
            "Audit events dropped because the queue was full or closed",
            queue_overflow.clone(),
        );
        registry.register(
            "sink_delivered",
            "Audit events delivered to a sink",
            sink_delivered.clone(),
        );
        registry.register(
            "sink_batches_delivered",
            "Batches delivered to a sink",
            sink_batches_delivered.clone(),
        );
        registry.register(
            "sink_attempt_failures",
            "Failed delivery attempts",
            sink_attempt_failures.clone(),
        );
        registry.register(
            "sink_retries",
            "Backoff delays taken before retrying a delivery",
            sink_retries.clone(),
        );
        registry.register(
            "sink_dead_lettered",
            "Audit events routed to the dead-letter sink",
            sink_dead_lettered.clone(),
        );
        registry.register(
            "dead_letter_records",
            "Records written to the dead-letter sink",
            dead_letter_records.clone(),
        );
        registry.register(
            "dead_letter_evicted",
            "Dead-letter records evicted because the buffer was full",
            dead_letter_evicted.clone(),
        );
        registry.register(
            "dead_letter_persist_failures",
            "Dead-letter records that could not be appended to the mirror file",
            dead_letter_persist_failures.clone(),
        );

        Self {
            registry,
            cache_hits,
            cache_misses,
            cache_coalesced,
            cache_stale_hits,
            fail_closed,
            circuit_transitions,
            audit_enqueued,
            queue_overflow,
            sink_delivered,
            sink_batches_delivered,
            sink_attempt_failures,
            sink_retries,
            sink_dead_lettered,
            dead_letter_records,
            dead_letter_evicted,
            dead_letter_persist_failures,
        }
    }

    /// Render every counter in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    // ===== Decision path =====

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn record_cache_coalesced(&self) {
        self.cache_coalesced.inc();
    }

    pub fn record_cache_stale_hit(&self) {
        self.cache_stale_hits.inc();
    }

    pub fn record_fail_closed(&self) {
        self.fail_closed.inc();
    }

    pub fn record_circuit_transition(&self, breaker: &str, from: &str, to: &str) {
        self.circuit_transitions
            .get_or_create(&TransitionLabels {
                breaker: breaker.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
            .inc();
    }

    // ===== Audit pipeline =====

    pub fn record_enqueued(&self) {
        self.audit_enqueued.inc();
    }

    pub fn record_queue_overflow(&self) {
        self.queue_overflow.inc();
    }

    pub fn record_delivered(&self, sink: &str, events: u64) {
        let labels = sink_labels(sink);
        self.sink_delivered.get_or_create(&labels).inc_by(events);
        self.sink_batches_delivered.get_or_create(&labels).inc();
    }

    pub fn record_attempt_failure(&self, sink: &str) {
        self.sink_attempt_failures.get_or_create(&sink_labels(sink)).inc();
    }

    pub fn record_retry(&self, sink: &str) {
        self.sink_retries.get_or_create(&sink_labels(sink)).inc();
    }

    pub fn record_dead_lettered(&self, sink: &str, events: u64) {
        self.sink_dead_lettered
            .get_or_create(&sink_labels(sink))
            .inc_by(events);
    }

    pub fn record_dead_letter_write(&self) {
        self.dead_letter_records.inc();
    }

    pub fn record_dead_letter_eviction(&self) {
        self.dead_letter_evicted.inc();
    }

    pub fn record_dead_letter_persist_failure(&self) {
        self.dead_letter_persist_failures.inc();
    }

    // ===== Readers =====

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.get()
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.get()
    }

    pub fn cache_coalesced(&self) -> u64 {
        self.cache_coalesced.get()
    }

    pub fn cache_stale_hits(&self) -> u64 {
        self.cache_stale_hits.get()
    }

    pub fn fail_closed(&self) -> u64 {
        self.fail_closed.get()
    }

    pub fn circuit_transitions(&self, breaker: &str, from: &str, to: &str) -> u64 {
        self.circuit_transitions
            .get_or_create(&TransitionLabels {
                breaker: breaker.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
            .get()
    }

    pub fn audit_enqueued(&self) -> u64 {
        self.audit_enqueued.get()
    }

    pub fn queue_overflow(&self) -> u64 {
        self.queue_overflow.get()
    }

    /// Events delivered to `sink` (the `delivered_total` counter).
    pub fn delivered_total(&self, sink: &str) -> u64 {
        self.sink_delivered.get_or_create(&sink_labels(sink)).get()
    }

    pub fn batches_delivered(&self, sink: &str) -> u64 {
        self.sink_batches_delivered
            .get_or_create(&sink_labels(sink))
            .get()
    }

    pub fn attempt_failures(&self, sink: &str) -> u64 {
        self.sink_attempt_failures
            .get_or_create(&sink_labels(sink))
            .get()
    }

    pub fn retries(&self, sink: &str) -> u64 {
        self.sink_retries.get_or_create(&sink_labels(sink)).get()
    }

    /// Events dead-lettered for `sink` (the `dead_lettered_total` counter).
    pub fn dead_lettered_total(&self, sink: &str) -> u64 {
        self.sink_dead_lettered.get_or_create(&sink_labels(sink)).get()
    }

    pub fn dead_letter_records(&self) -> u64 {
        self.dead_letter_records.get()
    }

    pub fn dead_letter_evicted(&self) -> u64 {
        self.dead_letter_evicted.get()
    }

    pub fn dead_letter_persist_failures(&self) -> u64 {
        self.dead_letter_persist_failures.get()
    }
}

fn sink_labels(sink: &str) -> SinkLabels {
    SinkLabels {
        sink: sink.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_delivered("splunk", 100);
        metrics.record_delivered("splunk", 50);
        metrics.record_dead_lettered("datadog", 100);

        assert_eq!(metrics.cache_hits(), 2);
        assert_eq!(metrics.cache_misses(), 1);
        assert_eq!(metrics.delivered_total("splunk"), 150);
        assert_eq!(metrics.batches_delivered("splunk"), 2);
        assert_eq!(metrics.delivered_total("datadog"), 0);
        assert_eq!(metrics.dead_lettered_total("datadog"), 100);
    }

    #[test]
    fn test_encode_uses_prefix_and_labels() {
        let metrics = Metrics::new();
        metrics.record_queue_overflow();
        metrics.record_circuit_transition("evaluator", "closed", "open");
        metrics.record_delivered("splunk", 3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("warden_audit_queue_overflow_total 1"));
        assert!(text.contains("warden_circuit_transitions_total{"));
        assert!(text.contains("breaker=\"evaluator\""));
        assert!(text.contains("warden_sink_delivered_total{sink=\"splunk\"} 3"));
    }
}
