//! # warden-core
//!
//! Types shared by every Warden crate:
//!
//! - [`decision`]: authorization requests, results, sensitivity tiers and the
//!   deterministic [`DecisionKey`] used by the decision cache
//! - [`config`]: the YAML configuration model (`warden.yaml`)
//! - [`metrics`]: the Prometheus counters exported at the metrics boundary

// Configuration types shared across all Warden crates
pub mod config;
pub mod decision;
pub mod metrics;

pub use config::{
    AuditConfig, CacheConfig, ConfigError, DeadLetterConfig, EvaluatorConfig,
    ObservabilityConfig, SinkConfig, SinkKind, WardenConfig,
};
pub use decision::{
    DecisionKey, DecisionRequest, DecisionResult, EVALUATION_UNAVAILABLE_REASON, Sensitivity,
};
pub use metrics::Metrics;
