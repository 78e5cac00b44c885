//! # warden-runtime
//!
//! Assembles the decision and audit sides into one unit.
//!
//! - [`Authorizer`]: the call every gateway request goes through. It asks the
//!   decision cache, records an audit event and always returns a decision.
//! - [`Runtime`]: builds metrics, evaluator, cache, sinks and the audit
//!   pipeline from a [`WardenConfig`](warden_core::WardenConfig), reports
//!   health and owns shutdown.

pub mod authorizer;
pub mod error;
pub mod runtime;

pub use authorizer::Authorizer;
pub use error::RuntimeError;
pub use runtime::{HealthReport, HealthStatus, Runtime, SinkHealth};
