//! # warden-policy
//!
//! Authorization decisions for Warden.
//!
//! - [`evaluator`]: the [`PolicyEvaluator`] seam and its HTTP implementation
//!   for OPA-style engines
//! - [`client`]: [`PolicyEvaluatorClient`], the evaluator behind a circuit
//!   breaker and call timeout
//! - [`cache`]: [`DecisionCache`], a sharded TTL cache that runs at most one
//!   evaluation per key and fails closed when the engine is unavailable
//!
//! ## Fail-closed
//!
//! [`DecisionCache::get_or_evaluate`] never returns an error. When the engine
//! cannot answer, every waiting caller receives a deny with the reason
//! `"policy evaluation unavailable"` and nothing is cached.

pub mod cache;
pub mod client;
pub mod error;
pub mod evaluator;

pub use cache::DecisionCache;
pub use client::PolicyEvaluatorClient;
pub use error::EvaluationError;
pub use evaluator::{HttpPolicyEvaluator, PolicyEvaluator, PolicyVerdict};
