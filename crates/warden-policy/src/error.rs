//! Error types for the policy crate.

use std::time::Duration;
use thiserror::Error;

/// Why the policy engine did not produce a verdict.
///
/// None of these reach the decision caller; the cache turns every one of them
/// into a fail-closed deny.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// No evaluator URL is configured.
    #[error("no policy evaluator configured")]
    NotConfigured,

    /// The engine answered with a non-success status.
    #[error("policy engine returned HTTP {status}")]
    Status { status: u16 },

    /// The request could not be sent or the response not read.
    #[error("policy engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not a policy result.
    #[error("malformed policy engine response: {0}")]
    Malformed(String),

    /// The engine did not answer within the call timeout.
    #[error("policy evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// The evaluator circuit is open; the engine was not called.
    #[error("policy evaluator circuit open, retry after {0:?}")]
    CircuitOpen(Duration),
}
