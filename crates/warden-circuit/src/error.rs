//! Error types for the circuit breaker crate.

use std::time::Duration;
use thiserror::Error;

/// Why a guarded call did not produce a value.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is open (or a half-open probe is already running); the
    /// operation was not attempted.
    #[error("circuit open, retry after {retry_after:?}")]
    Open { retry_after: Duration },

    /// The operation exceeded the breaker's call timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The operation ran and returned an error.
    #[error("call failed: {0}")]
    Failed(E),
}

impl<E> CircuitError<E> {
    /// True when the call was rejected without being attempted.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Map the inner operation error.
    pub fn map_failed<F>(self, f: impl FnOnce(E) -> F) -> CircuitError<F> {
        match self {
            Self::Open { retry_after } => CircuitError::Open { retry_after },
            Self::Timeout(after) => CircuitError::Timeout(after),
            Self::Failed(e) => CircuitError::Failed(f(e)),
        }
    }
}
