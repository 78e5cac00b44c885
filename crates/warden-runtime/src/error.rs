use thiserror::Error;
use warden_audit::DeadLetterError;
use warden_core::ConfigError;
use warden_policy::EvaluationError;

/// Errors raised while assembling a [`Runtime`](crate::Runtime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("policy evaluator: {0}")]
    Evaluator(#[from] EvaluationError),

    #[error("dead-letter sink: {0}")]
    DeadLetter(#[from] DeadLetterError),
}
