//! Policy evaluator guarded by a circuit breaker.

use std::sync::Arc;
use warden_circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitError};
use warden_core::Metrics;
use warden_core::config::EvaluatorConfig;
use warden_core::decision::DecisionRequest;

use crate::error::EvaluationError;
use crate::evaluator::{HttpPolicyEvaluator, PolicyEvaluator, PolicyVerdict};

/// Name of the evaluator breaker in logs and metrics.
pub const EVALUATOR_BREAKER: &str = "evaluator";

/// A [`PolicyEvaluator`] behind its circuit breaker and call timeout.
pub struct PolicyEvaluatorClient {
    evaluator: Arc<dyn PolicyEvaluator>,
    breaker: Arc<CircuitBreaker>,
}

impl PolicyEvaluatorClient {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, breaker: CircuitBreaker) -> Self {
        Self {
            evaluator,
            breaker: Arc::new(breaker),
        }
    }

    /// Wrap `evaluator` with a breaker tuned from `config`.
    pub fn with_config(
        evaluator: Arc<dyn PolicyEvaluator>,
        config: &EvaluatorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            EVALUATOR_BREAKER,
            CircuitBreakerConfig {
                failure_threshold: config.circuit_threshold,
                reset_timeout: config.circuit_reset_timeout(),
                call_timeout: Some(config.timeout()),
            },
        )
        .with_metrics(metrics);
        Self::new(evaluator, breaker)
    }

    /// Build an HTTP-backed client from configuration.
    pub fn from_config(
        config: &EvaluatorConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, EvaluationError> {
        let evaluator = HttpPolicyEvaluator::from_config(config)?;
        tracing::info!(url = %evaluator.url(), "Policy evaluator configured");
        Ok(Self::with_config(Arc::new(evaluator), config, metrics))
    }

    /// Evaluate through the breaker. An open circuit returns
    /// [`EvaluationError::CircuitOpen`] without calling the engine.
    pub async fn evaluate(&self, request: &DecisionRequest) -> Result<PolicyVerdict, EvaluationError> {
        self.breaker
            .call(|| self.evaluator.evaluate(request))
            .await
            .map_err(|e| match e {
                CircuitError::Open { retry_after } => EvaluationError::CircuitOpen(retry_after),
                CircuitError::Timeout(after) => EvaluationError::Timeout(after),
                CircuitError::Failed(inner) => inner,
            })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
