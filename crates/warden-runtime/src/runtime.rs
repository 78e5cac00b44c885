//! Runtime lifecycle: construction from configuration, health and shutdown.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use warden_audit::{AuditPipeline, DeadLetterSink, SiemForwarder, Sink, SinkCheck};
use warden_circuit::{CircuitBreakerState, CircuitState};
use warden_core::{Metrics, WardenConfig};
use warden_policy::{DecisionCache, PolicyEvaluator, PolicyEvaluatorClient};

use crate::authorizer::Authorizer;
use crate::error::RuntimeError;

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every circuit is closed or probing and no sink failed its last
    /// health check.
    Ok,
    /// A circuit is open or a sink failed its last health check.
    Degraded,
}

/// Circuit state and latest health check of one sink.
#[derive(Debug, Clone, Serialize)]
pub struct SinkHealth {
    pub name: String,
    pub circuit: CircuitBreakerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<SinkCheck>,
}

impl SinkHealth {
    fn is_degraded(&self) -> bool {
        self.circuit.state == CircuitState::Open
            || self.last_check.as_ref().is_some_and(|check| !check.healthy)
    }
}

/// Point-in-time view served at `/healthz`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub policy_version: u64,
    pub cache_entries: usize,
    pub evaluator: CircuitBreakerState,
    pub sinks: Vec<SinkHealth>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub dead_letters: usize,
}

/// A running Warden instance.
pub struct Runtime {
    config: WardenConfig,
    metrics: Arc<Metrics>,
    authorizer: Authorizer,
    pipeline: AuditPipeline,
    sweeper: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Validate `config` and start everything it describes: the HTTP policy
    /// evaluator, the decision cache and its sweeper, one HTTP sink per
    /// enabled entry and the audit pipeline.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(config: WardenConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());

        let client = PolicyEvaluatorClient::from_config(&config.evaluator, metrics.clone())?;
        let pipeline = AuditPipeline::from_config(&config.audit, &config.sinks, metrics.clone())?;
        Ok(Self::assemble(config, client, pipeline, metrics))
    }

    /// Start with caller-supplied evaluator and sinks. Sink tuning is taken
    /// from the `config.sinks` entry with the same name, or its defaults when
    /// there is none.
    pub fn with_components(
        config: WardenConfig,
        evaluator: Arc<dyn PolicyEvaluator>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());

        let client =
            PolicyEvaluatorClient::with_config(evaluator, &config.evaluator, metrics.clone());
        let dead_letter = Arc::new(DeadLetterSink::from_config(
            &config.audit.dead_letter,
            metrics.clone(),
        )?);
        let forwarders = sinks
            .into_iter()
            .map(|sink| {
                let tuning = config
                    .sinks
                    .iter()
                    .find(|s| s.name == sink.name())
                    .cloned()
                    .unwrap_or_else(|| warden_core::SinkConfig::new(sink.name(), ""));
                Arc::new(SiemForwarder::from_config(
                    sink,
                    &tuning,
                    dead_letter.clone(),
                    metrics.clone(),
                ))
            })
            .collect();
        let pipeline =
            AuditPipeline::start(&config.audit, forwarders, dead_letter, metrics.clone());
        Ok(Self::assemble(config, client, pipeline, metrics))
    }

    fn assemble(
        config: WardenConfig,
        client: PolicyEvaluatorClient,
        pipeline: AuditPipeline,
        metrics: Arc<Metrics>,
    ) -> Self {
        let cache = DecisionCache::new(Arc::new(client), config.cache.clone(), metrics.clone());
        let sweeper = cache.spawn_sweeper();
        let authorizer = Authorizer::new(cache, pipeline.queue().clone());

        tracing::info!(
            sinks = pipeline.forwarders().len(),
            sweeper = sweeper.is_some(),
            "Warden runtime started"
        );

        Self {
            config,
            metrics,
            authorizer,
            pipeline,
            sweeper,
        }
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Invalidate every cached decision by moving to a new policy version.
    pub fn reload_policy(&self) -> u64 {
        self.authorizer.cache().bump_policy_version()
    }

    pub fn health(&self) -> HealthReport {
        let cache = self.authorizer.cache();
        let evaluator = cache.client().breaker().snapshot();
        let sinks: Vec<SinkHealth> = self
            .pipeline
            .forwarders()
            .iter()
            .map(|f| SinkHealth {
                name: f.name().to_string(),
                circuit: f.breaker().snapshot(),
                last_check: f.last_check(),
            })
            .collect();

        let degraded =
            evaluator.state == CircuitState::Open || sinks.iter().any(SinkHealth::is_degraded);
        let queue = self.pipeline.queue();

        HealthReport {
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Ok
            },
            policy_version: cache.policy_version(),
            cache_entries: cache.len(),
            evaluator,
            sinks,
            queue_depth: queue.depth(),
            queue_capacity: queue.capacity(),
            dead_letters: self.pipeline.dead_letter().len(),
        }
    }

    /// Stop the cache sweeper and drain the audit pipeline within
    /// `audit.drain_timeout`. Returns whether the drain finished in time.
    ///
    /// Takes `&self` so a runtime shared with request handlers can still be
    /// drained; later calls return `true` without doing anything.
    pub async fn shutdown(&self) -> bool {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
        self.pipeline
            .shutdown(self.config.audit.drain_timeout())
            .await
    }
}
