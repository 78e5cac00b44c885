//! Wiring for the audit side: queue, batcher, one delivery loop per sink and
//! the dead-letter sink, plus bounded-time shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_core::Metrics;
use warden_core::config::{AuditConfig, SinkConfig};

use crate::batcher::AuditBatcher;
use crate::dead_letter::DeadLetterSink;
use crate::error::DeadLetterError;
use crate::forwarder::SiemForwarder;
use crate::queue::AuditEventQueue;
use crate::sink::HttpSink;

/// Tasks owned by a running pipeline, taken by the first shutdown.
struct PipelineTasks {
    batcher: JoinHandle<()>,
    deliveries: Vec<JoinHandle<()>>,
    health_checks: Vec<JoinHandle<()>>,
}

/// A running audit pipeline. Must be started inside a Tokio runtime.
pub struct AuditPipeline {
    queue: AuditEventQueue,
    dead_letter: Arc<DeadLetterSink>,
    forwarders: Vec<Arc<SiemForwarder>>,
    shutdown: watch::Sender<bool>,
    abort: watch::Sender<bool>,
    tasks: Mutex<Option<PipelineTasks>>,
}

impl AuditPipeline {
    /// Start the batcher and one delivery loop per forwarder.
    pub fn start(
        config: &AuditConfig,
        forwarders: Vec<Arc<SiemForwarder>>,
        dead_letter: Arc<DeadLetterSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (queue, receiver) = AuditEventQueue::channel(config.queue_capacity, metrics);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (abort, abort_rx) = watch::channel(false);

        let mut inboxes = Vec::with_capacity(forwarders.len());
        let mut deliveries = Vec::with_capacity(forwarders.len());
        for forwarder in &forwarders {
            let (inbox, handle) = forwarder.clone().spawn(config.sink_backlog, abort_rx.clone());
            inboxes.push(inbox);
            deliveries.push(handle);
        }

        let health_checks = forwarders
            .iter()
            .filter_map(|forwarder| forwarder.clone().spawn_health_checks())
            .collect();

        if forwarders.is_empty() {
            tracing::warn!("No audit sinks enabled; every batch will be discarded");
        }

        let batcher = tokio::spawn(
            AuditBatcher::new(
                receiver,
                inboxes,
                config.batch_size,
                config.batch_timeout(),
                shutdown_rx,
            )
            .run(),
        );

        tracing::info!(
            sinks = forwarders.len(),
            queue_capacity = config.queue_capacity,
            batch_size = config.batch_size,
            "Audit pipeline started"
        );

        Self {
            queue,
            dead_letter,
            forwarders,
            shutdown,
            abort,
            tasks: Mutex::new(Some(PipelineTasks {
                batcher,
                deliveries,
                health_checks,
            })),
        }
    }

    /// Build HTTP sinks for every enabled entry in `sinks` and start.
    pub fn from_config<'a>(
        config: &AuditConfig,
        sinks: impl IntoIterator<Item = &'a SinkConfig>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DeadLetterError> {
        let dead_letter = Arc::new(DeadLetterSink::from_config(
            &config.dead_letter,
            metrics.clone(),
        )?);
        let forwarders = sinks
            .into_iter()
            .filter(|sink| sink.enabled)
            .map(|sink| {
                Arc::new(SiemForwarder::from_config(
                    Arc::new(HttpSink::from_config(sink)),
                    sink,
                    dead_letter.clone(),
                    metrics.clone(),
                ))
            })
            .collect();
        Ok(Self::start(config, forwarders, dead_letter, metrics))
    }

    /// Producer handle for the decision path.
    pub fn queue(&self) -> &AuditEventQueue {
        &self.queue
    }

    pub fn dead_letter(&self) -> &Arc<DeadLetterSink> {
        &self.dead_letter
    }

    pub fn forwarders(&self) -> &[Arc<SiemForwarder>] {
        &self.forwarders
    }

    /// Stop accepting events and deliver what is buffered.
    ///
    /// Returns `true` when every batch reached a sink or the dead-letter sink
    /// within `drain_timeout`. Otherwise the delivery loops are aborted, their
    /// remaining batches are dead-lettered, and `false` is returned. Calls
    /// after the first return `true` immediately.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(PipelineTasks {
            batcher,
            deliveries,
            health_checks,
        }) = tasks
        else {
            return true;
        };

        tracing::info!(drain_timeout = ?drain_timeout, "Draining audit pipeline");
        for checks in &health_checks {
            checks.abort();
        }
        let _ = self.shutdown.send(true);

        let drain = async move {
            if let Err(e) = batcher.await {
                tracing::error!(error = %e, "Audit batcher task failed");
            }
            for handle in deliveries {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Sink delivery task failed");
                }
            }
        };
        tokio::pin!(drain);

        let drained = match tokio::time::timeout(drain_timeout, &mut drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    drain_timeout = ?drain_timeout,
                    "Audit drain timed out; dead-lettering undelivered batches"
                );
                let _ = self.abort.send(true);
                drain.await;
                false
            }
        };

        tracing::info!(
            drained,
            dead_letters = self.dead_letter.len(),
            "Audit pipeline stopped"
        );
        drained
    }
}
