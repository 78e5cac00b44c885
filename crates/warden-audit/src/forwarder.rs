//! Per-sink delivery with retry, backoff and circuit breaking.
//!
//! Each configured sink gets one [`SiemForwarder`] and one delivery loop task
//! reading a bounded backlog of batches. A batch is retried up to
//! `max_attempts` times; when the attempts run out or the sink's circuit is
//! open, the whole batch is dead-lettered as one record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use warden_circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitError};
use warden_core::Metrics;
use warden_core::config::{MAX_CAPACITY, SinkConfig};

use crate::batch::Batch;
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::sink::Sink;

/// Dead-letter reason for batches refused because a sink's backlog is full.
pub const BACKLOG_FULL_REASON: &str = "sink backlog full";

/// Dead-letter reason for batches still held when the drain window closes.
pub const DRAIN_TIMEOUT_REASON: &str = "shutdown drain timeout";

/// Outcome of the latest sink health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkCheck {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Delivers batches to one sink.
pub struct SiemForwarder {
    sink: Arc<dyn Sink>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    dead_letter: Arc<DeadLetterSink>,
    metrics: Arc<Metrics>,
    health_interval: Option<Duration>,
    health_timeout: Duration,
    last_check: Mutex<Option<SinkCheck>>,
}

impl SiemForwarder {
    pub fn new(
        sink: Arc<dyn Sink>,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
        dead_letter: Arc<DeadLetterSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sink,
            retry,
            breaker: Arc::new(breaker),
            dead_letter,
            metrics,
            health_interval: None,
            health_timeout: Duration::from_secs(30),
            last_check: Mutex::new(None),
        }
    }

    /// Run [`Sink::health_check`] every `interval`, each bounded by `timeout`.
    pub fn with_health_checks(mut self, interval: Duration, timeout: Duration) -> Self {
        self.health_interval = Some(interval);
        self.health_timeout = timeout;
        self
    }

    /// Build a forwarder tuned by `config`. The breaker is named after the
    /// sink and bounds each attempt by the sink timeout.
    pub fn from_config(
        sink: Arc<dyn Sink>,
        config: &SinkConfig,
        dead_letter: Arc<DeadLetterSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.name.clone(),
            CircuitBreakerConfig {
                failure_threshold: config.circuit_threshold,
                reset_timeout: config.circuit_reset_timeout(),
                call_timeout: Some(config.timeout()),
            },
        )
        .with_metrics(metrics.clone());
        let forwarder = Self::new(
            sink,
            RetryPolicy::from_sink(config),
            breaker,
            dead_letter,
            metrics,
        );
        match config.health_interval() {
            Some(interval) => forwarder.with_health_checks(interval, config.timeout()),
            None => forwarder,
        }
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Result of the most recent health check, if one has run.
    pub fn last_check(&self) -> Option<SinkCheck> {
        self.last_check
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Check the sink once and remember the outcome. Does not go through the
    /// circuit breaker.
    pub async fn check_health(&self) -> SinkCheck {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.health_timeout, self.sink.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.health_timeout)),
        };
        let check = SinkCheck {
            healthy: outcome.is_ok(),
            checked_at: Utc::now(),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error: outcome.err().map(|e| e.to_string()),
        };
        match &check.error {
            Some(error) => tracing::warn!(sink = %self.name(), error = %error, "Sink health check failed"),
            None => tracing::debug!(sink = %self.name(), latency_ms = check.latency_ms, "Sink healthy"),
        }
        *self.last_check.lock().unwrap_or_else(|e| e.into_inner()) = Some(check.clone());
        check
    }

    /// Start periodic health checks, if configured. The task runs until
    /// aborted.
    pub fn spawn_health_checks(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.health_interval?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_health().await;
            }
        }))
    }

    /// Try to deliver `batch`, retrying with backoff.
    ///
    /// Returns [`DeliveryError::Exhausted`] when every attempt failed or the
    /// circuit rejected an attempt. Nothing is dead-lettered here.
    pub async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let name = self.name();
        let mut first_failed_at: Option<DateTime<Utc>> = None;
        let mut attempts = 0;
        let mut last_error: Option<DeliveryError> = None;

        for attempt in 1..=self.retry.max_attempts {
            let outcome = self
                .breaker
                .call(|| self.sink.send_batch(batch))
                .await
                .map_err(|e| match e {
                    CircuitError::Open { retry_after } => DeliveryError::CircuitOpen(retry_after),
                    CircuitError::Timeout(after) => DeliveryError::Timeout(after),
                    CircuitError::Failed(inner) => inner,
                });

            match outcome {
                Ok(()) => {
                    self.metrics.record_delivered(name, batch.len() as u64);
                    tracing::debug!(
                        sink = %name,
                        batch_id = %batch.batch_id,
                        events = batch.len(),
                        attempt,
                        "Batch delivered"
                    );
                    return Ok(());
                }
                Err(e @ DeliveryError::CircuitOpen(_)) => {
                    first_failed_at.get_or_insert_with(Utc::now);
                    last_error = Some(e);
                    break;
                }
                Err(e) => {
                    attempts = attempt;
                    first_failed_at.get_or_insert_with(Utc::now);
                    self.metrics.record_attempt_failure(name);
                    tracing::debug!(
                        sink = %name,
                        batch_id = %batch.batch_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.retry.max_attempts {
                let delay = self.retry.delay_for(attempt);
                self.metrics.record_retry(name);
                tokio::time::sleep(delay).await;
            }
        }

        Err(DeliveryError::Exhausted {
            attempts,
            first_failed_at: first_failed_at.unwrap_or_else(Utc::now),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no delivery attempt made".to_string()),
        })
    }

    /// Deliver `batch`, dead-lettering it on failure. Returns whether it was
    /// delivered.
    pub async fn forward(&self, batch: &Batch) -> bool {
        match self.deliver(batch).await {
            Ok(()) => true,
            Err(DeliveryError::Exhausted {
                attempts,
                first_failed_at,
                reason,
            }) => {
                self.dead_letter(batch, reason, first_failed_at, attempts);
                false
            }
            Err(other) => {
                self.dead_letter(batch, other.to_string(), Utc::now(), 0);
                false
            }
        }
    }

    /// Move `batch` to the dead-letter sink on behalf of this sink.
    pub fn dead_letter(
        &self,
        batch: &Batch,
        reason: impl Into<String>,
        first_failed_at: DateTime<Utc>,
        attempts: u32,
    ) {
        let reason = reason.into();
        tracing::warn!(
            sink = %self.name(),
            batch_id = %batch.batch_id,
            events = batch.len(),
            attempts,
            reason = %reason,
            "Batch dead-lettered"
        );
        self.dead_letter.write(DeadLetterRecord::new(
            batch.clone(),
            self.name(),
            reason,
            first_failed_at,
            attempts,
        ));
    }

    /// Start this forwarder's delivery loop with a backlog of `backlog`
    /// batches. Setting `abort` to `true` makes the loop dead-letter whatever
    /// it still holds and exit.
    pub fn spawn(
        self: Arc<Self>,
        backlog: usize,
        abort: watch::Receiver<bool>,
    ) -> (SinkInbox, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(backlog.clamp(1, MAX_CAPACITY));
        let inbox = SinkInbox {
            forwarder: self.clone(),
            sender,
        };
        let handle = tokio::spawn(self.run(receiver, abort));
        (inbox, handle)
    }

    async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<Arc<Batch>>,
        mut abort: watch::Receiver<bool>,
    ) {
        tracing::debug!(sink = %self.name(), "Delivery loop started");
        let mut aborted = false;

        loop {
            let batch = tokio::select! {
                biased;
                _ = abort_signalled(&mut abort) => {
                    aborted = true;
                    break;
                }
                next = receiver.recv() => match next {
                    Some(batch) => batch,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = abort_signalled(&mut abort) => {
                    self.dead_letter(&batch, DRAIN_TIMEOUT_REASON, Utc::now(), 0);
                    aborted = true;
                    break;
                }
                _ = self.forward(&batch) => {}
            }
        }

        if aborted {
            receiver.close();
            while let Some(batch) = receiver.recv().await {
                self.dead_letter(&batch, DRAIN_TIMEOUT_REASON, Utc::now(), 0);
            }
        }
        tracing::debug!(sink = %self.name(), aborted, "Delivery loop stopped");
    }
}

/// Resolves once `abort` holds `true`. Never resolves if the sender is gone.
async fn abort_signalled(abort: &mut watch::Receiver<bool>) {
    let signalled = abort.wait_for(|aborted| *aborted).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

/// The batcher's handle to one forwarder's backlog.
#[derive(Clone)]
pub struct SinkInbox {
    forwarder: Arc<SiemForwarder>,
    sender: mpsc::Sender<Arc<Batch>>,
}

impl SinkInbox {
    pub fn sink_name(&self) -> &str {
        self.forwarder.name()
    }

    /// Queue `batch` for delivery without waiting. A full or closed backlog
    /// dead-letters the batch for this sink.
    pub fn offer(&self, batch: Arc<Batch>) -> bool {
        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(batch)) => {
                self.forwarder
                    .dead_letter(&batch, BACKLOG_FULL_REASON, Utc::now(), 0);
                false
            }
            Err(mpsc::error::TrySendError::Closed(batch)) => {
                self.forwarder
                    .dead_letter(&batch, "sink delivery loop stopped", Utc::now(), 0);
                false
            }
        }
    }

    /// Batches waiting in this sink's backlog.
    pub fn backlog(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}
