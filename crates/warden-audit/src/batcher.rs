//! Groups queued events into batches and fans each batch out to every sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use warden_core::config::MAX_DURATION_SECS;

use crate::batch::Batch;
use crate::event::AuditEvent;
use crate::forwarder::SinkInbox;

/// Flushes when `batch_size` events are buffered or `batch_timeout` has passed
/// since the last flush, whichever comes first.
pub struct AuditBatcher {
    receiver: mpsc::Receiver<AuditEvent>,
    inboxes: Vec<SinkInbox>,
    batch_size: usize,
    batch_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    buffer: Vec<AuditEvent>,
}

impl AuditBatcher {
    pub fn new(
        receiver: mpsc::Receiver<AuditEvent>,
        inboxes: Vec<SinkInbox>,
        batch_size: usize,
        batch_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            receiver,
            inboxes,
            batch_size,
            batch_timeout,
            shutdown,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    /// Run until shutdown is signalled or every producer is gone. Events still
    /// queued at that point are batched and handed to the sinks before this
    /// returns.
    pub async fn run(mut self) {
        tracing::debug!(
            batch_size = self.batch_size,
            batch_timeout = ?self.batch_timeout,
            sinks = self.inboxes.len(),
            "Audit batcher started"
        );
        let mut deadline = self.next_deadline();

        loop {
            let shutdown = &mut self.shutdown;
            tokio::select! {
                biased;
                changed = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                    if changed {
                        tracing::debug!("Audit batcher received shutdown");
                    }
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.flush();
                    deadline = self.next_deadline();
                }
                next = self.receiver.recv() => match next {
                    Some(event) => {
                        self.buffer.push(event);
                        if self.buffer.len() >= self.batch_size {
                            self.flush();
                            deadline = self.next_deadline();
                        }
                    }
                    None => break,
                },
            }
        }

        self.receiver.close();
        while let Some(event) = self.receiver.recv().await {
            self.buffer.push(event);
            if self.buffer.len() >= self.batch_size {
                self.flush();
            }
        }
        self.flush();
        tracing::debug!("Audit batcher stopped");
    }

    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.batch_timeout)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_DURATION_SECS))
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let events = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let batch = Arc::new(Batch::new(events));
        tracing::debug!(batch_id = %batch.batch_id, events = batch.len(), "Flushing batch");

        for inbox in &self.inboxes {
            inbox.offer(batch.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterSink;
    use crate::error::DeliveryError;
    use crate::forwarder::{BACKLOG_FULL_REASON, DRAIN_TIMEOUT_REASON, SiemForwarder};
    use crate::retry::RetryPolicy;
    use crate::sink::Sink;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use warden_circuit::{CircuitBreaker, CircuitBreakerConfig};
    use warden_core::Metrics;
    use warden_core::decision::{DecisionResult, Sensitivity};

    /// Records when each batch arrived, relative to the test start.
    struct RecordingSink {
        start: Instant,
        received: Mutex<Vec<(Duration, Batch)>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError> {
            self.received
                .lock()
                .unwrap()
                .push((self.start.elapsed(), batch.clone()));
            Ok(())
        }
    }

    struct StuckSink;

    #[async_trait]
    impl Sink for StuckSink {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn send_batch(&self, _: &Batch) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::new(DecisionResult::new(true, "ok", Sensitivity::Low))
    }

    fn forwarder(
        sink: Arc<dyn Sink>,
        dead_letter: Arc<DeadLetterSink>,
        metrics: Arc<Metrics>,
    ) -> Arc<SiemForwarder> {
        let breaker =
            CircuitBreaker::new(sink.name().to_string(), CircuitBreakerConfig::default());
        Arc::new(SiemForwarder::new(
            sink,
            RetryPolicy::default(),
            breaker,
            dead_letter,
            metrics,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_and_timeout_flushes() {
        let metrics = Arc::new(Metrics::new());
        let dead_letter = Arc::new(DeadLetterSink::new(10, metrics.clone()));
        let sink = Arc::new(RecordingSink {
            start: Instant::now(),
            received: Mutex::new(Vec::new()),
        });
        let (_abort_tx, abort_rx) = watch::channel(false);
        let (inbox, delivery) = forwarder(sink.clone(), dead_letter.clone(), metrics).spawn(8, abort_rx);

        let (tx, rx) = mpsc::channel(1000);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..250 {
            tx.send(event()).await.unwrap();
        }
        let batcher = tokio::spawn(
            AuditBatcher::new(rx, vec![inbox], 100, Duration::from_secs(5), shutdown_rx).run(),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        shutdown_tx.send(true).unwrap();
        batcher.await.unwrap();
        delivery.await.unwrap();

        let received = sink.received.lock().unwrap();
        let sizes: Vec<usize> = received.iter().map(|(_, b)| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(received[0].0, Duration::ZERO);
        assert_eq!(received[1].0, Duration::ZERO);
        assert_eq!(received[2].0, Duration::from_secs(5));

        let ids: HashSet<_> = received
            .iter()
            .flat_map(|(_, b)| b.events.iter().map(|e| e.event_id))
            .collect();
        assert_eq!(ids.len(), 250);
        assert!(dead_letter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_queue_flushes_remainder() {
        let metrics = Arc::new(Metrics::new());
        let dead_letter = Arc::new(DeadLetterSink::new(10, metrics.clone()));
        let sink = Arc::new(RecordingSink {
            start: Instant::now(),
            received: Mutex::new(Vec::new()),
        });
        let (_abort_tx, abort_rx) = watch::channel(false);
        let (inbox, delivery) = forwarder(sink.clone(), dead_letter, metrics).spawn(8, abort_rx);

        let (tx, rx) = mpsc::channel(10);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..3 {
            tx.send(event()).await.unwrap();
        }
        drop(tx);

        // An unbounded flush interval must not overflow the deadline.
        AuditBatcher::new(rx, vec![inbox], 100, Duration::MAX, shutdown_rx)
            .run()
            .await;
        delivery.await.unwrap();

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1.len(), 3);
        assert_eq!(received[0].0, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_backlog_dead_letters_new_batches() {
        let metrics = Arc::new(Metrics::new());
        let dead_letter = Arc::new(DeadLetterSink::new(10, metrics.clone()));
        let (abort_tx, abort_rx) = watch::channel(false);
        let (inbox, delivery) =
            forwarder(Arc::new(StuckSink), dead_letter.clone(), metrics.clone()).spawn(1, abort_rx);

        let (tx, rx) = mpsc::channel(100);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..30 {
            tx.send(event()).await.unwrap();
        }
        drop(tx);

        // The delivery loop never gets to run, so only the first batch fits.
        AuditBatcher::new(rx, vec![inbox], 10, Duration::from_secs(5), shutdown_rx)
            .run()
            .await;

        let refused = dead_letter.records();
        assert_eq!(refused.len(), 2);
        assert!(refused.iter().all(|r| r.failure_reason == BACKLOG_FULL_REASON));
        assert!(refused.iter().all(|r| r.batch.len() == 10));

        abort_tx.send(true).unwrap();
        delivery.await.unwrap();
        let records = dead_letter.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].failure_reason, DRAIN_TIMEOUT_REASON);
        assert_eq!(metrics.dead_lettered_total("stuck"), 30);
    }
}
