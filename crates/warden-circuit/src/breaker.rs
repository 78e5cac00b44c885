//! Circuit breaker state machine.
//!
//! States:
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls are rejected without being attempted
//! - HalfOpen: one probe call is let through to test recovery
//!
//! All state lives behind one mutex that is never held across an await.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use warden_core::Metrics;

use crate::error::CircuitError;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
    /// Optional bound on each call. Expiry counts as a failure.
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            call_timeout: None,
        }
    }
}

/// Serializable point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Circuit breaker for one protected call site.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    metrics: Option<Arc<Metrics>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                probe_in_flight: false,
            }),
            metrics: None,
        }
    }

    /// Count transitions in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker.
    ///
    /// While open, `op` is never invoked. A half-open probe whose future is
    /// dropped before finishing is recorded as a failed probe.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result.map_err(CircuitError::Failed),
                Err(_) => Err(CircuitError::Timeout(limit)),
            },
            None => op().await.map_err(CircuitError::Failed),
        };

        match &outcome {
            Ok(_) => permit.succeeded(),
            Err(_) => permit.failed(),
        }
        outcome
    }

    /// Current state. An Open circuit whose reset timeout has passed stays
    /// Open until the next call claims the probe.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// True when a call made now would be rejected outright.
    pub fn is_open(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => inner.probe_in_flight,
            CircuitState::Open => !self.reset_elapsed(&inner),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
        }
    }

    /// Force the circuit closed and forget past failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset_elapsed(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_none_or(|opened| opened.elapsed() >= self.config.reset_timeout)
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                if self.reset_elapsed(&inner) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                } else {
                    let retry_after = inner
                        .opened_at
                        .map(|opened| self.config.reset_timeout.saturating_sub(opened.elapsed()))
                        .unwrap_or_default();
                    Err(CircuitError::Open { retry_after })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitError::Open {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            // Calls admitted before the circuit opened do not move it.
            _ if !probe => {}
            _ => {
                inner.probe_in_flight = false;
                inner.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                tracing::debug!(
                    breaker = %self.name,
                    consecutive_failures = inner.consecutive_failures,
                    "Guarded call failed"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            _ if !probe => {}
            _ => {
                inner.probe_in_flight = false;
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                self.open(&mut inner);
            }
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.opened_at = Some(Instant::now());
        inner.opened_at_wall = Some(Utc::now());
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        if to == CircuitState::Closed {
            inner.opened_at = None;
            inner.opened_at_wall = None;
        }

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                consecutive_failures = inner.consecutive_failures,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker state change"
            ),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_transition(&self.name, from.as_str(), to.as_str());
        }
    }
}

/// Admission ticket for one call. Settling it records the outcome; dropping
/// it unsettled records a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(breaker = %self.breaker.name, "Guarded call abandoned");
            self.breaker.on_failure(self.probe);
        }
    }
}
