//! # warden-circuit
//!
//! A closed/open/half-open circuit breaker for async call sites.
//!
//! Warden keeps one breaker in front of the policy evaluator and one per SIEM
//! sink. A breaker counts consecutive failures, rejects calls outright while
//! open, and lets a single probe through once the reset timeout has passed.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use warden_circuit::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     "evaluator",
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         reset_timeout: Duration::from_secs(30),
//!         call_timeout: Some(Duration::from_secs(5)),
//!     },
//! );
//!
//! let result = breaker.call(|| async { Ok::<_, std::io::Error>(42) }).await;
//! # let _ = result;
//! # }
//! ```

pub mod breaker;
pub mod error;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState};
pub use error::CircuitError;
