//! Policy evaluator configuration.
//!
//! The endpoint URL and bearer token can each be given inline or through an
//! environment variable. The `*_env` form takes precedence.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, check_seconds};

/// Configuration for the external policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Environment variable holding the evaluator URL. Highest precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,

    /// Evaluator URL, e.g. `http://opa:8181/v1/data/warden/allow`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Environment variable holding a bearer token for the evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Bearer token for the evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Consecutive failures before the evaluator circuit opens.
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed.
    #[serde(default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            url_env: None,
            url: None,
            token_env: None,
            token: None,
            timeout: default_timeout(),
            circuit_threshold: default_circuit_threshold(),
            circuit_reset_timeout: default_circuit_reset_timeout(),
        }
    }
}

impl EvaluatorConfig {
    /// Resolve the evaluator URL, checking `url_env` first.
    pub fn resolve_url(&self) -> Option<String> {
        if let Some(env_var) = &self.url_env
            && let Ok(url) = std::env::var(env_var)
        {
            return Some(url);
        }
        self.url.clone()
    }

    /// Resolve the bearer token, checking `token_env` first.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(env_var) = &self.token_env
            && let Ok(token) = std::env::var(env_var)
        {
            return Some(token);
        }
        self.token.clone()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn circuit_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_reset_timeout)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_threshold == 0 {
            return Err(ConfigError::Config(
                "evaluator.circuit_threshold must be at least 1".into(),
            ));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Config(
                "evaluator.timeout must be at least 1 second".into(),
            ));
        }
        check_seconds("evaluator.timeout", self.timeout)?;
        check_seconds("evaluator.circuit_reset_timeout", self.circuit_reset_timeout)?;
        if let Some(url) = &self.url
            && url.trim().is_empty()
        {
            return Err(ConfigError::Config("evaluator.url is empty".into()));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    5
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout() -> u64 {
    30
}
