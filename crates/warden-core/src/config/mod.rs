//! Configuration types for Warden.
//!
//! All settings live in a single YAML file (`warden.yaml`) deserialized into
//! [`WardenConfig`]. Every field has a default, so an empty file is a valid
//! (sink-less, evaluator-less) configuration.
//!
//! # Sections
//!
//! - **cache**: decision cache TTLs per sensitivity tier
//! - **evaluator**: policy engine endpoint, timeout and circuit breaker
//! - **audit**: queue, batching, shutdown drain and dead-letter settings
//! - **sinks**: one entry per SIEM destination, each independently tunable
//! - **observability**: metrics/health listener and log filter

pub mod audit;
pub mod cache;
pub mod evaluator;
pub mod sink;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub use audit::{AuditConfig, DeadLetterConfig};
pub use cache::CacheConfig;
pub use evaluator::EvaluatorConfig;
pub use sink::{SinkConfig, SinkKind};

/// Complete Warden configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Decision cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Policy evaluator settings.
    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    /// Audit pipeline settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// SIEM sinks. Every batch is fanned out to each enabled entry.
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Listen address for `/healthz` and `/metrics`.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:9464".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Largest accepted value for any field given in seconds (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Largest accepted queue, backlog or buffer size.
pub const MAX_CAPACITY: usize = 1 << 24;

pub(crate) fn check_seconds(field: &str, value: u64) -> Result<(), ConfigError> {
    if value > MAX_DURATION_SECS {
        return Err(ConfigError::Config(format!(
            "{} must be at most {} seconds",
            field, MAX_DURATION_SECS
        )));
    }
    Ok(())
}

pub(crate) fn check_capacity(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Config(format!("{} must be at least 1", field)));
    }
    if value > MAX_CAPACITY {
        return Err(ConfigError::Config(format!(
            "{} must be at most {}",
            field, MAX_CAPACITY
        )));
    }
    Ok(())
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load and validate in one step.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Sinks that are switched on.
    pub fn enabled_sinks(&self) -> impl Iterator<Item = &SinkConfig> {
        self.sinks.iter().filter(|s| s.enabled)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.evaluator.validate()?;
        self.audit.validate()?;

        let mut names = HashSet::new();
        for sink in &self.sinks {
            sink.validate()?;
            if !names.insert(sink.name.as_str()) {
                return Err(ConfigError::Config(format!(
                    "duplicate sink name '{}'",
                    sink.name
                )));
            }
        }

        Ok(())
    }
}
