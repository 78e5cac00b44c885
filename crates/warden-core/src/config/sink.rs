//! SIEM sink configuration.
//!
//! Each entry under `sinks:` describes one destination with its own retry,
//! timeout and circuit breaker settings, so sinks are tuned independently.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, MAX_DURATION_SECS, check_seconds};

/// Wire format spoken by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// JSON array of audit events with a bearer token.
    #[default]
    Json,
    /// Splunk HTTP Event Collector.
    SplunkHec,
    /// Datadog Logs intake API.
    Datadog,
}

/// Configuration for one SIEM sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Unique sink name, used in logs, metrics and dead-letter records.
    pub name: String,

    /// Wire format.
    #[serde(default)]
    pub kind: SinkKind,

    /// Whether this sink receives batches.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Endpoint the batch is POSTed to.
    #[serde(default)]
    pub url: String,

    /// Environment variable holding the credential. Highest precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Credential (bearer token, HEC token or API key depending on `kind`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Delivery attempts before the batch is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff base in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    /// Upper bound on a single backoff delay in seconds.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap: f64,

    /// Consecutive failed attempts before this sink's circuit opens.
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed.
    #[serde(default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout: u64,

    /// Splunk index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Splunk sourcetype.
    #[serde(default = "default_sourcetype")]
    pub sourcetype: String,

    /// Splunk source / Datadog ddsource.
    #[serde(default = "default_source")]
    pub source: String,

    /// Datadog service tag.
    #[serde(default = "default_service")]
    pub service: String,

    /// Datadog environment tag.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Gzip request bodies of at least `compression_min_bytes`.
    #[serde(default = "default_true")]
    pub compression: bool,

    /// Smallest body worth compressing.
    #[serde(default = "default_compression_min_bytes")]
    pub compression_min_bytes: usize,

    /// Gzip level, 0 (store) to 9 (best).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Endpoint requested by the health check. Defaults to the Splunk HEC health
    /// endpoint for `splunk_hec` and a test log POST for `datadog`; `json`
    /// sinks without it report healthy without a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,

    /// Seconds between health checks. 0 disables them.
    #[serde(default = "default_health_interval")]
    pub health_interval: u64,
}

impl SinkConfig {
    /// A JSON sink with default tuning.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SinkKind::default(),
            enabled: true,
            url: url.into(),
            token_env: None,
            token: None,
            timeout: default_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
            circuit_threshold: default_circuit_threshold(),
            circuit_reset_timeout: default_circuit_reset_timeout(),
            index: None,
            sourcetype: default_sourcetype(),
            source: default_source(),
            service: default_service(),
            environment: default_environment(),
            compression: true,
            compression_min_bytes: default_compression_min_bytes(),
            compression_level: default_compression_level(),
            health_url: None,
            health_interval: default_health_interval(),
        }
    }

    /// Resolve the credential, checking `token_env` first.
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

    /// Health check period, if health checks are enabled.
    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval > 0).then(|| Duration::from_secs(self.health_interval))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Config(format!("sink '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(ConfigError::Config("sink name must not be empty".into()));
        }
        if self.url.trim().is_empty() {
            return fail("url is required");
        }
        if self.max_attempts == 0 {
            return fail("max_attempts must be at least 1");
        }
        if self.backoff_base.is_nan() || self.backoff_base < 1.0 {
            return fail("backoff_base must be at least 1.0");
        }
        if !(0.0..=MAX_DURATION_SECS as f64).contains(&self.backoff_cap) {
            return fail("backoff_cap must be between 0 and one year");
        }
        if self.timeout == 0 {
            return fail("timeout must be at least 1 second");
        }
        check_seconds(&format!("sink '{}': timeout", self.name), self.timeout)?;
        check_seconds(
            &format!("sink '{}': circuit_reset_timeout", self.name),
            self.circuit_reset_timeout,
        )?;
        if self.health_interval > MAX_DURATION_SECS {
            return fail("health_interval must be at most one year");
        }
        if self.compression_level > 9 {
            return fail("compression_level must be between 0 and 9");
        }
        if self.circuit_threshold == 0 {
            return fail("circuit_threshold must be at least 1");
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_cap() -> f64 {
    60.0
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout() -> u64 {
    60
}

fn default_sourcetype() -> String {
    "warden:audit".to_string()
}

fn default_source() -> String {
    "warden".to_string()
}

fn default_service() -> String {
    "warden".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_compression_min_bytes() -> usize {
    1024
}

fn default_compression_level() -> u32 {
    6
}

fn default_health_interval() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        let yaml = serde_yaml::to_string(&SinkKind::SplunkHec).unwrap();
        assert!(yaml.contains("splunk_hec"));
    }

    #[test]
    fn test_backoff_base_below_one_rejected() {
        let config = SinkConfig {
            backoff_base: 0.5,
            ..SinkConfig::new("siem", "http://siem")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_base"));
    }

    #[test]
    fn test_huge_reset_timeout_rejected() {
        let config = SinkConfig {
            circuit_reset_timeout: u64::MAX,
            ..SinkConfig::new("siem", "http://siem")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("circuit_reset_timeout must be at most"));

        let config = SinkConfig {
            backoff_cap: f64::INFINITY,
            ..SinkConfig::new("siem", "http://siem")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compression_level_bounded() {
        let config = SinkConfig {
            compression_level: 10,
            ..SinkConfig::new("siem", "http://siem")
        };
        assert!(config.validate().is_err());
        assert!(SinkConfig::new("siem", "http://siem").compression);
    }

    #[test]
    fn test_missing_url_rejected() {
        let config = SinkConfig::new("siem", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inline_token_used_without_env() {
        let config = SinkConfig {
            token: Some("inline".to_string()),
            token_env: Some("WARDEN_TEST_UNSET_SINK_TOKEN".to_string()),
            ..SinkConfig::new("siem", "http://siem")
        };
        assert_eq!(config.resolve_token().as_deref(), Some("inline"));
    }
}
