//! Audit pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::{ConfigError, check_capacity, check_seconds};

/// Configuration for the audit queue, batcher and shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum number of events waiting to be batched.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Events per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds after the last flush before a partial batch is sent.
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout: u64,

    /// Seconds the pipeline may spend delivering on shutdown before remaining
    /// batches are dead-lettered.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: u64,

    /// Batches each sink may have waiting before new ones are dead-lettered.
    #[serde(default = "default_sink_backlog")]
    pub sink_backlog: usize,

    /// Dead-letter sink settings.
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
            drain_timeout: default_drain_timeout(),
            sink_backlog: default_sink_backlog(),
            dead_letter: DeadLetterConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("audit.queue_capacity", self.queue_capacity),
            ("audit.batch_size", self.batch_size),
            ("audit.sink_backlog", self.sink_backlog),
            ("audit.dead_letter.capacity", self.dead_letter.capacity),
        ];
        for (field, value) in sizes {
            check_capacity(field, value)?;
        }
        if self.batch_timeout == 0 {
            return Err(ConfigError::Config(
                "audit.batch_timeout must be at least 1 second".into(),
            ));
        }
        check_seconds("audit.batch_timeout", self.batch_timeout)?;
        check_seconds("audit.drain_timeout", self.drain_timeout)?;
        if self.dead_letter.path.is_some() && self.dead_letter.max_file_bytes == 0 {
            return Err(ConfigError::Config(
                "audit.dead_letter.max_file_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Dead-letter sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Records kept in memory before the oldest is evicted.
    #[serde(default = "default_dead_letter_capacity")]
    pub capacity: usize,

    /// Optional JSON Lines file every record is appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Size at which the file is rotated to a timestamped sibling.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Rotated files kept next to the live one; older ones are deleted.
    #[serde(default = "default_max_rotated_files")]
    pub max_rotated_files: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            capacity: default_dead_letter_capacity(),
            path: None,
            max_file_bytes: default_max_file_bytes(),
            max_rotated_files: default_max_rotated_files(),
        }
    }
}

fn default_queue_capacity() -> usize {
    20_000
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout() -> u64 {
    5
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_sink_backlog() -> usize {
    16
}

fn default_dead_letter_capacity() -> usize {
    1_000
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_rotated_files() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.batch_timeout(), Duration::from_secs(5));
        assert!(config.dead_letter.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = AuditConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audit.batch_size"));
    }

    #[test]
    fn test_oversized_backlog_rejected() {
        let config = AuditConfig {
            sink_backlog: usize::MAX,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audit.sink_backlog must be at most"));
    }
}
