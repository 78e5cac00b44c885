//! Decision cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, check_seconds};
use crate::decision::Sensitivity;

/// TTL table and sizing for the decision cache.
///
/// All durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for LOW sensitivity decisions.
    #[serde(default = "default_ttl_low")]
    pub ttl_low: u64,

    /// TTL for MEDIUM sensitivity decisions.
    #[serde(default = "default_ttl_medium")]
    pub ttl_medium: u64,

    /// TTL for HIGH sensitivity decisions.
    #[serde(default = "default_ttl_high")]
    pub ttl_high: u64,

    /// TTL for CRITICAL sensitivity decisions.
    #[serde(default = "default_ttl_critical")]
    pub ttl_critical: u64,

    /// How often expired entries are swept. 0 disables the sweeper; entries
    /// then only leave the cache when overwritten or invalidated.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Number of independently locked shards.
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Refresh CRITICAL decisions in the background once they are in the
    /// last 30% of their TTL, while still serving the cached value.
    #[serde(default = "default_stale_while_revalidate")]
    pub stale_while_revalidate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_low: default_ttl_low(),
            ttl_medium: default_ttl_medium(),
            ttl_high: default_ttl_high(),
            ttl_critical: default_ttl_critical(),
            sweep_interval: default_sweep_interval(),
            shards: default_shards(),
            stale_while_revalidate: default_stale_while_revalidate(),
        }
    }
}

impl CacheConfig {
    /// TTL for a decision of the given sensitivity.
    pub fn ttl_for(&self, sensitivity: Sensitivity) -> Duration {
        let secs = match sensitivity {
            Sensitivity::Low => self.ttl_low,
            Sensitivity::Medium => self.ttl_medium,
            Sensitivity::High => self.ttl_high,
            Sensitivity::Critical => self.ttl_critical,
        };
        Duration::from_secs(secs)
    }

    /// Sweep interval, if the sweeper is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval > 0).then(|| Duration::from_secs(self.sweep_interval))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::Config("cache.shards must be at least 1".into()));
        }
        check_seconds("cache.ttl_low", self.ttl_low)?;
        check_seconds("cache.ttl_medium", self.ttl_medium)?;
        check_seconds("cache.ttl_high", self.ttl_high)?;
        check_seconds("cache.ttl_critical", self.ttl_critical)?;
        check_seconds("cache.sweep_interval", self.sweep_interval)?;
        Ok(())
    }
}

fn default_ttl_low() -> u64 {
    600
}

fn default_ttl_medium() -> u64 {
    300
}

fn default_ttl_high() -> u64 {
    60
}

fn default_ttl_critical() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_shards() -> usize {
    16
}

fn default_stale_while_revalidate() -> bool {
    true
}
