//! Cache configuration types and builder

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallguardError, CallguardResult};
use crate::utils::{duration_millis, megabytes};

/// Which entry to drop when the byte budget is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently accessed
    #[default]
    Lru,
    /// Lowest access count, oldest first on ties
    Lfu,
    /// Oldest insertion
    Fifo,
}

impl FromStr for EvictionStrategy {
    type Err = CallguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            other => Err(CallguardError::invalid(
                "strategy",
                format!("unknown eviction strategy '{other}', expected lru, lfu or fifo"),
            )),
        }
    }
}

/// Configuration for cache behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    #[serde(rename = "ttl_ms", with = "duration_millis")]
    pub default_ttl: Duration,

    /// Total byte budget across all serialized values
    #[serde(rename = "max_size_mb", with = "megabytes")]
    pub max_size_bytes: usize,

    pub strategy: EvictionStrategy,

    /// Write periodic snapshots and restore them on startup
    pub persist_to_disk: bool,

    /// Snapshot file used when `persist_to_disk` is set
    pub disk_path: PathBuf,

    /// Period of the snapshot writer
    #[serde(rename = "persist_interval_ms", with = "duration_millis")]
    pub persist_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60 * 60),
            max_size_bytes: 100 * 1024 * 1024,
            strategy: EvictionStrategy::Lru,
            persist_to_disk: false,
            disk_path: PathBuf::from(".callguard/cache.json"),
            persist_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CallguardResult<()> {
        if self.default_ttl.is_zero() {
            return Err(CallguardError::invalid("ttl", "must be greater than zero"));
        }

        if self.max_size_bytes == 0 {
            return Err(CallguardError::invalid("max_size", "must be greater than zero"));
        }

        if self.persist_to_disk {
            if self.disk_path.as_os_str().is_empty() {
                return Err(CallguardError::invalid(
                    "disk_path",
                    "must be set when persist_to_disk is enabled",
                ));
            }
            if self.persist_interval.is_zero() {
                return Err(CallguardError::invalid(
                    "persist_interval",
                    "must be greater than zero",
                ));
            }
        }

        Ok(())
    }
}

/// Builder for [`CacheConfig`] with fluent API
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Default time-to-live for entries
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Byte budget given in megabytes
    pub fn max_size_mb(mut self, mb: f64) -> Self {
        self.config.max_size_bytes = (mb.max(0.0) * crate::utils::serde::BYTES_PER_MB) as usize;
        self
    }

    /// Byte budget given in bytes
    pub fn max_size_bytes(mut self, bytes: usize) -> Self {
        self.config.max_size_bytes = bytes;
        self
    }

    pub fn strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Persist snapshots to `path`
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.persist_to_disk = true;
        self.config.disk_path = path.into();
        self
    }

    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.config.persist_interval = interval;
        self
    }

    pub fn build(self) -> CallguardResult<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
