//! Top-level configuration
//!
//! [`CallguardConfig`] groups the configuration of every pipeline component.
//! It can be built in code, read from a TOML or JSON file, and overlaid with
//! `CALLGUARD_*` environment variables (see [`loader`]).

pub mod loader;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::CallguardResult;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};

pub use loader::{apply_env_overrides, apply_overrides, load, load_from_file, probe_config_paths};

/// Configuration for the whole pipeline
///
/// Missing sections and fields take their defaults, so an empty file is a
/// valid configuration.
///
/// ```toml
/// [rate_limiter]
/// max_requests_per_minute = 30
/// queue_size = 50
///
/// [cache]
/// ttl_ms = 600000
/// max_size_mb = 25
/// strategy = "lfu"
///
/// [retry]
/// max_retries = 5
///
/// [circuit_breaker]
/// failure_threshold = 3
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallguardConfig {
    pub rate_limiter: RateLimiterConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl CallguardConfig {
    /// Validate every section
    pub fn validate(&self) -> CallguardResult<()> {
        self.rate_limiter.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }
}
