//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Read the file given explicitly, or the first of the probed paths
//! 2. Fall back to defaults when no file exists
//! 3. Overlay `CALLGUARD_*` environment variables
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `CALLGUARD_MAX_REQUESTS_PER_MINUTE`, `CALLGUARD_MAX_REQUESTS_PER_HOUR`,
//!   `CALLGUARD_MAX_REQUESTS_PER_DAY`: window limits
//! - `CALLGUARD_QUEUE_SIZE`: admission queue capacity
//! - `CALLGUARD_ENABLE_BURST_MODE` (true/false), `CALLGUARD_BURST_LIMIT`
//! - `CALLGUARD_CACHE_TTL_MS`: default entry TTL
//! - `CALLGUARD_CACHE_MAX_SIZE_MB`: cache byte budget in megabytes
//! - `CALLGUARD_CACHE_STRATEGY`: `lru`, `lfu` or `fifo`
//! - `CALLGUARD_CACHE_PERSIST_TO_DISK` (true/false), `CALLGUARD_CACHE_DISK_PATH`
//! - `CALLGUARD_MAX_RETRIES`, `CALLGUARD_INITIAL_DELAY_MS`,
//!   `CALLGUARD_MAX_DELAY_MS`, `CALLGUARD_BACKOFF_FACTOR`,
//!   `CALLGUARD_JITTER_FACTOR`
//! - `CALLGUARD_FAILURE_THRESHOLD`, `CALLGUARD_SUCCESS_THRESHOLD`,
//!   `CALLGUARD_CIRCUIT_TIMEOUT_MS`, `CALLGUARD_CIRCUIT_RESET_TIMEOUT_MS`
//!
//! ## File Locations
//! Without an explicit path the loader probes `./callguard.toml` and then
//! `./callguard.json` in the current working directory.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use super::CallguardConfig;
use crate::error::{CallguardError, CallguardResult};
use crate::utils::serde::BYTES_PER_MB;

const ENV_PREFIX: &str = "CALLGUARD_";

/// Load configuration from `path` or the probed locations, overlaid with
/// environment variables
///
/// # Errors
/// Returns `CallguardError::Config` if an explicit file is missing or a file
/// cannot be parsed, and `CallguardError::InvalidConfig` if the merged
/// result is invalid.
pub fn load(path: Option<&Path>) -> CallguardResult<CallguardConfig> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => match probe_config_paths() {
            Some(found) => load_from_file(&found)?,
            None => {
                debug!("no config file found, using defaults");
                CallguardConfig::default()
            }
        },
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate configuration from a `.toml` or `.json` file
///
/// # Errors
/// Returns `CallguardError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: &Path) -> CallguardResult<CallguardConfig> {
    if !path.exists() {
        return Err(CallguardError::config(format!("Config file not found: {}", path.display())));
    }

    info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CallguardError::config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, path)?;
    config.validate()?;
    Ok(config)
}

/// Parse file contents, choosing the format by extension
fn parse_config(contents: &str, path: &Path) -> CallguardResult<CallguardConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CallguardError::config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CallguardError::config(format!("Invalid JSON format: {e}"))),
        _ => Err(CallguardError::config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file in the working directory, if any
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    ["callguard.toml", "callguard.json"].iter().map(|name| cwd.join(name)).find(|p| p.exists())
}

/// Overlay `CALLGUARD_*` environment variables onto `config`
///
/// # Errors
/// Returns `CallguardError::Config` naming the variable whose value does
/// not parse.
pub fn apply_env_overrides(config: &mut CallguardConfig) -> CallguardResult<()> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

/// Overlay settings from an arbitrary lookup keyed by variable name
/// (`CALLGUARD_MAX_RETRIES`, ...)
pub fn apply_overrides<F>(config: &mut CallguardConfig, lookup: F) -> CallguardResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    let limiter = &mut config.rate_limiter;
    env.set("MAX_REQUESTS_PER_MINUTE", &mut limiter.max_requests_per_minute)?;
    env.set("MAX_REQUESTS_PER_HOUR", &mut limiter.max_requests_per_hour)?;
    env.set("MAX_REQUESTS_PER_DAY", &mut limiter.max_requests_per_day)?;
    env.set("QUEUE_SIZE", &mut limiter.queue_size)?;
    env.set_bool("ENABLE_BURST_MODE", &mut limiter.enable_burst_mode)?;
    env.set("BURST_LIMIT", &mut limiter.burst_limit)?;

    let cache = &mut config.cache;
    env.set_millis("CACHE_TTL_MS", &mut cache.default_ttl)?;
    if let Some(mb) = env.parse::<f64>("CACHE_MAX_SIZE_MB")? {
        if !mb.is_finite() || mb < 0.0 {
            return Err(CallguardError::config(format!(
                "Invalid {ENV_PREFIX}CACHE_MAX_SIZE_MB: {mb}"
            )));
        }
        cache.max_size_bytes = (mb * BYTES_PER_MB).round() as usize;
    }
    env.set("CACHE_STRATEGY", &mut cache.strategy)?;
    env.set_bool("CACHE_PERSIST_TO_DISK", &mut cache.persist_to_disk)?;
    if let Some(path) = env.raw("CACHE_DISK_PATH") {
        cache.disk_path = PathBuf::from(path);
    }

    let retry = &mut config.retry;
    env.set("MAX_RETRIES", &mut retry.max_retries)?;
    env.set_millis("INITIAL_DELAY_MS", &mut retry.initial_delay)?;
    env.set_millis("MAX_DELAY_MS", &mut retry.max_delay)?;
    env.set("BACKOFF_FACTOR", &mut retry.backoff_factor)?;
    env.set("JITTER_FACTOR", &mut retry.jitter_factor)?;

    let breaker = &mut config.circuit_breaker;
    env.set("FAILURE_THRESHOLD", &mut breaker.failure_threshold)?;
    env.set("SUCCESS_THRESHOLD", &mut breaker.success_threshold)?;
    env.set_millis("CIRCUIT_TIMEOUT_MS", &mut breaker.timeout)?;
    env.set_millis("CIRCUIT_RESET_TIMEOUT_MS", &mut breaker.reset_timeout)?;

    Ok(())
}

struct Overrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
    }

    fn parse<T>(&self, name: &str) -> CallguardResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.raw(name) else {
            return Ok(None);
        };

        debug!(variable = %format!("{ENV_PREFIX}{name}"), "applying environment override");
        value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CallguardError::config(format!("Invalid {ENV_PREFIX}{name}: {e}")))
    }

    fn set<T>(&self, name: &str, target: &mut T) -> CallguardResult<()>
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(value) = self.parse(name)? {
            *target = value;
        }
        Ok(())
    }

    fn set_millis(&self, name: &str, target: &mut Duration) -> CallguardResult<()> {
        if let Some(ms) = self.parse::<u64>(name)? {
            *target = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn set_bool(&self, name: &str, target: &mut bool) -> CallguardResult<()> {
        let Some(value) = self.raw(name) else {
            return Ok(());
        };

        *target = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(CallguardError::config(format!(
                    "Invalid {ENV_PREFIX}{name}: expected a boolean, got '{other}'"
                )))
            }
        };
        Ok(())
    }
}
