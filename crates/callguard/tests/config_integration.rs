//! Integration tests for configuration loading

use std::time::Duration;

use callguard::config::{self, apply_overrides};
use callguard::{CacheConfig, CallguardConfig, CallguardError, EvictionStrategy};

#[test]
fn test_load_toml_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("callguard.toml");
    std::fs::write(
        &path,
        r#"
        [rate_limiter]
        max_requests_per_minute = 20
        max_requests_per_hour = 500
        queue_size = 5
        enable_burst_mode = true
        burst_limit = 30

        [cache]
        ttl_ms = 120000
        max_size_mb = 0.25
        strategy = "lfu"
        persist_to_disk = true
        disk_path = "/tmp/callguard-test/cache.json"

        [retry]
        max_retries = 4
        initial_delay_ms = 250
        max_delay_ms = 8000
        backoff_factor = 3.0
        jitter_factor = 0.2
        retryable_error_codes = ["ECONNRESET"]
        retryable_status_codes = [503]

        [circuit_breaker]
        failure_threshold = 4
        success_threshold = 1
        timeout_ms = 15000
        reset_timeout_ms = 5000
        "#,
    )?;

    let config = config::load_from_file(&path)?;

    assert_eq!(config.rate_limiter.max_requests_per_minute, 20);
    assert_eq!(config.rate_limiter.max_requests_per_hour, 500);
    assert_eq!(config.rate_limiter.max_requests_per_day, 10_000);
    assert!(config.rate_limiter.enable_burst_mode);
    assert_eq!(config.rate_limiter.burst_limit, 30);

    assert_eq!(config.cache.default_ttl, Duration::from_secs(120));
    assert_eq!(config.cache.max_size_bytes, 256 * 1024);
    assert_eq!(config.cache.strategy, EvictionStrategy::Lfu);
    assert!(config.cache.persist_to_disk);

    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
    assert_eq!(config.retry.retryable_error_codes, vec!["ECONNRESET".to_string()]);
    assert_eq!(config.retry.retryable_status_codes, vec![503]);

    assert_eq!(config.circuit_breaker.failure_threshold, 4);
    assert_eq!(config.circuit_breaker.timeout, Duration::from_secs(15));
    assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(5));
    Ok(())
}

#[test]
fn test_json_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("callguard.json");

    let mut original = CallguardConfig::default();
    original.rate_limiter.queue_size = 7;
    original.cache = CacheConfig::builder()
        .ttl(Duration::from_secs(30))
        .max_size_mb(3.0)
        .strategy(EvictionStrategy::Fifo)
        .build()?;
    original.retry.max_retries = 1;

    std::fs::write(&path, serde_json::to_vec_pretty(&original)?)?;
    let loaded = config::load_from_file(&path)?;
    assert_eq!(loaded, original);
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("callguard.toml");
    std::fs::write(&path, "[retry]\njitter_factor = 1.5\n")?;

    let result = config::load_from_file(&path);
    assert!(matches!(result, Err(CallguardError::InvalidConfig { field: "jitter_factor", .. })));

    std::fs::write(&path, "[cache]\nmax_size_mb = -1\n")?;
    assert!(config::load_from_file(&path).is_err());

    std::fs::write(&path, "[rate_limiter\n")?;
    let result = config::load_from_file(&path);
    assert!(matches!(result, Err(CallguardError::Config(msg)) if msg.contains("TOML")));
    Ok(())
}

#[test]
fn test_explicit_path_is_loaded_and_overridable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("service.toml");
    std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 9\n")?;

    let mut config = config::load(Some(&path))?;
    assert_eq!(config.circuit_breaker.failure_threshold, 9);

    apply_overrides(&mut config, |name| {
        (name == "CALLGUARD_FAILURE_THRESHOLD").then(|| "2".to_string())
    })?;
    assert_eq!(config.circuit_breaker.failure_threshold, 2);
    assert!(config.validate().is_ok());
    Ok(())
}
