//! Integration tests for the composed pipeline
//!
//! Exercises cache short-circuiting, admission, retry classification and
//! breaker isolation end to end through [`ResilientExecutor`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callguard::testing::RecordingObserver;
use callguard::{
    cache_key, CallError, CallRequest, CallguardConfig, CircuitState, MockClock,
    ResilienceError, ResilientExecutor, ResilientExecutorBuilder, TracingObserver,
};

type Executor = ResilientExecutor<String, MockClock>;

fn fast_config() -> CallguardConfig {
    let mut config = CallguardConfig::default();
    config.rate_limiter.tick_interval = Duration::from_secs(3600);
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(4);
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn build(config: CallguardConfig, clock: &MockClock) -> (Executor, Arc<RecordingObserver>) {
    init_tracing();
    let recorder = Arc::new(RecordingObserver::new());
    let executor = ResilientExecutorBuilder::new(clock.clone())
        .config(config)
        .observer(recorder.clone())
        .build()
        .await
        .expect("executor");
    (executor, recorder)
}

/// Validates admission through the whole pipeline.
///
/// With 2 calls per minute and a queue of 1, four concurrent calls produce
/// two executions, one queued caller and one `QueueFull` rejection. The
/// queued caller completes once the window refills.
#[tokio::test]
async fn test_admission_queue_and_rejection() {
    let clock = MockClock::new();
    let mut config = fast_config();
    config.rate_limiter.max_requests_per_minute = 2;
    config.rate_limiter.queue_size = 1;
    let (executor, recorder) = build(config, &clock).await;
    let invocations = Arc::new(AtomicU32::new(0));

    let call = |executor: Executor, n: u32| {
        let invocations = Arc::clone(&invocations);
        tokio::spawn(async move {
            executor
                .execute(CallRequest::new(), move || {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, CallError>(format!("response {n}")) }
                })
                .await
        })
    };

    assert_eq!(call(executor.clone(), 1).await.expect("task").expect("call 1"), "response 1");
    assert_eq!(call(executor.clone(), 2).await.expect("task").expect("call 2"), "response 2");

    let queued = call(executor.clone(), 3);
    for _ in 0..1_000 {
        if executor.rate_limiter().get_queue_status().length == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(executor.rate_limiter().get_queue_status().length, 1);

    let rejected = call(executor.clone(), 4).await.expect("task");
    assert!(matches!(rejected, Err(ResilienceError::QueueFull { capacity: 1 })));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    clock.advance(Duration::from_secs(60));
    executor.rate_limiter().process_queue();
    assert_eq!(queued.await.expect("task").expect("call 3"), "response 3");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    assert_eq!(recorder.count("request-queued"), 1);
    assert_eq!(recorder.count("request-completed"), 3);
    assert!(recorder.events().iter().any(|e| matches!(
        e,
        callguard::ResilienceEvent::RequestFailed { rejected: true, .. }
    )));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_cached_call_is_served_without_admission() {
    let clock = MockClock::new();
    let mut config = fast_config();
    config.rate_limiter.max_requests_per_minute = 1;
    config.rate_limiter.queue_size = 0;
    let (executor, recorder) = build(config, &clock).await;

    let key = cache_key!("quote", "AAPL");
    let first = executor
        .execute(CallRequest::cached(key.clone()), || async {
            Ok::<_, CallError>("187.44".to_string())
        })
        .await
        .expect("first call");

    // Budget is spent, yet the cached value is still served
    let second = executor
        .execute(CallRequest::cached(key), || async {
            Err::<String, _>(CallError::other("must not be called"))
        })
        .await
        .expect("cached call");

    assert_eq!(first, second);
    assert_eq!(recorder.count("cache-miss"), 1);
    assert_eq!(recorder.count("cache-hit"), 1);

    let other = executor
        .execute(CallRequest::cached(cache_key!("quote", "MSFT")), || async {
            Ok::<_, CallError>("410.00".to_string())
        })
        .await;
    assert!(matches!(other, Err(ResilienceError::QueueFull { .. })));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_cached_entry_honours_request_ttl() {
    let clock = MockClock::new();
    let (executor, _) = build(fast_config(), &clock).await;
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        executor
            .execute(CallRequest::cached("short").ttl(Duration::from_secs(5)), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CallError>("v".to_string()) }
            })
            .await
            .expect("call");
        clock.advance(Duration::from_secs(6));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    executor.shutdown().await;
}

/// Validates that transient failures are retried inside one admission and
/// the breaker sees only the final outcome.
#[tokio::test]
async fn test_transient_failures_recover() {
    let clock = MockClock::new();
    let (executor, recorder) = build(fast_config(), &clock).await;
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let value = executor
        .execute(CallRequest::cached("flaky"), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(CallError::network("ECONNRESET", "connection reset"))
                } else {
                    Ok("recovered".to_string())
                }
            }
        })
        .await
        .expect("recovered call");

    assert_eq!(value, "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.count("retry-attempt"), 2);
    assert_eq!(recorder.count("retry-success"), 1);
    assert_eq!(executor.rate_limiter().get_status().minute.consumed, 1);
    assert_eq!(executor.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(executor.circuit_breaker().get_state().failure_count, 0);
    executor.shutdown().await;
}

#[tokio::test]
async fn test_original_error_is_returned_unchanged() {
    let clock = MockClock::new();
    let (executor, recorder) = build(fast_config(), &clock).await;

    let err = executor
        .execute(CallRequest::cached("missing"), || async {
            Err::<String, _>(CallError::http(404, "no such symbol"))
        })
        .await
        .expect_err("404 is not retryable");

    assert!(!err.is_rejection());
    assert_eq!(err.into_operation_error(), Some(CallError::http(404, "no such symbol")));
    assert_eq!(recorder.count("retry-attempt"), 0);
    assert!(!executor.cache().has("missing"));
    executor.shutdown().await;
}

/// Validates breaker isolation through the pipeline.
///
/// # Test Steps
/// 1. Trip the breaker with non-retryable failures
/// 2. Verify further calls are rejected without invoking the operation
/// 3. Advance past the open timeout and verify probes close the circuit
#[tokio::test]
async fn test_breaker_isolates_failing_dependency() {
    let clock = MockClock::new();
    let mut config = fast_config();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.success_threshold = 1;
    config.circuit_breaker.timeout = Duration::from_secs(30);
    let (executor, recorder) = build(config, &clock).await;

    for _ in 0..2 {
        let _ = executor
            .execute_uncached(0, || async { Err::<(), _>(CallError::http(400, "bad request")) })
            .await;
    }
    assert_eq!(executor.circuit_breaker().state(), CircuitState::Open);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invoked);
    let rejected = executor
        .execute_uncached(0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, CallError>(()) }
        })
        .await;
    assert!(
        matches!(rejected, Err(ResilienceError::CircuitOpen { retry_after }) if retry_after == Duration::from_secs(30))
    );
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_secs(30));
    executor
        .execute_uncached(0, || async { Ok::<_, CallError>(()) })
        .await
        .expect("probe succeeds");
    assert_eq!(executor.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(recorder.count("circuit-state-change"), 3);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_calls() {
    let clock = MockClock::new();
    let (executor, _) = build(fast_config(), &clock).await;
    executor.shutdown().await;

    let result = executor.execute_uncached(0, || async { Ok::<_, CallError>(()) }).await;
    assert!(matches!(result, Err(ResilienceError::ShuttingDown)));
}

#[tokio::test]
async fn test_tracing_observer_accepts_every_event() {
    init_tracing();
    let clock = MockClock::new();
    let executor: Executor = ResilientExecutorBuilder::new(clock)
        .config(fast_config())
        .observer(Arc::new(TracingObserver))
        .build()
        .await
        .expect("executor");

    executor
        .execute(CallRequest::cached("k"), || async { Ok::<_, CallError>("v".to_string()) })
        .await
        .expect("call");
    executor
        .execute(CallRequest::cached("k"), || async { Ok::<_, CallError>("v".to_string()) })
        .await
        .expect("cached call");
    executor.shutdown().await;
}

#[tokio::test]
async fn test_from_config_persists_across_restarts() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = CallguardConfig::default();
    config.cache.persist_to_disk = true;
    config.cache.disk_path = dir.path().join("cache.json");

    let executor: ResilientExecutor<String> =
        ResilientExecutor::from_config(config.clone()).await.expect("executor");
    executor
        .execute(CallRequest::cached("persisted"), || async {
            Ok::<_, CallError>("value".to_string())
        })
        .await
        .expect("call");
    executor.shutdown().await;
    assert!(dir.path().join("cache.json").exists());

    let restarted: ResilientExecutor<String> =
        ResilientExecutor::from_config(config).await.expect("executor");
    let value = restarted
        .execute(CallRequest::cached("persisted"), || async {
            Err::<String, _>(CallError::other("must come from the snapshot"))
        })
        .await
        .expect("served from restored cache");
    assert_eq!(value, "value");
    restarted.shutdown().await;
}
