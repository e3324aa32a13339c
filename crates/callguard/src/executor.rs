//! The composed pipeline
//!
//! A call flows through the components in a fixed order:
//!
//! ```text
//! cache.get ──hit──> value
//!     │ miss
//!     v
//! rate limiter ──> circuit breaker ──> retry ──> operation
//!     │ success
//!     v
//! cache.set
//! ```
//!
//! The breaker sees one outcome per admitted call (after retries), and only
//! successful results are cached.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheValue, JsonFileStore, ResponseCache, SharedSnapshotStore};
use crate::clock::{Clock, SystemClock};
use crate::config::CallguardConfig;
use crate::error::{CallguardResult, ResilienceError, ResilienceResult};
use crate::observer::{self, ResilienceEvent, SharedObserver};
use crate::resilience::{CircuitBreaker, ClassifyError, RateLimiter, RetryPolicy};

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRequest {
    /// Cache key; `None` bypasses the cache in both directions
    pub cache_key: Option<String>,
    /// Admission priority, higher first
    pub priority: i32,
    /// TTL for the cached result, the cache default when `None`
    pub ttl: Option<Duration>,
    /// Stored alongside the cached result
    pub metadata: Option<Value>,
}

impl CallRequest {
    /// Uncached request with priority 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Request whose result is cached under `key`
    pub fn cached(key: impl Into<String>) -> Self {
        Self { cache_key: Some(key.into()), ..Self::default() }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Runs calls through cache, rate limiter, circuit breaker and retry
///
/// Cloning is cheap; clones share the same components.
pub struct ResilientExecutor<V, C: Clock = SystemClock> {
    limiter: Arc<RateLimiter<C>>,
    breaker: Arc<CircuitBreaker<C>>,
    retry: Arc<RetryPolicy>,
    cache: Arc<ResponseCache<V, C>>,
    observer: SharedObserver,
    clock: C,
}

impl<V, C: Clock + Clone> Clone for ResilientExecutor<V, C> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            breaker: Arc::clone(&self.breaker),
            retry: Arc::clone(&self.retry),
            cache: Arc::clone(&self.cache),
            observer: Arc::clone(&self.observer),
            clock: self.clock.clone(),
        }
    }
}

impl<V, C: Clock> fmt::Debug for ResilientExecutor<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("limiter", &self.limiter)
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<V: CacheValue> ResilientExecutor<V, SystemClock> {
    /// Builder on the system clock
    pub fn builder() -> ResilientExecutorBuilder<V, SystemClock> {
        ResilientExecutorBuilder::new(SystemClock)
    }

    /// Build every component from `config`
    ///
    /// # Errors
    /// Returns a `CallguardError` if any section fails validation.
    pub async fn from_config(config: CallguardConfig) -> CallguardResult<Self> {
        Self::builder().config(config).build().await
    }
}

impl<V: CacheValue, C: Clock + Clone> ResilientExecutor<V, C> {
    /// Run `operation` through the full pipeline.
    ///
    /// With a cache key, a live cached value is returned without touching
    /// the limiter or invoking the operation, and a successful result is
    /// stored afterwards. Failures are never cached.
    #[instrument(skip_all, fields(priority = request.priority, cached = request.cache_key.is_some()))]
    pub async fn execute<F, Fut, E>(&self, request: CallRequest, operation: F) -> ResilienceResult<V, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: ClassifyError + fmt::Display,
    {
        let started = self.clock.now();

        if let Some(key) = request.cache_key.as_deref() {
            if let Some(value) = self.cache.get(key) {
                debug!(key, "served from cache");
                self.emit(ResilienceEvent::RequestCompleted {
                    duration: self.clock.now().saturating_duration_since(started),
                    cached: true,
                });
                return Ok(value);
            }
        }

        let result = self.run(request.priority, operation).await;

        if let (Ok(value), Some(key)) = (&result, request.cache_key) {
            if let Err(e) = self.cache.set(key, value.clone(), request.ttl, request.metadata) {
                warn!(error = %e, "failed to cache result");
            }
        }

        self.report(started, &result);
        result
    }

    /// Run `operation` through limiter, breaker and retry, bypassing the
    /// cache
    pub async fn execute_uncached<F, Fut, T, E>(
        &self,
        priority: i32,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + fmt::Display,
    {
        let started = self.clock.now();
        let result = self.run(priority, operation).await;
        self.report(started, &result);
        result
    }

    async fn run<F, Fut, T, E>(&self, priority: i32, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + fmt::Display,
    {
        let breaker = &self.breaker;
        let retry = &self.retry;

        self.limiter
            .execute(move || breaker.execute(move || retry.execute(operation)), priority)
            .await
            .map_err(ResilienceError::flatten)
    }

    fn report<T, E: fmt::Display>(&self, started: std::time::Instant, result: &ResilienceResult<T, E>) {
        let duration = self.clock.now().saturating_duration_since(started);
        let event = match result {
            Ok(_) => ResilienceEvent::RequestCompleted { duration, cached: false },
            Err(e) => ResilienceEvent::RequestFailed {
                duration,
                error: e.to_string(),
                rejected: e.is_rejection(),
            },
        };
        self.emit(event);
    }

    fn emit(&self, event: ResilienceEvent) {
        self.observer.on_event(&event);
    }

    pub fn rate_limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cache(&self) -> &ResponseCache<V, C> {
        &self.cache
    }

    /// Stop admitting calls, then stop the cache and write its final
    /// snapshot
    pub async fn shutdown(&self) {
        self.limiter.shutdown().await;
        self.cache.shutdown().await;
    }
}

/// Assembles a [`ResilientExecutor`] from configuration and optional
/// pre-built parts
///
/// Components built here share the builder's clock and observer. Pre-built
/// components are used as given.
pub struct ResilientExecutorBuilder<V, C: Clock = SystemClock> {
    config: CallguardConfig,
    clock: C,
    observer: SharedObserver,
    store: Option<SharedSnapshotStore<V>>,
    limiter: Option<Arc<RateLimiter<C>>>,
    breaker: Option<Arc<CircuitBreaker<C>>>,
    retry: Option<Arc<RetryPolicy>>,
    cache: Option<Arc<ResponseCache<V, C>>>,
}

impl<V, C: Clock> fmt::Debug for ResilientExecutorBuilder<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutorBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<V: CacheValue, C: Clock + Clone> ResilientExecutorBuilder<V, C> {
    /// Start from default configuration on `clock`
    pub fn new(clock: C) -> Self {
        Self {
            config: CallguardConfig::default(),
            clock,
            observer: observer::noop(),
            store: None,
            limiter: None,
            breaker: None,
            retry: None,
            cache: None,
        }
    }

    pub fn config(mut self, config: CallguardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Persist the cache through `store` instead of the configured file
    pub fn snapshot_store(mut self, store: SharedSnapshotStore<V>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter<C>>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker<C>>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry_policy(mut self, retry: Arc<RetryPolicy>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache<V, C>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the executor, restoring the cache snapshot when persistence
    /// is configured
    ///
    /// # Errors
    /// Returns a `CallguardError` if a section needed for a component built
    /// here fails validation.
    pub async fn build(self) -> CallguardResult<ResilientExecutor<V, C>> {
        let Self { config, clock, observer, store, limiter, breaker, retry, cache } = self;

        let limiter = match limiter {
            Some(limiter) => limiter,
            None => Arc::new(
                RateLimiter::with_clock(config.rate_limiter, clock.clone())?
                    .with_observer(Arc::clone(&observer)),
            ),
        };

        let breaker = match breaker {
            Some(breaker) => breaker,
            None => Arc::new(
                CircuitBreaker::with_clock(config.circuit_breaker, clock.clone())?
                    .with_observer(Arc::clone(&observer)),
            ),
        };

        let retry = match retry {
            Some(retry) => retry,
            None => Arc::new(RetryPolicy::new(config.retry)?.with_observer(Arc::clone(&observer))),
        };

        let cache = match cache {
            Some(cache) => cache,
            None => {
                let store = store.or_else(|| {
                    config.cache.persist_to_disk.then(|| {
                        Arc::new(JsonFileStore::new(&config.cache.disk_path))
                            as SharedSnapshotStore<V>
                    })
                });
                let cache = match store {
                    Some(store) => {
                        ResponseCache::open_with_clock(
                            config.cache,
                            store,
                            Arc::clone(&observer),
                            clock.clone(),
                        )
                        .await?
                    }
                    None => ResponseCache::with_clock(config.cache, clock.clone())?
                        .with_observer(Arc::clone(&observer)),
                };
                Arc::new(cache)
            }
        };

        Ok(ResilientExecutor { limiter, breaker, retry, cache, observer, clock })
    }
}
