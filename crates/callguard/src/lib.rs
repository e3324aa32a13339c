//! Resilience and caching layer for rate-limited, occasionally failing
//! outbound APIs.
//!
//! The crate provides four cooperating primitives and the pipeline that
//! orders them:
//! - [`RateLimiter`]: minute/hour/day token windows with a priority
//!   admission queue
//! - [`ResponseCache`]: TTL + byte-bounded cache with LRU/LFU/FIFO eviction
//!   and optional durable snapshots
//! - [`RetryPolicy`]: classified retry with exponential backoff and jitter
//! - [`CircuitBreaker`]: Closed/Open/HalfOpen failure isolation
//! - [`ResilientExecutor`]: `cache -> limiter -> breaker -> retry -> call`
//!
//! # Example
//!
//! ```no_run
//! use callguard::{CallError, CallRequest, CallguardConfig, ResilientExecutor};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let executor: ResilientExecutor<String> =
//!     ResilientExecutor::from_config(CallguardConfig::default()).await?;
//!
//! let key = callguard::cache_key!("quotes", "AAPL");
//! let quote = executor
//!     .execute(CallRequest::cached(key), || async {
//!         Ok::<_, CallError>("187.44".to_string())
//!     })
//!     .await?;
//! println!("{quote}");
//!
//! executor.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod observer;
pub mod resilience;
pub mod scheduler;
pub mod testing;
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use cache::{
    generate_key, CacheConfig, CacheEntry, CacheSnapshot, CacheStats, CacheValue,
    EvictionStrategy, JsonFileStore, MemorySnapshotStore, ResponseCache, SnapshotStore,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::CallguardConfig;
pub use error::{
    CallError, CallErrorKind, CallguardError, CallguardResult, ResilienceError, ResilienceResult,
};
pub use executor::{CallRequest, ResilientExecutor, ResilientExecutorBuilder};
pub use observer::{
    ChannelObserver, EvictionReason, NoopObserver, ResilienceEvent, ResilienceObserver,
    SharedObserver, TracingObserver,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, ClassifyError,
    DrainReport, QueueStatus, RateLimiter, RateLimiterConfig, RateLimiterConfigUpdate,
    RateLimiterStatus, RetryConfig, RetryConfigUpdate, RetryPolicy, WindowKind, WindowStatus,
};
