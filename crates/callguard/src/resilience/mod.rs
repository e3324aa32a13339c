//! Admission control and failure handling for outbound calls
//!
//! Three independent wrappers, each owning its own state:
//! - **Rate limiter**: minute/hour/day budgets with a priority admission
//!   queue
//! - **Circuit breaker**: fails fast against a dependency that keeps failing
//! - **Retry policy**: classified retry with exponential backoff and jitter
//!
//! [`ResilientExecutor`](crate::ResilientExecutor) nests them as
//! `limiter(breaker(retry(call)))`. Each one can also be used on its own.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitSnapshot,
    CircuitState,
};
pub use rate_limiter::{
    DrainReport, QueueStatus, RateLimiter, RateLimiterConfig, RateLimiterConfigBuilder,
    RateLimiterConfigUpdate, RateLimiterStatus, WindowKind, WindowStatus,
};
pub use retry::{ClassifyError, RetryConfig, RetryConfigBuilder, RetryConfigUpdate, RetryPolicy};
