//! Circuit breaker
//!
//! Closed → Open after `failure_threshold` consecutive failures. Open rejects
//! every call until `timeout` has passed, then lets the next call through as
//! a probe in HalfOpen. In HalfOpen a single failure re-opens the circuit for
//! `reset_timeout`, and `success_threshold` successes close it again.
//!
//! All counters live behind one mutex so a transition and the counter
//! changes that caused it are observed together.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CallguardError, CallguardResult, ResilienceError, ResilienceResult};
use crate::observer::{self, ResilienceEvent, SharedObserver};
use crate::utils::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without running
    Open,
    /// Calls pass through as probes for recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening
    pub failure_threshold: u32,
    /// Successes in HalfOpen before closing
    pub success_threshold: u32,
    /// How long the circuit stays open after tripping from Closed
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    /// How long the circuit stays open after a failed HalfOpen probe
    #[serde(rename = "reset_timeout_ms", with = "duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CallguardResult<()> {
        if self.failure_threshold == 0 {
            return Err(CallguardError::invalid("failure_threshold", "must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(CallguardError::invalid("success_threshold", "must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn build(self) -> CallguardResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<Instant>,
    /// When an Open circuit lets the next probe through
    pub next_attempt_at: Option<Instant>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    total_calls: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            total_calls: 0,
            rejected_calls: 0,
        }
    }

    /// Switch state, returning the transition if it changed anything
    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }
}

/// Failure-isolation state machine wrapping a single operation
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: C,
    observer: SharedObserver,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> CallguardResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> CallguardResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(BreakerState::closed()),
            clock,
            observer: observer::noop(),
        })
    }

    /// Report state changes to `observer`
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state without any transition
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of state and counters
    pub fn get_state(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            next_attempt_at: inner.next_attempt_at,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
        }
    }

    /// Whether a call made now would be let through
    pub fn is_available(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => inner.next_attempt_at.map_or(true, |at| self.clock.now() >= at),
        }
    }

    /// Force the circuit closed and zero its counters
    pub fn reset(&self) {
        let change = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.next_attempt_at = None;
            inner.transition(CircuitState::Closed)
        };
        info!("circuit breaker reset");
        self.notify(change);
    }

    /// Run `operation` if the circuit allows it.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking the
    /// operation while the circuit is open.
    #[instrument(skip_all, fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }

    fn acquire<E>(&self) -> ResilienceResult<(), E> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        if let Some(at) = inner.next_attempt_at.filter(|at| now < *at) {
            inner.rejected_calls += 1;
            drop(inner);
            let retry_after = at.duration_since(now);
            debug!(?retry_after, "circuit open, rejecting call");
            return Err(ResilienceError::CircuitOpen { retry_after });
        }

        inner.success_count = 0;
        let change = inner.transition(CircuitState::HalfOpen);
        drop(inner);

        self.notify(change);
        Ok(())
    }

    fn record_success(&self) {
        let change = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        inner.next_attempt_at = None;
                        inner.transition(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A concurrent probe already re-opened the circuit
                CircuitState::Open => None,
            }
        };

        self.notify(change);
    }

    fn record_failure(&self) {
        let now = self.clock.now();
        let change = {
            let mut inner = self.inner.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure_at = Some(now);

            match inner.state {
                CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                    inner.next_attempt_at = Some(now + self.config.timeout);
                    inner.transition(CircuitState::Open)
                }
                CircuitState::HalfOpen => {
                    inner.success_count = 0;
                    inner.next_attempt_at = Some(now + self.config.reset_timeout);
                    inner.transition(CircuitState::Open)
                }
                _ => None,
            }
        };

        self.notify(change);
    }

    fn notify(&self, change: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = change else {
            return;
        };

        if to == CircuitState::Open {
            warn!(%from, %to, "circuit breaker opened");
        } else {
            info!(%from, %to, "circuit breaker state changed");
        }
        self.observer.on_event(&ResilienceEvent::CircuitStateChange { from, to });
    }
}
