//! Time abstraction for testability
//!
//! Window refills, TTL expiry, queue aging and breaker timeouts all read time
//! through [`Clock`], so tests can drive them with [`MockClock`] instead of
//! sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed counter, so advancing one handle advances
/// every component holding a clone. Wall-clock time starts at the UNIX epoch.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.elapsed()
    }
}
