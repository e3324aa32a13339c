//! Multi-window rate limiter with a priority admission queue
//!
//! A call is admitted when the minute, hour and day budgets all have room
//! (in burst mode the minute check becomes "fewer than `burst_limit` calls
//! this minute"). Admission consumes one unit from every window. Calls that
//! cannot be admitted wait in a bounded queue ordered by priority, then
//! arrival; a full queue rejects the caller immediately.
//!
//! A background tick refills elapsed windows and drains the queue. Queue
//! aging is checked lazily: an entry older than `max_queue_age` is rejected
//! when it reaches the head of the queue, not when it crosses the age.

mod bucket;
mod queue;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub use self::bucket::{WindowKind, WindowStatus};
use self::bucket::WindowBucket;
use self::queue::{AdmissionQueue, PermitReceiver, Rejection};
use crate::clock::{Clock, SystemClock};
use crate::error::{CallguardError, CallguardResult, ResilienceError, ResilienceResult};
use crate::observer::{self, ResilienceEvent, SharedObserver};
use crate::scheduler::{PeriodicTask, TickFlow};
use crate::utils::duration_millis;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,
    pub max_requests_per_day: u32,
    /// Maximum number of callers waiting for admission
    pub queue_size: usize,
    pub enable_burst_mode: bool,
    /// Calls allowed per minute while burst mode is on
    pub burst_limit: u32,
    /// Queued entries older than this are rejected when they reach the head
    #[serde(rename = "max_queue_age_ms", with = "duration_millis")]
    pub max_queue_age: Duration,
    /// Period of the background refill/drain pass
    #[serde(rename = "tick_interval_ms", with = "duration_millis")]
    pub tick_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_requests_per_hour: 1_000,
            max_requests_per_day: 10_000,
            queue_size: 100,
            enable_burst_mode: false,
            burst_limit: 10,
            max_queue_age: Duration::from_secs(5 * 60),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    /// Create a configuration builder
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CallguardResult<()> {
        let limits = [
            ("max_requests_per_minute", self.max_requests_per_minute),
            ("max_requests_per_hour", self.max_requests_per_hour),
            ("max_requests_per_day", self.max_requests_per_day),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(CallguardError::invalid(field, "must be greater than 0"));
            }
        }

        if self.enable_burst_mode && self.burst_limit == 0 {
            return Err(CallguardError::invalid(
                "burst_limit",
                "must be greater than 0 when burst mode is enabled",
            ));
        }

        if self.tick_interval.is_zero() {
            return Err(CallguardError::invalid("tick_interval", "must be greater than zero"));
        }

        Ok(())
    }

    fn merge(&mut self, update: RateLimiterConfigUpdate) {
        let RateLimiterConfigUpdate {
            max_requests_per_minute,
            max_requests_per_hour,
            max_requests_per_day,
            queue_size,
            enable_burst_mode,
            burst_limit,
            max_queue_age,
            tick_interval,
        } = update;

        if let Some(v) = max_requests_per_minute {
            self.max_requests_per_minute = v;
        }
        if let Some(v) = max_requests_per_hour {
            self.max_requests_per_hour = v;
        }
        if let Some(v) = max_requests_per_day {
            self.max_requests_per_day = v;
        }
        if let Some(v) = queue_size {
            self.queue_size = v;
        }
        if let Some(v) = enable_burst_mode {
            self.enable_burst_mode = v;
        }
        if let Some(v) = burst_limit {
            self.burst_limit = v;
        }
        if let Some(v) = max_queue_age {
            self.max_queue_age = v;
        }
        if let Some(v) = tick_interval {
            self.tick_interval = v;
        }
    }
}

/// Builder for [`RateLimiterConfig`]
#[derive(Debug, Default)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    pub fn max_requests_per_minute(mut self, limit: u32) -> Self {
        self.config.max_requests_per_minute = limit;
        self
    }

    pub fn max_requests_per_hour(mut self, limit: u32) -> Self {
        self.config.max_requests_per_hour = limit;
        self
    }

    pub fn max_requests_per_day(mut self, limit: u32) -> Self {
        self.config.max_requests_per_day = limit;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    /// Enable burst mode with the given per-minute allowance
    pub fn burst(mut self, limit: u32) -> Self {
        self.config.enable_burst_mode = true;
        self.config.burst_limit = limit;
        self
    }

    pub fn max_queue_age(mut self, age: Duration) -> Self {
        self.config.max_queue_age = age;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn build(self) -> CallguardResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Partial update applied by [`RateLimiter::update_config`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimiterConfigUpdate {
    pub max_requests_per_minute: Option<u32>,
    pub max_requests_per_hour: Option<u32>,
    pub max_requests_per_day: Option<u32>,
    pub queue_size: Option<usize>,
    pub enable_burst_mode: Option<bool>,
    pub burst_limit: Option<u32>,
    pub max_queue_age: Option<Duration>,
    pub tick_interval: Option<Duration>,
}

/// Budget usage across all windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterStatus {
    pub minute: WindowStatus,
    pub hour: WindowStatus,
    pub day: WindowStatus,
    pub burst_mode: bool,
    pub queued: usize,
}

impl RateLimiterStatus {
    /// Status of a single window
    pub fn window(&self, kind: WindowKind) -> &WindowStatus {
        match kind {
            WindowKind::Minute => &self.minute,
            WindowKind::Hour => &self.hour,
            WindowKind::Day => &self.day,
        }
    }
}

/// Admission queue summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub length: usize,
    pub capacity: usize,
    /// How long the oldest entry has been waiting
    pub oldest_wait: Option<Duration>,
    pub highest_priority: Option<i32>,
    pub lowest_priority: Option<i32>,
}

/// Outcome of one refill + drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries admitted and handed their permit
    pub dispatched: usize,
    /// Entries rejected for waiting longer than `max_queue_age`
    pub expired: usize,
    /// Entries whose caller had already gone away
    pub abandoned: usize,
}

impl DrainReport {
    fn is_empty(&self) -> bool {
        self.dispatched == 0 && self.expired == 0 && self.abandoned == 0
    }
}

struct LimiterState {
    config: RateLimiterConfig,
    minute: WindowBucket,
    hour: WindowBucket,
    day: WindowBucket,
    queue: AdmissionQueue,
    shutting_down: bool,
}

impl LimiterState {
    fn new(config: RateLimiterConfig, now: Instant) -> Self {
        let mut state = Self {
            minute: WindowBucket::new(WindowKind::Minute, 0, now),
            hour: WindowBucket::new(WindowKind::Hour, 0, now),
            day: WindowBucket::new(WindowKind::Day, 0, now),
            config,
            queue: AdmissionQueue::default(),
            shutting_down: false,
        };
        state.reset_buckets(now);
        state
    }

    fn reset_buckets(&mut self, now: Instant) {
        self.minute = WindowBucket::new(WindowKind::Minute, self.config.max_requests_per_minute, now);
        self.hour = WindowBucket::new(WindowKind::Hour, self.config.max_requests_per_hour, now);
        self.day = WindowBucket::new(WindowKind::Day, self.config.max_requests_per_day, now);
    }

    fn refill(&mut self, now: Instant) {
        for bucket in [&mut self.minute, &mut self.hour, &mut self.day] {
            if bucket.refill_if_elapsed(now) {
                debug!(window = %bucket.kind(), "rate limit window refilled");
            }
        }
    }

    fn can_admit(&self) -> bool {
        let minute_ok = if self.config.enable_burst_mode {
            self.minute.consumed() < self.config.burst_limit
        } else {
            self.minute.has_capacity()
        };
        minute_ok && self.hour.has_capacity() && self.day.has_capacity()
    }

    fn consume(&mut self) {
        self.minute.consume();
        self.hour.consume();
        self.day.consume();
    }

    /// Pop and dispatch entries while budget allows
    fn drain(&mut self, now: Instant) -> DrainReport {
        let mut report = DrainReport::default();

        while !self.queue.is_empty() && self.can_admit() {
            let Some(entry) = self.queue.pop() else {
                break;
            };

            let waited = now.saturating_duration_since(entry.enqueued_at);
            if waited > self.config.max_queue_age {
                warn!(request_id = %entry.id, ?waited, "queued request expired");
                entry.reject(Rejection::Expired { waited });
                report.expired += 1;
                continue;
            }

            let (id, priority) = (entry.id, entry.priority);
            if entry.admit() {
                self.consume();
                debug!(request_id = %id, priority, ?waited, "queued request admitted");
                report.dispatched += 1;
            } else {
                debug!(request_id = %id, "queued caller went away");
                report.abandoned += 1;
            }
        }

        report
    }
}

struct Shared<C: Clock> {
    state: Mutex<LimiterState>,
    clock: C,
    observer: RwLock<SharedObserver>,
}

impl<C: Clock> Shared<C> {
    fn process_queue(&self) -> DrainReport {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.refill(now);
        let report = state.drain(now);
        drop(state);

        if !report.is_empty() {
            debug!(
                dispatched = report.dispatched,
                expired = report.expired,
                abandoned = report.abandoned,
                "admission queue drained"
            );
        }
        report
    }
}

enum Admission {
    Immediate,
    Queued(PermitReceiver),
}

/// Multi-window rate limiter
///
/// # Examples
///
/// ```rust
/// use callguard::{RateLimiter, RateLimiterConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RateLimiterConfig::builder().max_requests_per_minute(30).build()?;
/// let limiter = RateLimiter::new(config)?;
///
/// let answer = limiter.execute(|| async { Ok::<_, std::io::Error>(42) }, 0).await?;
/// assert_eq!(answer, 42);
///
/// limiter.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RateLimiter<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
    tick: Mutex<Option<PeriodicTask>>,
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("RateLimiter")
            .field("config", &state.config)
            .field("queued", &state.queue.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl RateLimiter<SystemClock> {
    /// Create a rate limiter on the system clock
    pub fn new(config: RateLimiterConfig) -> CallguardResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter with a custom clock (useful for testing)
    ///
    /// Starts the background tick when called inside a Tokio runtime.
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> CallguardResult<Self> {
        config.validate()?;

        let tick_interval = config.tick_interval;
        let shared = Arc::new(Shared {
            state: Mutex::new(LimiterState::new(config, clock.now())),
            clock,
            observer: RwLock::new(observer::noop()),
        });

        let tick = Self::spawn_tick(Arc::downgrade(&shared), tick_interval);
        Ok(Self { shared, tick: Mutex::new(Some(tick)) })
    }

    /// Report queueing signals to `observer`
    pub fn with_observer(self, observer: SharedObserver) -> Self {
        *self.shared.observer.write() = observer;
        self
    }

    fn spawn_tick(shared: Weak<Shared<C>>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn("rate-limiter-drain", period, move || {
            let flow = match shared.upgrade() {
                Some(shared) => {
                    shared.process_queue();
                    TickFlow::Continue
                }
                None => TickFlow::Stop,
            };
            async move { flow }
        })
    }

    /// Run `operation` once the call is admitted.
    ///
    /// Higher `priority` values are dispatched first when the call has to
    /// wait. Rejections ([`ResilienceError::QueueFull`],
    /// [`ResilienceError::RequestExpired`], [`ResilienceError::QueueCleared`],
    /// [`ResilienceError::ShuttingDown`]) never invoke the operation.
    #[instrument(skip(self, operation))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F, priority: i32) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.admit(priority)? {
            Admission::Immediate => {}
            Admission::Queued(permit) => match permit.await {
                Ok(Ok(())) => {}
                Ok(Err(rejection)) => return Err(rejection.into_error()),
                // Permit dropped without an answer
                Err(_) => return Err(ResilienceError::ShuttingDown),
            },
        }

        operation().await.map_err(ResilienceError::Operation)
    }

    fn admit<E>(&self, priority: i32) -> ResilienceResult<Admission, E> {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();

        if state.shutting_down {
            return Err(ResilienceError::ShuttingDown);
        }

        state.refill(now);
        // Callers already waiting go first
        if !state.queue.is_empty() {
            state.drain(now);
        }

        if state.can_admit() {
            state.consume();
            return Ok(Admission::Immediate);
        }

        let capacity = state.config.queue_size;
        if state.queue.len() >= capacity {
            drop(state);
            warn!(capacity, priority, "admission queue full, rejecting request");
            return Err(ResilienceError::QueueFull { capacity });
        }

        let (id, permit) = state.queue.push(priority, now);
        let queue_length = state.queue.len();
        drop(state);

        debug!(request_id = %id, priority, queue_length, "rate limit reached, request queued");
        self.shared.observer.read().on_event(&ResilienceEvent::RequestQueued {
            id: id.to_string(),
            priority,
            queue_length,
        });

        Ok(Admission::Queued(permit))
    }

    /// Refill elapsed windows and dispatch queued requests while budget
    /// allows. This is the body of the background tick.
    pub fn process_queue(&self) -> DrainReport {
        self.shared.process_queue()
    }

    /// Budget usage per window.
    ///
    /// Reports bucket state as stored; a window whose reset time has passed
    /// shows `resets_in == 0` until the next admission or tick refills it.
    pub fn get_status(&self) -> RateLimiterStatus {
        let now = self.shared.clock.now();
        let state = self.shared.state.lock();
        RateLimiterStatus {
            minute: state.minute.status(now),
            hour: state.hour.status(now),
            day: state.day.status(now),
            burst_mode: state.config.enable_burst_mode,
            queued: state.queue.len(),
        }
    }

    /// Admission queue summary
    pub fn get_queue_status(&self) -> QueueStatus {
        let now = self.shared.clock.now();
        let state = self.shared.state.lock();
        let queue = &state.queue;

        QueueStatus {
            length: queue.len(),
            capacity: state.config.queue_size,
            oldest_wait: queue
                .iter()
                .map(|entry| now.saturating_duration_since(entry.enqueued_at))
                .max(),
            highest_priority: queue.iter().map(|entry| entry.priority).max(),
            lowest_priority: queue.iter().map(|entry| entry.priority).min(),
        }
    }

    /// Reject every queued request with [`ResilienceError::QueueCleared`]
    pub fn clear_queue(&self) -> usize {
        let cleared = self.shared.state.lock().queue.reject_all(Rejection::Cleared);
        if cleared > 0 {
            info!(cleared, "admission queue cleared");
        }
        cleared
    }

    /// Current configuration
    pub fn get_config(&self) -> RateLimiterConfig {
        self.shared.state.lock().config.clone()
    }

    /// Merge a partial update and reinitialize every window to the new
    /// capacities.
    ///
    /// Consumption counters start from zero again. Waiting callers stay
    /// queued and are dispatched against the fresh budgets.
    pub fn update_config(&self, update: RateLimiterConfigUpdate) -> CallguardResult<()> {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();

        let mut next = state.config.clone();
        next.merge(update);
        next.validate()?;

        let interval_changed = next.tick_interval != state.config.tick_interval;
        let tick_interval = next.tick_interval;
        state.config = next;
        state.reset_buckets(now);
        let report = state.drain(now);
        let shutting_down = state.shutting_down;
        drop(state);

        info!(dispatched = report.dispatched, "rate limiter configuration updated");

        if interval_changed && !shutting_down {
            let tick = Self::spawn_tick(Arc::downgrade(&self.shared), tick_interval);
            // The replaced task is cancelled on drop
            *self.tick.lock() = Some(tick);
        }

        Ok(())
    }

    /// Stop the background tick and reject every queued request.
    ///
    /// Later calls to [`execute`](Self::execute) fail with
    /// [`ResilienceError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.shared.state.lock().shutting_down = true;

        let tick = self.tick.lock().take();
        if let Some(tick) = tick {
            tick.stop().await;
        }

        let rejected = self.shared.state.lock().queue.reject_all(Rejection::ShuttingDown);
        info!(rejected, "rate limiter shut down");
    }
}
