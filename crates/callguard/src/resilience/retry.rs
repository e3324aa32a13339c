//! Classified retry with exponential backoff and jitter
//!
//! Only failures that carry a transient signal are retried: a configured
//! network error code, a configured HTTP status, or an explicit
//! rate-limit/timeout marker. When the policy gives up, the last error is
//! returned exactly as the operation produced it.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{CallguardError, CallguardResult};
use crate::observer::{self, ResilienceEvent, SharedObserver};
use crate::utils::duration_millis;

/// Network error codes retried by default
pub const DEFAULT_RETRYABLE_CODES: [&str; 6] =
    ["ECONNRESET", "ETIMEDOUT", "ECONNREFUSED", "ENOTFOUND", "ENETUNREACH", "EAI_AGAIN"];

/// HTTP statuses retried by default
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Signals the retry policy reads from an error
///
/// Every method defaults to "no signal", so an error type that implements
/// none of them is never retried.
pub trait ClassifyError {
    /// Transport error code such as `ECONNRESET`
    fn error_code(&self) -> Option<&str> {
        None
    }

    /// HTTP status carried by the error
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// The provider explicitly reported that its quota was exceeded
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// The call ran out of time
    fn is_timeout(&self) -> bool {
        false
    }
}

impl ClassifyError for io::Error {
    fn error_code(&self) -> Option<&str> {
        match self.kind() {
            io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
            io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
            _ => None,
        }
    }

    fn is_timeout(&self) -> bool {
        self.kind() == io::ErrorKind::TimedOut
    }
}

/// Retry behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    /// Delay before the first retry, also the lower clamp
    #[serde(rename = "initial_delay_ms", with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper clamp for any single delay
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub backoff_factor: f64,
    /// Relative jitter in `[0, 1]`
    pub jitter_factor: f64,
    pub retryable_error_codes: Vec<String>,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_error_codes: DEFAULT_RETRYABLE_CODES.iter().map(ToString::to_string).collect(),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CallguardResult<()> {
        if self.initial_delay > self.max_delay {
            return Err(CallguardError::invalid(
                "initial_delay",
                "must not be greater than max_delay",
            ));
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(CallguardError::invalid("backoff_factor", "must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(CallguardError::invalid("jitter_factor", "must be between 0.0 and 1.0"));
        }

        Ok(())
    }

    /// True when the error carries any configured transient signal
    pub fn is_retryable<E: ClassifyError + ?Sized>(&self, error: &E) -> bool {
        if error.is_rate_limited() || error.is_timeout() {
            return true;
        }

        if let Some(code) = error.error_code() {
            if self.retryable_error_codes.iter().any(|c| c == code) {
                return true;
            }
        }

        error.status_code().is_some_and(|status| self.retryable_status_codes.contains(&status))
    }

    /// Delay before retry number `attempt` (1-based) for a jitter sample in
    /// `[-1, 1]`
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let jittered = base * (1.0 + self.jitter_factor * jitter_sample.clamp(-1.0, 1.0));

        let floor = self.initial_delay.as_secs_f64();
        let ceiling = self.max_delay.as_secs_f64();
        let seconds = if jittered.is_finite() { jittered.max(floor).min(ceiling) } else { ceiling };

        Duration::try_from_secs_f64(seconds).unwrap_or(self.max_delay)
    }

    fn merge(&mut self, update: RetryConfigUpdate) {
        let RetryConfigUpdate {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor,
            jitter_factor,
            retryable_error_codes,
            retryable_status_codes,
        } = update;

        if let Some(v) = max_retries {
            self.max_retries = v;
        }
        if let Some(v) = initial_delay {
            self.initial_delay = v;
        }
        if let Some(v) = max_delay {
            self.max_delay = v;
        }
        if let Some(v) = backoff_factor {
            self.backoff_factor = v;
        }
        if let Some(v) = jitter_factor {
            self.jitter_factor = v;
        }
        if let Some(v) = retryable_error_codes {
            self.retryable_error_codes = v;
        }
        if let Some(v) = retryable_status_codes {
            self.retryable_status_codes = v;
        }
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    pub fn retryable_error_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.retryable_error_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn retryable_status_codes<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.config.retryable_status_codes = statuses.into_iter().collect();
        self
    }

    pub fn build(self) -> CallguardResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Partial update applied by [`RetryPolicy::update_config`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryConfigUpdate {
    pub max_retries: Option<u32>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_factor: Option<f64>,
    pub jitter_factor: Option<f64>,
    pub retryable_error_codes: Option<Vec<String>>,
    pub retryable_status_codes: Option<Vec<u16>>,
}

/// Retries a single async operation according to a [`RetryConfig`]
pub struct RetryPolicy {
    config: RwLock<Arc<RetryConfig>>,
    observer: SharedObserver,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy").field("config", &self.config.read()).finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { config: RwLock::new(Arc::new(RetryConfig::default())), observer: observer::noop() }
    }
}

impl RetryPolicy {
    /// Create a policy from a validated configuration
    pub fn new(config: RetryConfig) -> CallguardResult<Self> {
        config.validate()?;
        Ok(Self { config: RwLock::new(Arc::new(config)), observer: observer::noop() })
    }

    /// Report retry signals to `observer`
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Current configuration
    pub fn get_config(&self) -> RetryConfig {
        RetryConfig::clone(&**self.config.read())
    }

    /// Merge a partial update into the configuration.
    ///
    /// Calls already in progress keep the configuration they started with.
    pub fn update_config(&self, update: RetryConfigUpdate) -> CallguardResult<()> {
        let mut next = self.get_config();
        next.merge(update);
        next.validate()?;
        *self.config.write() = Arc::new(next);
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), with a fresh jitter
    /// sample
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.config.read().delay_for(attempt, sample)
    }

    /// Run `operation`, retrying classified-transient failures.
    ///
    /// Returns the first success, or the last error unchanged once the
    /// error is not retryable or `max_retries` retries have been spent.
    #[instrument(skip_all)]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + fmt::Display,
    {
        let config = Arc::clone(&*self.config.read());
        let mut attempt: u32 = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    self.observer.on_event(&ResilienceEvent::RetrySuccess { attempts: attempt });
                    return Ok(value);
                }
                Err(error) => {
                    let retryable = config.is_retryable(&error);
                    self.observer.on_event(&ResilienceEvent::RetryError {
                        attempt,
                        error: error.to_string(),
                        retryable,
                    });

                    if !retryable {
                        debug!(attempt, error = %error, "error is not retryable");
                        return Err(error);
                    }

                    if attempt > config.max_retries {
                        warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                        self.observer.on_event(&ResilienceEvent::RetryExhausted {
                            attempts: attempt,
                            error: error.to_string(),
                        });
                        return Err(error);
                    }

                    let sample = rand::thread_rng().gen_range(-1.0..=1.0);
                    let delay = config.delay_for(attempt, sample);
                    debug!(attempt, ?delay, error = %error, "retrying after transient failure");
                    self.observer.on_event(&ResilienceEvent::RetryAttempt { attempt, delay });

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
