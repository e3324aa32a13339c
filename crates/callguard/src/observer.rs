//! Observability signals
//!
//! Components report what they do through an injected
//! [`ResilienceObserver`]. Signals are diagnostic only: nothing a component
//! decides depends on whether an observer is listening or what it does with
//! the event.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::resilience::CircuitState;

/// Why a cache entry left the cache other than by explicit delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Removed to make room under the byte budget
    Capacity,
    /// Removed because its TTL passed
    Expired,
}

/// Structured event emitted by the pipeline components
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// A request could not be admitted and is waiting in the queue
    RequestQueued { id: String, priority: i32, queue_length: usize },
    /// A request went through the pipeline successfully
    RequestCompleted { duration: Duration, cached: bool },
    /// A request failed, either rejected or with an operation error
    RequestFailed { duration: Duration, error: String, rejected: bool },
    /// Cache lookup found a live entry
    CacheHit { key: String },
    /// Cache lookup found nothing (or only an expired entry)
    CacheMiss { key: String },
    /// An entry was evicted
    CacheEviction { key: String, reason: EvictionReason, size_bytes: usize },
    /// A retry is about to be scheduled
    RetryAttempt { attempt: u32, delay: Duration },
    /// An attempt failed
    RetryError { attempt: u32, error: String, retryable: bool },
    /// Retries ran out; the last error is being returned
    RetryExhausted { attempts: u32, error: String },
    /// The operation succeeded
    RetrySuccess { attempts: u32 },
    /// Circuit breaker moved between states
    CircuitStateChange { from: CircuitState, to: CircuitState },
}

impl ResilienceEvent {
    /// Stable signal name
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestQueued { .. } => "request-queued",
            Self::RequestCompleted { .. } => "request-completed",
            Self::RequestFailed { .. } => "request-failed",
            Self::CacheHit { .. } => "cache-hit",
            Self::CacheMiss { .. } => "cache-miss",
            Self::CacheEviction { .. } => "cache-eviction",
            Self::RetryAttempt { .. } => "retry-attempt",
            Self::RetryError { .. } => "retry-error",
            Self::RetryExhausted { .. } => "retry-exhausted",
            Self::RetrySuccess { .. } => "retry-success",
            Self::CircuitStateChange { .. } => "circuit-state-change",
        }
    }
}

/// Receives pipeline events
pub trait ResilienceObserver: Send + Sync + Debug {
    /// Handle one event. Must not block.
    fn on_event(&self, event: &ResilienceEvent);
}

/// Shared observer handle as stored by components
pub type SharedObserver = Arc<dyn ResilienceObserver>;

/// Observer that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {
    fn on_event(&self, _event: &ResilienceEvent) {}
}

/// Default shared observer
pub fn noop() -> SharedObserver {
    Arc::new(NoopObserver)
}

/// Observer that turns every event into a `tracing` record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ResilienceObserver for TracingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        let signal = event.name();
        match event {
            ResilienceEvent::RequestQueued { id, priority, queue_length } => {
                debug!(signal, request_id = %id, priority, queue_length, "request queued");
            }
            ResilienceEvent::RequestCompleted { duration, cached } => {
                debug!(signal, ?duration, cached, "request completed");
            }
            ResilienceEvent::RequestFailed { duration, error, rejected } => {
                warn!(signal, ?duration, rejected, error = %error, "request failed");
            }
            ResilienceEvent::CacheHit { key } | ResilienceEvent::CacheMiss { key } => {
                debug!(signal, key = %key, "cache lookup");
            }
            ResilienceEvent::CacheEviction { key, reason, size_bytes } => {
                debug!(signal, key = %key, ?reason, size_bytes, "cache eviction");
            }
            ResilienceEvent::RetryAttempt { attempt, delay } => {
                debug!(signal, attempt, ?delay, "retry scheduled");
            }
            ResilienceEvent::RetryError { attempt, error, retryable } => {
                debug!(signal, attempt, retryable, error = %error, "attempt failed");
            }
            ResilienceEvent::RetryExhausted { attempts, error } => {
                warn!(signal, attempts, error = %error, "retries exhausted");
            }
            ResilienceEvent::RetrySuccess { attempts } => {
                debug!(signal, attempts, "operation succeeded");
            }
            ResilienceEvent::CircuitStateChange { from, to } => {
                info!(signal, %from, %to, "circuit state changed");
            }
        }
    }
}

/// Observer that forwards events over an unbounded channel
///
/// A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ResilienceEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResilienceEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ResilienceObserver for ChannelObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        let _ = self.sender.send(event.clone());
    }
}
