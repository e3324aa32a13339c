//! Fixed-window call budgets

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::utils::duration_millis;

/// One of the three budget windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    /// Length of the window
    pub const fn interval(self) -> Duration {
        match self {
            WindowKind::Minute => Duration::from_secs(60),
            WindowKind::Hour => Duration::from_secs(60 * 60),
            WindowKind::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKind::Minute => write!(f, "minute"),
            WindowKind::Hour => write!(f, "hour"),
            WindowKind::Day => write!(f, "day"),
        }
    }
}

/// Budget usage for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub consumed: u32,
    pub remaining: u32,
    pub capacity: u32,
    /// Time until the window refills; zero once it is due
    #[serde(rename = "resets_in_ms", with = "duration_millis")]
    pub resets_in: Duration,
}

/// Counter for one window, refilled wholesale when the window elapses
#[derive(Debug, Clone)]
pub(crate) struct WindowBucket {
    kind: WindowKind,
    capacity: u32,
    consumed: u32,
    window_start: Instant,
}

impl WindowBucket {
    pub(crate) fn new(kind: WindowKind, capacity: u32, now: Instant) -> Self {
        Self { kind, capacity, consumed: 0, window_start: now }
    }

    /// Refill if the window has elapsed, returning whether it did
    pub(crate) fn refill_if_elapsed(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= self.kind.interval() {
            self.consumed = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    pub(crate) fn kind(&self) -> WindowKind {
        self.kind
    }

    pub(crate) fn consumed(&self) -> u32 {
        self.consumed
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.consumed)
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.remaining() > 0
    }

    pub(crate) fn consume(&mut self) {
        self.consumed = self.consumed.saturating_add(1);
    }

    pub(crate) fn status(&self, now: Instant) -> WindowStatus {
        let resets_at = self.window_start + self.kind.interval();
        WindowStatus {
            consumed: self.consumed,
            remaining: self.remaining(),
            capacity: self.capacity,
            resets_in: resets_at.saturating_duration_since(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refill_exactly_at_interval() {
        let start = Instant::now();
        let mut bucket = WindowBucket::new(WindowKind::Minute, 2, start);
        bucket.consume();
        bucket.consume();
        assert!(!bucket.has_capacity());

        assert!(!bucket.refill_if_elapsed(start + Duration::from_secs(59)));
        assert_eq!(bucket.remaining(), 0);

        assert!(bucket.refill_if_elapsed(start + Duration::from_secs(60)));
        assert_eq!(bucket.remaining(), 2);
        assert_eq!(
            bucket.status(start + Duration::from_secs(70)).resets_in,
            Duration::from_secs(50)
        );
    }

    #[test]
    fn test_remaining_never_underflows() {
        let now = Instant::now();
        let mut bucket = WindowBucket::new(WindowKind::Day, 1, now);
        bucket.consume();
        bucket.consume();

        let status = bucket.status(now);
        assert_eq!(status.consumed, 2);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.resets_in, Duration::from_secs(86_400));
    }
}
