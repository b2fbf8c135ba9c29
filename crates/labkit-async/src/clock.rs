//! Monotonic time with a virtual offset.

use std::time::{Duration, Instant};

/// Real monotonic time shifted forward by however much virtual time was added.
///
/// A fresh clock reads exactly `Instant::now()`, so triggers may compute their
/// first deadline from `Instant::now()` at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clock {
    offset: Duration,
}

impl Clock {
    pub const fn new() -> Self {
        Self {
            offset: Duration::ZERO,
        }
    }

    pub fn now(&self) -> Instant {
        Instant::now() + self.offset
    }

    /// Pretend `delta` has elapsed.
    pub fn advance(&mut self, delta: Duration) {
        self.offset += delta;
    }

    pub const fn offset(&self) -> Duration {
        self.offset
    }
}
