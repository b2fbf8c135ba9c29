//! Time-based triggers.
//!
//! [`Timer`] fires a callback every time its deadline passes and reschedules
//! itself; it only finishes when cancelled. [`Deadline`] fires once.
//!
//! Deadlines are cooperative: nothing fires unless someone polls. A timer
//! fires at most once per poll and never catches up on missed intervals; the
//! next deadline is always `now + interval` measured at the moment of firing.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::deferred::{Deferred, Trigger};
use crate::error::{FutureError, Result};

/// Callback run on every timer firing.
pub type TickCallback = Box<dyn FnMut() -> anyhow::Result<()>>;

/// Repeating trigger.
pub struct Timer {
    interval: Duration,
    deadline: Cell<Instant>,
    callback: RefCell<TickCallback>,
    label: Option<String>,
}

impl Timer {
    /// Fire `callback` every `interval`, first after one interval.
    pub fn new<F>(interval: Duration, callback: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self {
            interval,
            deadline: Cell::new(Instant::now() + interval),
            callback: RefCell::new(Box::new(callback)),
            label: None,
        }
    }

    /// Fire for the first time after `delay` instead of one interval.
    #[must_use]
    pub fn first_delay(self, delay: Duration) -> Self {
        self.deadline.set(Instant::now() + delay);
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Wrap into a pollable future.
    pub fn start(self) -> Deferred {
        Deferred::new(self)
    }
}

impl Trigger for Timer {
    fn test(&self, now: Instant) -> Result<bool> {
        if now < self.deadline.get() {
            return Ok(false);
        }
        self.deadline.set(now + self.interval);
        trace!(interval = ?self.interval, "Timer fired");
        let outcome = {
            let mut callback = self.callback.borrow_mut();
            (*callback)()
        };
        outcome.map_err(|source| FutureError::Callback {
            what_for: self.what_for(),
            source,
        })?;
        Ok(false)
    }

    fn what_for(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("timer every {:?}", self.interval))
    }
}

/// One-shot trigger that completes once its deadline has passed.
#[derive(Debug)]
pub struct Deadline {
    deadline: Instant,
    label: Option<String>,
}

impl Deadline {
    pub fn after(delay: Duration) -> Self {
        Self {
            deadline: Instant::now() + delay,
            label: None,
        }
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn start(self) -> Deferred {
        Deferred::new(self)
    }
}

impl Trigger for Deadline {
    fn test(&self, now: Instant) -> Result<bool> {
        Ok(now >= self.deadline)
    }

    fn what_for(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| "deadline to pass".to_string())
    }
}
