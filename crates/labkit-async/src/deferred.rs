//! The shared future handle and the trigger interface behind it.
//!
//! A [`Deferred`] owns the state every future has: completion state, the
//! re-entrancy guard, a virtual clock, an optional time limit and the
//! completion/timeout callbacks. What makes a future fire is delegated to a
//! [`Trigger`]: a timer deadline, a drained child list, a finished task.
//!
//! Handles are `Rc`-based and meant for one polling thread. Cloning a handle
//! shares the future, which is how a callback can add work to the list that
//! is polling it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::{FutureError, Result};

/// One-shot callback run on completion or on time-limit expiry.
pub type DoneCallback = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Variant-specific completion logic.
///
/// Methods take `&self` so a description or completion query can be answered
/// while the same trigger is in the middle of [`Trigger::test`]; implementors
/// use interior mutability for their own state.
pub trait Trigger {
    /// Evaluate the completion condition once. `now` comes from the owning
    /// future's clock. Never called re-entrantly for the same future.
    fn test(&self, now: Instant) -> Result<bool>;

    /// Whether the trigger has fired, even if `test` then failed.
    fn is_complete(&self) -> bool {
        false
    }

    /// Propagate virtual time into nested futures.
    fn add_time(&self, _delta: Duration) {}

    /// What this trigger is waiting for.
    fn what_for(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Done,
    Cancelled,
}

struct Inner {
    state: Cell<FutureState>,
    polling: Cell<bool>,
    clock: Cell<Clock>,
    time_limit: Cell<Option<Instant>>,
    label: RefCell<Option<String>>,
    on_done: RefCell<Option<DoneCallback>>,
    on_timeout: RefCell<Option<DoneCallback>>,
    trigger: Box<dyn Trigger>,
}

/// Clears the polling flag on every exit path, including `?` returns.
struct PollGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> PollGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Shared handle to a cooperative future.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<Inner>,
}

impl Deferred {
    pub fn new(trigger: impl Trigger + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: Cell::new(FutureState::Pending),
                polling: Cell::new(false),
                clock: Cell::new(Clock::new()),
                time_limit: Cell::new(None),
                label: RefCell::new(None),
                on_done: RefCell::new(None),
                on_timeout: RefCell::new(None),
                trigger: Box::new(trigger),
            }),
        }
    }

    /// Replace the trigger's description in [`Self::what_for`].
    #[must_use]
    pub fn with_label(self, label: impl Into<String>) -> Self {
        *self.inner.label.borrow_mut() = Some(label.into());
        self
    }

    /// Run `callback` once when a poll observes the trigger firing.
    #[must_use]
    pub fn on_done<F>(self, callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        *self.inner.on_done.borrow_mut() = Some(Box::new(callback));
        self
    }

    /// Give up once `limit` has elapsed on this future's clock.
    #[must_use]
    pub fn with_time_limit(self, limit: Duration) -> Self {
        let deadline = self.inner.clock.get().now() + limit;
        self.inner.time_limit.set(Some(deadline));
        self
    }

    /// Handler for time-limit expiry. Without one, expiry is
    /// [`FutureError::TimedOut`].
    #[must_use]
    pub fn on_timeout<F>(self, callback: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        *self.inner.on_timeout.borrow_mut() = Some(Box::new(callback));
        self
    }

    /// Evaluate the future once.
    ///
    /// No-op when already finished or when this future is already being
    /// polled further up the stack. A failing trigger or callback propagates
    /// its error; the guard is released first. A trigger that fails after
    /// firing still leaves the future done and still runs `on_done`, before
    /// the trigger's error is returned.
    pub fn poll(&self) -> Result<()> {
        let inner = &*self.inner;
        if inner.state.get() != FutureState::Pending {
            return Ok(());
        }
        let Some(_guard) = PollGuard::acquire(&inner.polling) else {
            trace!(what_for = %self.what_for(), "Skipping re-entrant poll");
            return Ok(());
        };

        let now = inner.clock.get().now();
        let fired = match inner.trigger.test(now) {
            Ok(fired) => fired,
            Err(err) => {
                if inner.trigger.is_complete() && self.finish() {
                    let callback = inner.on_done.borrow_mut().take();
                    if let Some(callback) = callback
                        && let Err(e) = callback()
                    {
                        warn!(
                            what_for = %self.what_for(),
                            error = %format!("{e:#}"),
                            "Completion callback failed after trigger error"
                        );
                    }
                }
                return Err(err);
            }
        };

        if fired {
            if !self.finish() {
                return Ok(());
            }
            debug!(what_for = %self.what_for(), "Future done");
            let callback = inner.on_done.borrow_mut().take();
            if let Some(callback) = callback {
                callback().map_err(|source| FutureError::Callback {
                    what_for: self.what_for(),
                    source,
                })?;
            }
            return Ok(());
        }

        if let Some(limit) = inner.time_limit.get()
            && now >= limit
        {
            if !self.finish() {
                return Ok(());
            }
            let what_for = self.what_for();
            warn!(what_for = %what_for, "Time limit reached");
            let callback = inner.on_timeout.borrow_mut().take();
            return match callback {
                Some(callback) => {
                    callback().map_err(|source| FutureError::Callback { what_for, source })
                }
                None => Err(FutureError::TimedOut { what_for }),
            };
        }

        Ok(())
    }

    /// Mark done if still pending. Returns whether this call did it.
    fn finish(&self) -> bool {
        if self.inner.state.get() == FutureState::Pending {
            self.inner.state.set(FutureState::Done);
            self.inner.time_limit.set(None);
            true
        } else {
            false
        }
    }

    /// Pure query; never runs user code.
    pub fn is_done(&self) -> bool {
        self.inner.state.get() != FutureState::Pending
    }

    pub fn state(&self) -> FutureState {
        self.inner.state.get()
    }

    /// Abandon the future. Callbacks are dropped without running.
    ///
    /// Work behind the future (a child process, a worker thread) is not
    /// stopped.
    pub fn cancel(&self) {
        if self.inner.state.get() == FutureState::Pending {
            debug!(what_for = %self.what_for(), "Future cancelled");
            self.inner.state.set(FutureState::Cancelled);
            self.inner.time_limit.set(None);
            self.inner.on_done.borrow_mut().take();
            self.inner.on_timeout.borrow_mut().take();
        }
    }

    /// Advance this future's virtual time, and that of any nested futures.
    pub fn add_time(&self, delta: Duration) {
        let mut clock = self.inner.clock.get();
        clock.advance(delta);
        self.inner.clock.set(clock);
        self.inner.trigger.add_time(delta);
    }

    /// Human-readable description of what is being awaited.
    pub fn what_for(&self) -> String {
        if let Ok(label) = self.inner.label.try_borrow()
            && let Some(label) = label.as_ref()
        {
            return label.clone();
        }
        self.inner.trigger.what_for()
    }

    /// Poll until done, sleeping `poll_interval` between ticks.
    ///
    /// Blocks the calling thread. Returns at once for a done future, even
    /// from its own `on_done`. Fails fast on a cancelled future and when
    /// called from inside this future's own, still pending, poll.
    pub fn wait(&self, poll_interval: Duration) -> Result<()> {
        if self.inner.state.get() == FutureState::Done {
            return Ok(());
        }
        if self.inner.state.get() == FutureState::Cancelled {
            return Err(FutureError::NotRunning {
                what_for: self.what_for(),
            });
        }
        if self.inner.polling.get() {
            return Err(FutureError::Reentrant {
                what_for: self.what_for(),
            });
        }
        loop {
            self.poll()?;
            if self.is_done() {
                return Ok(());
            }
            std::thread::sleep(poll_interval);
        }
    }

}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .field("what_for", &self.what_for())
            .finish_non_exhaustive()
    }
}
