//! Bridge from an [`AsyncTask`] into the polling model.

use std::cell::{Cell, RefCell};
use std::time::Instant;

use tracing::debug;

use crate::deferred::{Deferred, Trigger};
use crate::error::{FutureError, Result};
use crate::task::{AsyncTask, TaskError};

type SuccessHandler<T> = Box<dyn FnOnce(T) -> anyhow::Result<()>>;
type ErrorHandler = Box<dyn FnOnce(TaskError) -> anyhow::Result<()>>;

/// Completes exactly when the wrapped task does.
///
/// On completion the outcome is dispatched once: to `on_success` with the
/// task's value, or to `on_error` with the captured error. A failed task
/// with no error handler turns into [`FutureError::TaskFailed`], naming what
/// was being awaited.
///
/// Cancelling the resulting future does not stop the task.
pub struct AfterTask<T: AsyncTask> {
    task: RefCell<T>,
    what_for: String,
    on_success: RefCell<Option<SuccessHandler<T::Output>>>,
    on_error: RefCell<Option<ErrorHandler>>,
    finished: Cell<bool>,
}

impl<T> AfterTask<T>
where
    T: AsyncTask + 'static,
{
    pub fn new(task: T) -> Self {
        let what_for = task.name().to_string();
        Self {
            task: RefCell::new(task),
            what_for,
            on_success: RefCell::new(None),
            on_error: RefCell::new(None),
            finished: Cell::new(false),
        }
    }

    #[must_use]
    pub fn on_success<F>(self, handler: F) -> Self
    where
        F: FnOnce(T::Output) -> anyhow::Result<()> + 'static,
    {
        *self.on_success.borrow_mut() = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: FnOnce(TaskError) -> anyhow::Result<()> + 'static,
    {
        *self.on_error.borrow_mut() = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.what_for = label.into();
        self
    }

    /// Start the task unless the caller already did, and wrap it.
    pub fn start(self) -> Result<Deferred> {
        {
            let mut task = self.task.borrow_mut();
            if !task.is_started() {
                task.start()?;
            }
        }
        Ok(Deferred::new(self))
    }

    /// Wrap without starting. The task starts on the first poll, which is
    /// what keeps later entries of an [`crate::InOrder`] from running early.
    pub fn deferred(self) -> Deferred {
        Deferred::new(self)
    }

    fn callback_error(&self, source: anyhow::Error) -> FutureError {
        FutureError::Callback {
            what_for: self.what_for.clone(),
            source,
        }
    }
}

impl<T> Trigger for AfterTask<T>
where
    T: AsyncTask + 'static,
{
    fn test(&self, _now: Instant) -> Result<bool> {
        if self.finished.get() {
            return Ok(true);
        }
        let outcome = {
            let mut task = self.task.borrow_mut();
            if !task.is_started()
                && let Err(err) = task.start()
            {
                debug!(what_for = %self.what_for, error = %err, "Task failed to start");
            }
            if !task.is_complete() {
                return Ok(false);
            }
            task.result()
        };
        self.finished.set(true);
        debug!(what_for = %self.what_for, ok = outcome.is_ok(), "Task completed");

        match outcome {
            Ok(value) => {
                let handler = self.on_success.borrow_mut().take();
                if let Some(handler) = handler {
                    handler(value).map_err(|e| self.callback_error(e))?;
                }
            }
            Err(err) => {
                let handler = self.on_error.borrow_mut().take();
                match handler {
                    Some(handler) => handler(err).map_err(|e| self.callback_error(e))?,
                    None => {
                        return Err(FutureError::TaskFailed {
                            what_for: self.what_for.clone(),
                            source: err,
                        });
                    }
                }
            }
        }
        Ok(true)
    }

    fn is_complete(&self) -> bool {
        self.finished.get()
    }

    fn what_for(&self) -> String {
        self.what_for.clone()
    }
}
