//! Run a closure on its own worker thread.

use std::any::Any;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use super::{AsyncTask, TaskError};

type Work<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'static>;

/// A closure executed off the polling thread.
///
/// An `Err` returned by the closure, or a panic inside it, becomes the
/// captured [`TaskError`].
pub struct AsyncSub<T> {
    name: String,
    work: Option<Work<T>>,
    handle: Option<JoinHandle<anyhow::Result<T>>>,
    outcome: Option<Result<T, TaskError>>,
}

impl<T> AsyncSub<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Some(Box::new(work)),
            handle: None,
            outcome: None,
        }
    }

    fn join(&self, handle: JoinHandle<anyhow::Result<T>>) -> Result<T, TaskError> {
        match handle.join() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::Failed {
                name: self.name.clone(),
                message: format!("{err:#}"),
            }),
            Err(payload) => Err(TaskError::Panicked {
                name: self.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl<T> AsyncTask for AsyncSub<T>
where
    T: Clone + Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), TaskError> {
        let Some(work) = self.work.take() else {
            return Err(TaskError::AlreadyStarted {
                name: self.name.clone(),
            });
        };
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(work);
        match spawned {
            Ok(handle) => {
                info!(task = %self.name, "Started async sub");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = TaskError::Spawn {
                    name: self.name.clone(),
                    reason: e.to_string(),
                };
                self.outcome = Some(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn is_started(&self) -> bool {
        self.work.is_none()
    }

    fn is_complete(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    fn result(&mut self) -> Result<T, TaskError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let Some(handle) = self.handle.take() else {
            return Err(TaskError::NotStarted {
                name: self.name.clone(),
            });
        };
        let outcome = self.join(handle);
        match &outcome {
            Ok(_) => debug!(task = %self.name, "Async sub finished"),
            Err(err) => warn!(task = %self.name, error = %err, "Async sub failed"),
        }
        self.outcome = Some(outcome.clone());
        outcome
    }
}
