//! Units of work that run outside the polling thread.
//!
//! An [`AsyncTask`] is started once, can be asked without blocking whether it
//! has finished, and hands back its outcome through a blocking
//! [`AsyncTask::result`] call that is safe to repeat: after the first real
//! completion every call replays the cached outcome.

pub mod async_sub;
pub mod command;

pub use async_sub::AsyncSub;
pub use command::CommandTask;

/// Errors captured from, or about, a task.
///
/// Cloneable so a cached outcome can be replayed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("{name} has not been started")]
    NotStarted { name: String },

    #[error("{name} was already started")]
    AlreadyStarted { name: String },

    #[error("Failed to start {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("{name} failed: {message}")]
    Failed { name: String, message: String },

    #[error("{name} exited with {status}: {stderr}")]
    Exited {
        name: String,
        status: String,
        stderr: String,
    },

    #[error("{name} panicked: {message}")]
    Panicked { name: String, message: String },
}

/// Contract between the future layer and whatever executes the work.
pub trait AsyncTask {
    type Output: Clone;

    /// Name used in logs and in "waiting for" descriptions.
    fn name(&self) -> &str;

    /// Begin execution without blocking. Starting twice is an error.
    ///
    /// A failed start still counts as started: the task reports complete and
    /// [`AsyncTask::result`] replays the start error.
    fn start(&mut self) -> Result<(), TaskError>;

    fn is_started(&self) -> bool;

    /// Non-blocking completion check.
    fn is_complete(&mut self) -> bool;

    /// Block until the task finishes and return its outcome.
    ///
    /// Calling this before [`AsyncTask::start`] is
    /// [`TaskError::NotStarted`].
    fn result(&mut self) -> Result<Self::Output, TaskError>;
}
