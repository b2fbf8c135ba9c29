//! Error types for the future core.

use thiserror::Error;

use crate::task::TaskError;

/// Result type alias using [`FutureError`].
pub type Result<T> = std::result::Result<T, FutureError>;

/// Fatal failures surfaced by `poll()` and friends.
///
/// "Not done yet" is never an error; it is `is_done() == false`.
#[derive(Debug, Error)]
pub enum FutureError {
    /// A task failed and nobody registered an error handler.
    #[error("Failed while waiting for {what_for}: {source}")]
    TaskFailed {
        what_for: String,
        #[source]
        source: TaskError,
    },

    /// A user callback returned an error.
    #[error("Callback failed while waiting for {what_for}: {source:#}")]
    Callback {
        what_for: String,
        #[source]
        source: anyhow::Error,
    },

    /// The time limit elapsed and no timeout handler was registered.
    #[error("Timed out waiting for {what_for}")]
    TimedOut { what_for: String },

    /// `wait()` on a future that was cancelled.
    #[error("Not running: {what_for}")]
    NotRunning { what_for: String },

    /// `wait()` from inside the future's own poll.
    #[error("Already polling: {what_for}")]
    Reentrant { what_for: String },

    /// Adding a child to a combinator that already completed.
    #[error("Cannot add to a finished future ({what_for})")]
    Finished { what_for: String },

    /// A task could not be started.
    #[error(transparent)]
    Task(#[from] TaskError),
}
