//! Cooperative polling futures.
//!
//! Single-threaded, caller-driven deferred work:
//! - [`Deferred`]: shared handle holding completion state, re-entrancy guard,
//!   time limit and callbacks around one [`Trigger`]
//! - [`Timer`] and [`Deadline`]: time-based triggers with virtual time support
//! - [`FutureList`], [`AnyOrder`], [`InOrder`]: combinators over child futures
//! - [`AfterTask`]: completes when an [`AsyncTask`] finishes
//! - [`task`]: tasks that run on a worker thread or in a child process
//!
//! Nothing here spawns a scheduler. The caller invokes [`Deferred::poll`]
//! from its own loop until [`Deferred::is_done`] reports completion.

pub mod after_task;
pub mod clock;
pub mod deferred;
pub mod error;
pub mod list;
pub mod task;
pub mod timer;

pub use after_task::AfterTask;
pub use clock::Clock;
pub use deferred::{Deferred, FutureState, Trigger};
pub use error::{FutureError, Result};
pub use list::{AnyOrder, FutureList, InOrder};
pub use task::{AsyncSub, AsyncTask, CommandTask, TaskError};
pub use timer::{Deadline, Timer};
