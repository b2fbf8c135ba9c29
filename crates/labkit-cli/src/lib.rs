//! labkit CLI library.
//!
//! The `labkit` binary is a thin wrapper; the run driver and the summary it
//! produces live here so they can be exercised from tests.

pub mod run;
pub mod summary;

pub use run::{Run, RunPlan, drive};
pub use summary::{CommandReport, RunEnd, RunSummary, Target};
