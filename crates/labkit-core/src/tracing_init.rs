//! Shared tracing/logging initialization.
//!
//! The `labkit` binary and anything embedding the future core use the same
//! pattern for setting up `tracing_subscriber` with an env-filter and
//! optional JSON output.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when it is set and parses; otherwise `default_filter`
/// applies (see [`default_filter`]). With `log_json` every event is one JSON
/// object per line. Logs go to stderr so command output on stdout stays
/// machine-readable.
///
/// Fails, instead of panicking, when a global subscriber is already set.
pub fn init_tracing(default_filter: &str, log_json: bool) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let output = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let output = if log_json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()
}

/// Filter string applying `level` to every labkit crate.
pub fn default_filter(level: &str) -> String {
    ["labkit", "labkit_cli", "labkit_core", "labkit_async"]
        .map(|target| format!("{target}={level}"))
        .join(",")
}
