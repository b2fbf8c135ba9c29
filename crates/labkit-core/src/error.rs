//! Error types for labkit core library.

use thiserror::Error;

/// Result type alias using labkit Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for labkit operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command could not be started at all
    #[error("Failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command ran but reported failure
    #[error("`{command}` on {host} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        host: String,
        status: String,
        stderr: String,
    },

    /// The runner cannot reach the requested host
    #[error("Runner cannot execute on host {0}")]
    UnsupportedHost(String),
}
