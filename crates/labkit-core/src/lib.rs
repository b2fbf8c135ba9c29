//! labkit Core Library
//!
//! Shared functionality for labkit components:
//! - Configuration resolution and hierarchy
//! - Shell-safe command strings
//! - Local and ssh command runners
//! - Common error types

pub mod command;
pub mod config;
pub mod error;
pub mod tracing_init;

pub use command::{CommandOutput, CommandRunner, CommandString, Host, LocalRunner, SshRunner};
pub use config::Config;
pub use error::{Error, Result};
