//! Shell-safe command strings and the runners that execute them.
//!
//! A [`CommandString`] is a program, its arguments, environment assignments
//! and an optional working directory. It renders to a single shell line for
//! logs and for remote execution, and converts to a [`std::process::Command`]
//! for local execution without going through a shell.
//!
//! [`CommandRunner`] is the seam between labkit and the machines it drives:
//! given a [`Host`] and a command, produce `{stdout, stderr, status}`.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};

/// Quote `word` for a POSIX shell.
///
/// Words made only of characters the shell never interprets are returned
/// unchanged; everything else is wrapped in single quotes.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// A program invocation that can be rendered for a shell or run directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandString {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl CommandString {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// A script run by `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Render as one shell command line.
    pub fn render(&self) -> String {
        let mut line = String::new();
        if let Some(dir) = &self.cwd {
            line.push_str("cd ");
            line.push_str(&shell_quote(&dir.to_string_lossy()));
            line.push_str(" && ");
        }
        for (key, value) in &self.env {
            line.push_str(key);
            line.push('=');
            line.push_str(&shell_quote(value));
            line.push(' ');
        }
        line.push_str(&shell_quote(&self.program));
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        line
    }

    /// Build a local [`Command`] that runs this invocation without a shell.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Host {
    #[default]
    Local,
    Remote(String),
}

impl Host {
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("localhost"),
            Self::Remote(name) => f.write_str(name),
        }
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(Error::Config("empty host name".to_string())),
            "local" | "localhost" => Ok(Self::Local),
            name if name.starts_with('-') => Err(option_like(name)),
            name => Ok(Self::Remote(name.to_string())),
        }
    }
}

/// ssh would read such a name as an option.
fn option_like(name: &str) -> Error {
    Error::Config(format!("host name `{name}` must not start with '-'"))
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Human-readable exit status.
    pub fn status_text(&self) -> String {
        self.status
            .map_or_else(|| "killed by signal".to_string(), |code| format!("exit {code}"))
    }

    /// Turn a failing status into [`Error::CommandFailed`].
    pub fn check(self, command: &CommandString, host: &Host) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            command: command.render(),
            host: host.to_string(),
            status: self.status_text(),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        }
    }
}

/// Executes commands on a named host.
pub trait CommandRunner {
    /// Build the local process that carries out `command` on `host`.
    fn build(&self, host: &Host, command: &CommandString) -> Result<Command>;

    /// Run `command` on `host` to completion and capture its output.
    fn run(&self, host: &Host, command: &CommandString) -> Result<CommandOutput> {
        let rendered = command.render();
        tracing::debug!(%host, command = %rendered, "exec");
        let output = self
            .build(host, command)?
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::Spawn {
                command: rendered,
                source,
            })?;
        Ok(output.into())
    }
}

/// Runs commands on this machine only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn build(&self, host: &Host, command: &CommandString) -> Result<Command> {
        if !host.is_local() {
            return Err(Error::UnsupportedHost(host.to_string()));
        }
        Ok(command.to_command())
    }
}

/// Runs commands locally, or over ssh for remote hosts.
#[derive(Debug, Clone)]
pub struct SshRunner {
    ssh_bin: PathBuf,
    options: Vec<String>,
    user: Option<String>,
}

impl SshRunner {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            options: config.ssh_options.clone(),
            user: config.user.clone(),
        }
    }

    fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }
}

impl Default for SshRunner {
    fn default() -> Self {
        Self::new(&RemoteConfig::default())
    }
}

impl CommandRunner for SshRunner {
    fn build(&self, host: &Host, command: &CommandString) -> Result<Command> {
        match host {
            Host::Local => Ok(command.to_command()),
            Host::Remote(name) if name.starts_with('-') => Err(option_like(name)),
            Host::Remote(name) => {
                let mut cmd = Command::new(&self.ssh_bin);
                cmd.args(&self.options)
                    .arg(self.destination(name))
                    .arg("--")
                    .arg(command.render());
                Ok(cmd)
            }
        }
    }
}
