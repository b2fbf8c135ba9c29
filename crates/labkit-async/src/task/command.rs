//! Run a [`CommandString`] as a child process.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use labkit_core::{CommandOutput, CommandRunner, CommandString, Host};

use super::{AsyncTask, TaskError};

/// A command running in its own OS process, locally or through ssh.
///
/// Stdout and stderr are drained by reader threads while the process runs,
/// so a chatty child never stalls on a full pipe. The task is complete once
/// the process has exited and both pipes are closed; a backgrounded
/// grandchild that inherited them keeps the task running. A non-zero exit
/// is the captured error.
pub struct CommandTask {
    id: String,
    name: String,
    process: Option<Command>,
    child: Option<Child>,
    readers: Option<(JoinHandle<String>, JoinHandle<String>)>,
    status: Option<ExitStatus>,
    outcome: Option<Result<CommandOutput, TaskError>>,
}

impl CommandTask {
    /// Prepare `command` to run on `host`. Nothing is spawned until
    /// [`AsyncTask::start`].
    pub fn new(
        runner: &dyn CommandRunner,
        host: &Host,
        command: &CommandString,
    ) -> labkit_core::Result<Self> {
        let process = runner.build(host, command)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("`{command}` on {host}"),
            process: Some(process),
            child: None,
            readers: None,
            status: None,
            outcome: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operating system process id, while the child is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Kill the child process if it is still running.
    pub fn kill(&mut self) -> std::io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        match self.child.as_mut() {
            Some(child) => {
                warn!(task_id = %self.id, task = %self.name, "Killing command");
                child.kill()
            }
            None => Ok(()),
        }
    }

    fn failure(&self, message: impl Into<String>) -> TaskError {
        TaskError::Failed {
            name: self.name.clone(),
            message: message.into(),
        }
    }

    fn pipes_closed(&self) -> bool {
        self.readers
            .as_ref()
            .is_none_or(|(out, err)| out.is_finished() && err.is_finished())
    }

    fn collect(&mut self, status: ExitStatus) -> Result<CommandOutput, TaskError> {
        let (stdout, stderr) = match self.readers.take() {
            Some((out, err)) => (
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        let output = CommandOutput {
            stdout,
            stderr,
            status: status.code(),
        };
        if output.success() {
            return Ok(output);
        }
        Err(TaskError::Exited {
            name: self.name.clone(),
            status: output.status_text(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn drain<R>(mut pipe: R) -> JoinHandle<String>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(error = %e, "Pipe read ended early");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl AsyncTask for CommandTask {
    type Output = CommandOutput;

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), TaskError> {
        let Some(mut process) = self.process.take() else {
            return Err(TaskError::AlreadyStarted {
                name: self.name.clone(),
            });
        };
        let spawned = process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let err = TaskError::Spawn {
                    name: self.name.clone(),
                    reason: e.to_string(),
                };
                self.outcome = Some(Err(err.clone()));
                return Err(err);
            }
        };

        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            self.readers = Some((drain(stdout), drain(stderr)));
        }
        info!(task_id = %self.id, task = %self.name, pid = child.id(), "Started command");
        self.child = Some(child);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.process.is_none()
    }

    fn is_complete(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        if self.status.is_none() {
            let Some(child) = self.child.as_mut() else {
                return false;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(task_id = %self.id, ?status, "Command exited");
                    self.status = Some(status);
                }
                Ok(None) => return false,
                Err(e) => {
                    let err = self.failure(format!("could not query process status: {e}"));
                    self.outcome = Some(Err(err));
                    return true;
                }
            }
        }
        self.pipes_closed()
    }

    fn result(&mut self) -> Result<CommandOutput, TaskError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let status = match (self.status, self.child.as_mut()) {
            (Some(status), _) => status,
            (None, Some(child)) => match child.wait() {
                Ok(status) => status,
                Err(e) => {
                    let err = self.failure(format!("could not wait for process: {e}"));
                    self.outcome = Some(Err(err.clone()));
                    return Err(err);
                }
            },
            (None, None) => {
                return Err(TaskError::NotStarted {
                    name: self.name.clone(),
                });
            }
        };
        self.status = Some(status);
        let outcome = self.collect(status);
        match &outcome {
            Ok(_) => info!(task_id = %self.id, task = %self.name, "Command succeeded"),
            Err(err) => warn!(task_id = %self.id, error = %err, "Command failed"),
        }
        self.outcome = Some(outcome.clone());
        outcome
    }
}
