//! What a run produced, for printing at the end.

use std::fmt;

use serde::Serialize;

use labkit_async::TaskError;
use labkit_core::CommandOutput;

/// One command on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Task id, unique per run even when a command is repeated.
    pub id: String,
    pub host: String,
    pub command: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` on {}", self.command, self.host)
    }
}

/// How one command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    #[serde(flatten)]
    pub target: Target,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReport {
    pub fn succeeded(target: Target, output: CommandOutput) -> Self {
        Self {
            target,
            ok: true,
            status: Some(output.status_text()),
            stdout: output.stdout,
            stderr: output.stderr,
            error: None,
        }
    }

    pub fn failed(target: Target, err: &TaskError) -> Self {
        let (status, stderr) = match err {
            TaskError::Exited { status, stderr, .. } => (Some(status.clone()), stderr.clone()),
            _ => (None, String::new()),
        };
        Self {
            target,
            ok: false,
            status,
            stdout: String::new(),
            stderr,
            error: Some(err.to_string()),
        }
    }
}

/// Why the driver loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEnd {
    Completed,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub end: RunEnd,
    /// In completion order.
    pub reports: Vec<CommandReport>,
    /// Commands still running (or never started) when the run stopped.
    pub unfinished: Vec<Target>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.reports.iter().filter(|r| !r.ok).count()
    }

    pub fn success(&self) -> bool {
        self.end == RunEnd::Completed && self.failures() == 0 && self.unfinished.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            if report.ok {
                writeln!(f, "ok      {}", report.target)?;
                for line in report.stdout.lines() {
                    writeln!(f, "    {line}")?;
                }
            } else {
                let error = report.error.as_deref().unwrap_or("failed");
                writeln!(f, "FAILED  {}: {error}", report.target)?;
            }
        }
        for target in &self.unfinished {
            writeln!(f, "pending {target}")?;
        }

        let total = self.reports.len() + self.unfinished.len();
        let failed = self.failures();
        write!(
            f,
            "{total} commands: {} ok, {failed} failed, {} unfinished",
            self.reports.len() - failed,
            self.unfinished.len()
        )?;
        match self.end {
            RunEnd::Completed => Ok(()),
            RunEnd::TimedOut => f.write_str(" (time limit reached)"),
            RunEnd::Interrupted => f.write_str(" (interrupted)"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn target(command: &str) -> Target {
        Target {
            id: format!("id-{command}"),
            host: "lab-1".to_string(),
            command: command.to_string(),
        }
    }

    fn exited() -> TaskError {
        TaskError::Exited {
            name: "`false` on lab-1".to_string(),
            status: "exit 1".to_string(),
            stderr: "nope".to_string(),
        }
    }

    #[test]
    fn failed_report_keeps_exit_details() {
        let report = CommandReport::failed(target("false"), &exited());
        assert!(!report.ok);
        assert_eq!(report.status.as_deref(), Some("exit 1"));
        assert_eq!(report.stderr, "nope");
        assert!(report.error.unwrap().contains("exit 1"));
    }

    #[test]
    fn text_summary_lists_every_command() {
        let summary = RunSummary {
            end: RunEnd::TimedOut,
            reports: vec![
                CommandReport::succeeded(
                    target("uptime"),
                    CommandOutput {
                        stdout: "up 3 days\n".to_string(),
                        stderr: String::new(),
                        status: Some(0),
                    },
                ),
                CommandReport::failed(target("false"), &exited()),
            ],
            unfinished: vec![target("sleep 600")],
        };
        let text = summary.to_string();
        assert!(text.contains("ok      `uptime` on lab-1\n    up 3 days\n"));
        assert!(text.contains("FAILED  `false` on lab-1"));
        assert!(text.contains("pending `sleep 600` on lab-1"));
        assert!(text.ends_with("3 commands: 1 ok, 1 failed, 1 unfinished (time limit reached)"));
        assert!(!summary.success());
    }

    #[test]
    fn json_summary_flattens_targets() {
        let summary = RunSummary {
            end: RunEnd::Completed,
            reports: vec![CommandReport::succeeded(target("true"), CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            })],
            unfinished: Vec::new(),
        };
        assert!(summary.success());
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["end"], "completed");
        assert_eq!(value["reports"][0]["command"], "true");
        assert_eq!(value["reports"][0]["status"], "exit 0");
        assert!(value["reports"][0].get("error").is_none());
    }
}
