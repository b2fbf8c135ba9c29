//! Fan commands out across hosts and poll them to completion.
//!
//! Every (host, command) pair becomes a [`CommandTask`] behind an
//! [`AfterTask`] whose handlers record a [`CommandReport`]. The tasks sit in
//! one work group, an [`AnyOrder`] or, for sequential runs, an [`InOrder`].
//! A progress [`Timer`] logs what the group is still waiting for.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use labkit_async::{AfterTask, AnyOrder, CommandTask, Deferred, InOrder, Timer};
use labkit_core::{CommandRunner, CommandString, Host};

use crate::summary::{CommandReport, RunEnd, RunSummary, Target};

type Reports = Rc<RefCell<Vec<CommandReport>>>;

/// What to run, and where.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Empty means the local machine.
    pub hosts: Vec<Host>,
    pub commands: Vec<CommandString>,
    /// One command at a time, in host-major order.
    pub sequential: bool,
    pub time_limit: Option<Duration>,
    pub progress_interval: Duration,
}

/// A run in progress.
pub struct Run {
    work: Deferred,
    progress: Deferred,
    targets: Vec<Target>,
    reports: Reports,
    timed_out: Rc<Cell<bool>>,
    interrupted: Cell<bool>,
}

impl Run {
    /// Prepare every command. Nothing is spawned until the first poll.
    pub fn new(plan: &RunPlan, runner: &dyn CommandRunner) -> anyhow::Result<Self> {
        if plan.commands.is_empty() {
            anyhow::bail!("No commands to run");
        }
        let local = [Host::Local];
        let hosts = if plan.hosts.is_empty() {
            &local[..]
        } else {
            &plan.hosts[..]
        };

        let reports: Reports = Rc::new(RefCell::new(Vec::new()));
        let mut targets = Vec::new();
        let mut members = Vec::new();
        for host in hosts {
            for command in &plan.commands {
                let task = CommandTask::new(runner, host, command)
                    .with_context(|| format!("Failed to prepare `{command}` for {host}"))?;
                let target = Target {
                    id: task.id().to_string(),
                    host: host.to_string(),
                    command: command.to_string(),
                };
                targets.push(target.clone());
                // Under InOrder a task starts when it reaches the head.
                members.push(recorded(task, target, &reports).deferred());
            }
        }

        let work: Deferred = if plan.sequential {
            let group = InOrder::new();
            group.extend(members)?;
            group.into()
        } else {
            let group = AnyOrder::new();
            group.extend(members)?;
            group.into()
        };

        let timed_out = Rc::new(Cell::new(false));
        let work = match plan.time_limit {
            Some(limit) => {
                let flag = Rc::clone(&timed_out);
                work.with_time_limit(limit).on_timeout(move || {
                    flag.set(true);
                    Ok(())
                })
            }
            None => work,
        };

        let watched = work.clone();
        let progress = Timer::new(plan.progress_interval, move || {
            info!(waiting_for = %watched.what_for(), "Still waiting");
            Ok(())
        })
        .label("progress report")
        .start();

        info!(
            commands = targets.len(),
            sequential = plan.sequential,
            time_limit = ?plan.time_limit,
            "Prepared run"
        );
        Ok(Self {
            work,
            progress,
            targets,
            reports,
            timed_out,
            interrupted: Cell::new(false),
        })
    }

    /// One tick: the work group, then the progress timer.
    pub fn poll(&self) -> anyhow::Result<()> {
        self.work.poll()?;
        if self.work.is_done() {
            self.progress.cancel();
        } else {
            self.progress.poll()?;
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.work.is_done()
    }

    pub fn what_for(&self) -> String {
        self.work.what_for()
    }

    /// Stop waiting. Commands already running are left to finish on their own.
    pub fn cancel(&self) {
        self.interrupted.set(true);
        self.work.cancel();
        self.progress.cancel();
    }

    /// Handle to the work group, for callers driving time themselves.
    pub fn work(&self) -> &Deferred {
        &self.work
    }

    pub fn summary(&self) -> RunSummary {
        let reports = self.reports.borrow().clone();
        let unfinished = self
            .targets
            .iter()
            .filter(|t| !reports.iter().any(|r| r.target.id == t.id))
            .cloned()
            .collect();
        let end = if self.interrupted.get() {
            RunEnd::Interrupted
        } else if self.timed_out.get() {
            RunEnd::TimedOut
        } else {
            RunEnd::Completed
        };
        RunSummary {
            end,
            reports,
            unfinished,
        }
    }
}

fn recorded(task: CommandTask, target: Target, reports: &Reports) -> AfterTask<CommandTask> {
    let ok_sink = Rc::clone(reports);
    let err_sink = Rc::clone(reports);
    let ok_target = target.clone();
    AfterTask::new(task)
        .on_success(move |output| {
            info!(host = %ok_target.host, command = %ok_target.command, "Command finished");
            ok_sink
                .borrow_mut()
                .push(CommandReport::succeeded(ok_target, output));
            Ok(())
        })
        .on_error(move |err| {
            warn!(host = %target.host, command = %target.command, error = %err, "Command failed");
            err_sink.borrow_mut().push(CommandReport::failed(target, &err));
            Ok(())
        })
}

/// Poll `run` every `poll_interval` until it is done or `shutdown` resolves.
pub async fn drive<S>(run: &Run, poll_interval: Duration, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                warn!(waiting_for = %run.what_for(), "Interrupted, abandoning outstanding commands");
                run.cancel();
                return Ok(());
            }
            _ = ticker.tick() => {}
        }
        run.poll()?;
        if run.is_done() {
            return Ok(());
        }
    }
}
