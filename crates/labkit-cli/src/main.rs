//! labkit CLI
//!
//! Runs shell commands on the local machine or on lab hosts over ssh, waits
//! for all of them while reporting progress, and prints what each produced.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use labkit_cli::{Run, RunPlan, drive};
use labkit_core::config::{Config, DriverConfig, load_config};
use labkit_core::tracing_init::{default_filter, init_tracing};
use labkit_core::{CommandString, Host, SshRunner};

#[derive(Parser, Debug)]
#[command(name = "labkit")]
#[command(version, about = "Run commands across lab machines and wait for them")]
struct Cli {
    /// Directory whose `.labkit/settings.json` is merged into the configuration
    /// (defaults to the current directory).
    #[arg(long, global = true, env = "LABKIT_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "LABKIT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run commands on one or more hosts and wait for all of them
    Run(RunArgs),
    /// Print the resolved configuration as JSON
    Config,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Host to run on; repeat for several. Defaults to this machine.
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    hosts: Vec<Host>,

    /// Shell command line to run; repeat for several
    #[arg(short = 'c', long = "command", value_name = "SCRIPT")]
    scripts: Vec<String>,

    /// Run one command at a time instead of all at once
    #[arg(long)]
    sequential: bool,

    /// Give up waiting after this many seconds
    #[arg(long, value_name = "SECS")]
    time_limit: Option<u64>,

    /// Milliseconds between poll ticks
    #[arg(long, value_name = "MS")]
    poll_interval: Option<u64>,

    /// Seconds between progress reports
    #[arg(long, value_name = "SECS")]
    progress_interval: Option<u64>,

    /// Print the summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Program and arguments to run, after `--`
    #[arg(last = true, value_name = "CMD")]
    argv: Vec<String>,
}

impl RunArgs {
    fn apply(&self, driver: &mut DriverConfig) {
        if let Some(ms) = self.poll_interval {
            driver.poll_interval_ms = ms;
        }
        if let Some(secs) = self.progress_interval {
            driver.progress_interval_secs = secs;
        }
        if self.time_limit.is_some() {
            driver.time_limit_secs = self.time_limit;
        }
    }

    fn commands(&self) -> Vec<CommandString> {
        let mut commands: Vec<CommandString> =
            self.scripts.iter().map(CommandString::shell).collect();
        if let Some((program, args)) = self.argv.split_first() {
            commands.push(CommandString::new(program).args(args));
        }
        commands
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let mut config = load_config(Some(&project_dir))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.log_json;
    init_tracing(&default_filter(&config.logging.level), config.logging.json)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting labkit");

    match cli.command {
        Commands::Config => {
            print_stdout(&serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => run(&args, config).await,
    }
}

async fn run(args: &RunArgs, mut config: Config) -> anyhow::Result<ExitCode> {
    args.apply(&mut config.driver);
    let plan = RunPlan {
        hosts: args.hosts.clone(),
        commands: args.commands(),
        sequential: args.sequential,
        time_limit: config.driver.time_limit(),
        progress_interval: config.driver.progress_interval(),
    };
    let runner = SshRunner::new(&config.remote);
    let run = Run::new(&plan, &runner)?;

    drive(&run, config.driver.poll_interval(), shutdown_signal()).await?;

    let summary = run.summary();
    if args.json {
        print_stdout(&serde_json::to_string_pretty(&summary)?);
    } else {
        print_stdout(&summary.to_string());
    }
    info!(
        end = ?summary.end,
        failures = summary.failures(),
        unfinished = summary.unfinished.len(),
        "Run finished"
    );
    Ok(if summary.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(signal) => signal.recv().await,
            None => std::future::pending::<Option<()>>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            }
        }
        _ = sigterm_future => {
            info!("Received SIGTERM");
        }
    }
}

#[allow(clippy::print_stdout)]
fn print_stdout(text: &str) {
    println!("{text}");
}
