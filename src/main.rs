mod config;
mod detach;
mod logging;
mod pidfile;
mod probe;
mod reaper;
mod status;
mod supervisor;
mod waiter;

use clap::{ArgAction, Parser};
use config::{LifecycleConfig, Overrides};
use std::path::PathBuf;
use std::process::ExitCode;
use supervisor::{Startup, Supervisor, SupervisorError};
use tracing::subscriber::DefaultGuard;

/// Keep a single background instance of this worker running: stop any
/// previous instance, detach from the terminal, record the pid, and shut
/// down cleanly on SIGQUIT.
#[derive(Parser, Debug)]
#[command(name = "pidwarden", version, about)]
pub struct Cli {
    /// Run as a detached background process (default: true, or from config)
    #[arg(
        short = 'd',
        value_name = "BOOL",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    daemonize: Option<bool>,

    /// Pid file path (default: daemon.pid, or from config)
    #[arg(short = 'p', value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Stop the running instance and exit
    #[arg(short = 'q')]
    quit: bool,

    /// Config file path
    #[arg(short, long, default_value = "pidwarden.toml")]
    config: PathBuf,

    /// Log file path (default: daemon.log, or from config)
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Print the recorded instance as JSON and exit
    #[arg(long)]
    status: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            daemonize: self.daemonize,
            quit_requested: self.quit,
            identity_path: self.pid_file.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let console = logging::init_console(cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");

    match run(cli, console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            eprintln!("pidwarden: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, console: DefaultGuard) -> Result<(), SupervisorError> {
    let workdir = supervisor::enter_executable_dir()?;
    let config = LifecycleConfig::resolve(config::load_config(&cli.config), cli.overrides());
    tracing::debug!(?config, "resolved lifecycle config");

    if cli.status {
        let report = status::StatusReport::collect(&config.identity_path);
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize status"),
        }
        return Ok(());
    }

    let supervisor = Supervisor::new(config, workdir);
    match supervisor.startup().await? {
        Startup::QuitHandled(outcome) => {
            println!("quit: {outcome}");
            return Ok(());
        }
        Startup::Detached(pid) => {
            println!("daemonize success pid {pid}");
            return Ok(());
        }
        Startup::Continue => {}
    }

    drop(console);
    logging::init_file(&supervisor.config().log_file, cli.verbose);
    tracing::info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        "pidwarden instance running"
    );

    supervisor.serve().await
}
