/// Startup orchestration: reap, optional quit-only exit, detach, publish the
/// pid file, wait for shutdown.
use crate::config::LifecycleConfig;
use crate::detach::{self, DetachError};
use crate::pidfile;
use crate::reaper::{self, ProcessControl, ShutdownOutcome, SystemProcesses};
use crate::waiter::{QuitSignal, SignalWaiter, WaitError};
use nix::unistd::{getpid, Pid};
use std::path::{Path, PathBuf};

/// Errors that stop startup. Everything else is logged and absorbed.
#[derive(Debug)]
pub enum SupervisorError {
    /// The executable's own path could not be resolved.
    ExecutablePath { source: std::io::Error },
    /// The executable's directory could not be entered.
    EnterDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The detached copy could not be spawned.
    Detach(DetachError),
    /// The shutdown wait could not be armed.
    Wait(WaitError),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::ExecutablePath { source } => {
                write!(f, "failed to resolve executable path: {}", source)
            }
            SupervisorError::EnterDir { path, source } => {
                write!(f, "failed to enter {}: {}", path.display(), source)
            }
            SupervisorError::Detach(e) => write!(f, "{}", e),
            SupervisorError::Wait(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::ExecutablePath { source } => Some(source),
            SupervisorError::EnterDir { source, .. } => Some(source),
            SupervisorError::Detach(e) => Some(e),
            SupervisorError::Wait(e) => Some(e),
        }
    }
}

impl From<DetachError> for SupervisorError {
    fn from(e: DetachError) -> Self {
        SupervisorError::Detach(e)
    }
}

impl From<WaitError> for SupervisorError {
    fn from(e: WaitError) -> Self {
        SupervisorError::Wait(e)
    }
}

/// What the caller should do after the startup checks.
#[derive(Debug, PartialEq, Eq)]
pub enum Startup {
    /// Quit-only run: the previous instance has been dealt with.
    QuitHandled(ShutdownOutcome),
    /// A detached copy was spawned; this process should exit.
    Detached(Pid),
    /// This process is the instance: configure logging, then [`Supervisor::serve`].
    Continue,
}

/// Change into the directory holding the running executable.
///
/// Keeps relative paths (config, pid file, log file) stable no matter where
/// the program was launched from. Returns the directory entered.
pub fn enter_executable_dir() -> Result<PathBuf, SupervisorError> {
    let exe = std::env::current_exe().map_err(|e| SupervisorError::ExecutablePath { source: e })?;
    let dir = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    std::env::set_current_dir(&dir).map_err(|e| SupervisorError::EnterDir {
        path: dir.clone(),
        source: e,
    })?;
    tracing::debug!(dir = %dir.display(), "entered executable directory");
    Ok(dir)
}

pub struct Supervisor<C: ProcessControl = SystemProcesses> {
    config: LifecycleConfig,
    workdir: PathBuf,
    control: C,
    already_detached: bool,
}

impl Supervisor<SystemProcesses> {
    pub fn new(config: LifecycleConfig, workdir: PathBuf) -> Self {
        Self::with_control(config, workdir, SystemProcesses)
    }
}

impl<C: ProcessControl> Supervisor<C> {
    pub fn with_control(config: LifecycleConfig, workdir: PathBuf, control: C) -> Self {
        Self {
            config,
            workdir,
            control,
            already_detached: detach::is_detached(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Reap any previous instance, then decide whether this process carries on.
    pub async fn startup(&self) -> Result<Startup, SupervisorError> {
        let outcome =
            reaper::reap_previous(&self.config.identity_path, self.config.reap, &self.control)
                .await;
        tracing::info!(%outcome, "previous instance check complete");

        if self.config.quit_requested {
            return Ok(Startup::QuitHandled(outcome));
        }

        if self.config.daemonize && !self.already_detached {
            let pid = detach::detach(
                std::env::args_os().skip(1),
                std::env::vars_os(),
                &self.workdir,
            )?;
            return Ok(Startup::Detached(pid));
        }

        Ok(Startup::Continue)
    }

    /// Publish this process's pid and block until SIGQUIT completes shutdown.
    pub async fn serve(&self) -> Result<(), SupervisorError> {
        let quit = QuitSignal::install()?;
        pidfile::write(&self.config.identity_path, getpid());
        self.waiter().wait_for_quit(quit).await;
        Ok(())
    }

    /// Like [`Supervisor::serve`], with `trigger` standing in for SIGQUIT.
    #[cfg(test)]
    pub async fn serve_until<F>(&self, trigger: F)
    where
        F: std::future::Future<Output = ()>,
    {
        pidfile::write(&self.config.identity_path, getpid());
        self.waiter().wait_for(trigger).await;
    }

    fn waiter(&self) -> SignalWaiter {
        SignalWaiter::new(self.config.identity_path.clone(), self.config.grace_delay)
    }
}
