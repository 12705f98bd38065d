/// Shutdown wait: park the running instance until SIGQUIT, then clean up.
///
/// Transitions are one-way: Running -> ShuttingDown (quit received) ->
/// Terminated (grace delay elapsed, pid file removed).
use crate::pidfile;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;

/// Lifecycle states of a waiting instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Errors that can occur while arming the shutdown wait.
#[derive(Debug)]
pub enum WaitError {
    /// The SIGQUIT handler could not be registered.
    InstallHandler { source: std::io::Error },
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::InstallHandler { source } => {
                write!(f, "failed to install SIGQUIT handler: {}", source)
            }
        }
    }
}

impl std::error::Error for WaitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WaitError::InstallHandler { source } => Some(source),
        }
    }
}

/// A registered SIGQUIT listener.
///
/// Register it before publishing the pid file so a quit request sent as soon
/// as the pid is visible is not lost.
pub struct QuitSignal {
    inner: Signal,
}

impl QuitSignal {
    /// Register for SIGQUIT. Must be called inside a tokio runtime.
    pub fn install() -> Result<Self, WaitError> {
        let inner =
            signal(SignalKind::quit()).map_err(|e| WaitError::InstallHandler { source: e })?;
        Ok(Self { inner })
    }

    async fn recv(mut self) {
        if self.inner.recv().await.is_none() {
            // The signal driver is gone, so no quit request can arrive.
            std::future::pending::<()>().await;
        }
    }
}

pub struct SignalWaiter {
    identity_path: PathBuf,
    grace_delay: Duration,
    state: watch::Sender<WaiterState>,
}

impl SignalWaiter {
    pub fn new(identity_path: PathBuf, grace_delay: Duration) -> Self {
        let (state, _) = watch::channel(WaiterState::Running);
        Self {
            identity_path,
            grace_delay,
            state,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> WaiterState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<WaiterState> {
        self.state.subscribe()
    }

    /// Block until SIGQUIT arrives, then run the shutdown sequence.
    pub async fn wait_for_quit(&self, quit: QuitSignal) {
        tracing::info!("waiting for SIGQUIT");
        self.wait_for(quit.recv()).await;
    }

    /// Block until `trigger` completes, then run the shutdown sequence.
    pub async fn wait_for<F>(&self, trigger: F)
    where
        F: Future<Output = ()>,
    {
        trigger.await;

        self.state.send_replace(WaiterState::ShuttingDown);
        tracing::info!(
            grace_ms = self.grace_delay.as_millis() as u64,
            "quit requested, shutting down after grace delay"
        );

        tokio::time::sleep(self.grace_delay).await;

        pidfile::remove(&self.identity_path);
        self.state.send_replace(WaiterState::Terminated);
        tracing::info!("shutdown complete");
    }
}
