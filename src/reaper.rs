/// Reaping: stop a previously recorded instance before a new one starts.
///
/// Sends SIGQUIT, polls liveness on a fixed budget, and escalates to SIGKILL
/// if the old instance outlives it. The old instance disappearing at any point
/// is the success case.
use crate::pidfile;
use crate::probe;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpid, Pid};
use std::path::Path;
use std::time::Duration;

/// How a reap attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No usable pid was recorded.
    NoPreviousInstance,
    /// The old instance was gone before the poll budget ran out.
    TerminatedGracefully,
    /// The old instance ignored SIGQUIT and was sent SIGKILL.
    TerminatedForcefully,
}

impl std::fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownOutcome::NoPreviousInstance => write!(f, "no previous instance"),
            ShutdownOutcome::TerminatedGracefully => write!(f, "terminated gracefully"),
            ShutdownOutcome::TerminatedForcefully => write!(f, "terminated forcefully"),
        }
    }
}

/// Poll budget for waiting on an old instance after SIGQUIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapPolicy {
    /// Sleep between liveness checks.
    pub poll_interval: Duration,
    /// Liveness checks before escalating to SIGKILL.
    pub max_polls: u32,
}

impl Default for ReapPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 10,
        }
    }
}

/// Signal delivery and liveness checks for other processes.
pub trait ProcessControl {
    /// Deliver `signal` to `pid`.
    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()>;

    /// Whether `pid` can still be confirmed alive.
    fn is_alive(&self, pid: Pid) -> bool;
}

/// The real process table.
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        kill(pid, signal)
    }

    fn is_alive(&self, pid: Pid) -> bool {
        probe::is_alive(pid)
    }
}

/// Stop the instance recorded at `path`, if any.
pub async fn reap_previous<C: ProcessControl>(
    path: &Path,
    policy: ReapPolicy,
    control: &C,
) -> ShutdownOutcome {
    let Some(pid) = pidfile::read(path) else {
        tracing::debug!(path = %path.display(), "no previous instance recorded");
        return ShutdownOutcome::NoPreviousInstance;
    };
    if pid.as_raw() <= 0 {
        tracing::warn!(pid = pid.as_raw(), "ignoring non-positive pid in pid file");
        return ShutdownOutcome::NoPreviousInstance;
    }
    if pid == getpid() {
        // A recycled pid: SIGQUIT would hit this process before its handler exists.
        tracing::warn!(pid = pid.as_raw(), "pid file records this process, ignoring it");
        return ShutdownOutcome::NoPreviousInstance;
    }

    if let Err(e) = control.signal(pid, Signal::SIGQUIT) {
        tracing::info!(pid = pid.as_raw(), error = %e, "previous instance already gone");
        return ShutdownOutcome::TerminatedGracefully;
    }
    tracing::info!(pid = pid.as_raw(), "sent SIGQUIT to previous instance");

    for attempt in 1..=policy.max_polls {
        tokio::time::sleep(policy.poll_interval).await;
        if !control.is_alive(pid) {
            tracing::info!(pid = pid.as_raw(), attempt, "previous instance exited");
            return ShutdownOutcome::TerminatedGracefully;
        }
        tracing::debug!(
            pid = pid.as_raw(),
            attempt,
            max_polls = policy.max_polls,
            "previous instance still alive"
        );
    }

    tracing::warn!(
        pid = pid.as_raw(),
        max_polls = policy.max_polls,
        "previous instance ignored SIGQUIT, sending SIGKILL"
    );
    if let Err(e) = control.signal(pid, Signal::SIGKILL) {
        tracing::warn!(pid = pid.as_raw(), error = %e, "SIGKILL delivery failed");
    }
    pidfile::remove(path);
    ShutdownOutcome::TerminatedForcefully
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use std::io::BufRead;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// A fake process that answers liveness checks from a script.
    struct ScriptedProcess {
        quit_delivers: bool,
        alive_for_polls: u32,
        polls: AtomicU32,
        signals: Mutex<Vec<Signal>>,
    }

    impl ScriptedProcess {
        fn new(quit_delivers: bool, alive_for_polls: u32) -> Self {
            Self {
                quit_delivers,
                alive_for_polls,
                polls: AtomicU32::new(0),
                signals: Mutex::new(Vec::new()),
            }
        }

        fn signals(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }

        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    impl ProcessControl for ScriptedProcess {
        fn signal(&self, _pid: Pid, signal: Signal) -> nix::Result<()> {
            self.signals.lock().unwrap().push(signal);
            if signal == Signal::SIGQUIT && !self.quit_delivers {
                return Err(Errno::ESRCH);
            }
            Ok(())
        }

        fn is_alive(&self, _pid: Pid) -> bool {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            n <= self.alive_for_polls
        }
    }

    fn fast_policy(max_polls: u32) -> ReapPolicy {
        ReapPolicy {
            poll_interval: Duration::from_millis(1),
            max_polls,
        }
    }

    fn pid_file_with(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_policy_is_ten_one_second_polls() {
        let policy = ReapPolicy::default();
        assert_eq!(policy.max_polls, 10);
        assert_eq!(policy.poll_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_pid_file_is_no_previous_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let control = ScriptedProcess::new(true, 0);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::NoPreviousInstance);
        assert!(control.signals().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_pid_file_is_no_previous_instance() {
        let (_dir, path) = pid_file_with("garbage");
        let control = ScriptedProcess::new(true, 0);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::NoPreviousInstance);
        assert!(control.signals().is_empty());
    }

    #[tokio::test]
    async fn test_zero_pid_is_no_previous_instance() {
        let (_dir, path) = pid_file_with("0");
        let control = ScriptedProcess::new(true, 0);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::NoPreviousInstance);
        assert!(control.signals().is_empty());
    }

    #[tokio::test]
    async fn test_own_pid_is_no_previous_instance() {
        let (_dir, path) = pid_file_with(&getpid().to_string());
        let control = ScriptedProcess::new(true, u32::MAX);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::NoPreviousInstance);
        assert!(control.signals().is_empty());
        assert_eq!(control.polls(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_undeliverable_quit_is_graceful_without_polling() {
        let (_dir, path) = pid_file_with("4242");
        let control = ScriptedProcess::new(false, 10);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::TerminatedGracefully);
        assert_eq!(control.signals(), vec![Signal::SIGQUIT]);
        assert_eq!(control.polls(), 0);
    }

    #[tokio::test]
    async fn test_dead_on_first_poll_is_graceful_without_kill() {
        let (_dir, path) = pid_file_with("4242");
        let control = ScriptedProcess::new(true, 0);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::TerminatedGracefully);
        assert_eq!(control.signals(), vec![Signal::SIGQUIT]);
        assert_eq!(control.polls(), 1);
    }

    #[tokio::test]
    async fn test_exit_on_last_poll_is_still_graceful() {
        let (_dir, path) = pid_file_with("4242");
        let control = ScriptedProcess::new(true, 9);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::TerminatedGracefully);
        assert_eq!(control.polls(), 10);
        assert!(!control.signals().contains(&Signal::SIGKILL));
    }

    #[tokio::test]
    async fn test_alive_for_all_polls_escalates_once() {
        let (_dir, path) = pid_file_with("4242");
        let control = ScriptedProcess::new(true, u32::MAX);

        let outcome = reap_previous(&path, fast_policy(10), &control).await;

        assert_eq!(outcome, ShutdownOutcome::TerminatedForcefully);
        assert_eq!(control.polls(), 10);
        assert_eq!(control.signals(), vec![Signal::SIGQUIT, Signal::SIGKILL]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_graceful_outcome_leaves_pid_file_to_its_owner() {
        let (_dir, path) = pid_file_with("4242");
        let control = ScriptedProcess::new(true, 2);

        reap_previous(&path, fast_policy(10), &control).await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_real_process_exits_on_quit() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let waiter = std::thread::spawn(move || child.wait().unwrap());

        let (_dir, path) = pid_file_with(&pid.to_string());
        let policy = ReapPolicy {
            poll_interval: Duration::from_millis(50),
            max_polls: 100,
        };

        let outcome = reap_previous(&path, policy, &SystemProcesses).await;

        assert_eq!(outcome, ShutdownOutcome::TerminatedGracefully);
        let status = waiter.join().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGQUIT as i32));
    }

    #[tokio::test]
    async fn test_real_process_ignoring_quit_is_killed() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' QUIT; echo ready; exec sleep 30"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut ready = String::new();
        std::io::BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut ready)
            .unwrap();
        assert_eq!(ready.trim(), "ready");

        let pid = child.id();
        let waiter = std::thread::spawn(move || child.wait().unwrap());

        let (_dir, path) = pid_file_with(&pid.to_string());
        let policy = ReapPolicy {
            poll_interval: Duration::from_millis(20),
            max_polls: 3,
        };

        let outcome = reap_previous(&path, policy, &SystemProcesses).await;

        assert_eq!(outcome, ShutdownOutcome::TerminatedForcefully);
        assert!(!path.exists());
        let status = waiter.join().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            ShutdownOutcome::NoPreviousInstance.to_string(),
            "no previous instance"
        );
        assert_eq!(
            ShutdownOutcome::TerminatedForcefully.to_string(),
            "terminated forcefully"
        );
    }
}
