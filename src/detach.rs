/// Detachment by re-exec: launch a fresh copy of this executable in the
/// background and let the caller exit.
use nix::unistd::{getppid, Pid};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Environment variable set in the re-executed child.
pub const DETACHED_ENV: &str = "PIDWARDEN_DETACHED";

/// Errors that can occur while detaching.
#[derive(Debug)]
pub enum DetachError {
    /// The running executable could not be located.
    CurrentExe { source: std::io::Error },
    /// The child process could not be started.
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for DetachError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetachError::CurrentExe { source } => {
                write!(f, "failed to locate the running executable: {}", source)
            }
            DetachError::Spawn { program, source } => {
                write!(
                    f,
                    "failed to spawn detached {}: {}",
                    program.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for DetachError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetachError::CurrentExe { source } => Some(source),
            DetachError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Whether this process is already the detached instance.
///
/// True when reparented to init, or when started by [`detach`]. The marker
/// variable covers hosts where orphans are adopted by a subreaper instead of
/// pid 1.
pub fn is_detached() -> bool {
    getppid() == Pid::from_raw(1) || std::env::var_os(DETACHED_ENV).is_some()
}

/// Re-execute the current program with `args` and `envs`, rooted at `cwd`.
///
/// Standard streams are inherited. The child gets its own process group so
/// terminal job-control signals aimed at the parent do not reach it. Returns
/// the child's pid without waiting on it.
pub fn detach<I, E, K, V>(args: I, envs: E, cwd: &Path) -> Result<Pid, DetachError>
where
    I: IntoIterator<Item = OsString>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<std::ffi::OsStr>,
    V: AsRef<std::ffi::OsStr>,
{
    let program = std::env::current_exe().map_err(|e| DetachError::CurrentExe { source: e })?;
    spawn_detached(&program, args, envs, cwd)
}

fn spawn_detached<I, E, K, V>(
    program: &Path,
    args: I,
    envs: E,
    cwd: &Path,
) -> Result<Pid, DetachError>
where
    I: IntoIterator<Item = OsString>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<std::ffi::OsStr>,
    V: AsRef<std::ffi::OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .env_clear()
        .envs(envs)
        .env(DETACHED_ENV, "1")
        .current_dir(cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0) // Own process group, away from the terminal's
        .spawn()
        .map_err(|e| DetachError::Spawn {
            program: program.to_path_buf(),
            source: e,
        })?;

    let pid = Pid::from_raw(child.id() as i32);
    tracing::info!(
        pid = pid.as_raw(),
        program = %program.display(),
        cwd = %cwd.display(),
        "spawned detached instance"
    );
    Ok(pid)
}
