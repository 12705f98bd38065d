use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Whether `pid` refers to a live process this user may signal.
///
/// Sends signal 0, which performs the existence and permission checks without
/// delivering anything. ESRCH and EPERM both read as "not alive" so a stale or
/// foreign pid never blocks startup.
pub fn is_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}
