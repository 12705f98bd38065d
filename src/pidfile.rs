/// Identity file: the pid of the running instance, stored as decimal text.
///
/// Every operation here is best-effort. A missing, unreadable or corrupt file
/// reads as "no instance known", and write failures are logged rather than
/// returned, since losing the pid file only costs external controllability.
use nix::unistd::Pid;
use std::path::Path;

/// Create or truncate `path` and write `pid` as decimal text.
pub fn write(path: &Path, pid: Pid) {
    match std::fs::write(path, pid.as_raw().to_string()) {
        Ok(()) => tracing::info!(pid = pid.as_raw(), path = %path.display(), "pid file written"),
        Err(e) => tracing::warn!(
            error = %e,
            path = %path.display(),
            "failed to write pid file, continuing without it"
        ),
    }
}

/// Read the pid recorded at `path`.
///
/// Returns `None` when the file is absent, unreadable, or does not start with
/// decimal digits.
pub fn read(path: &Path) -> Option<Pid> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read pid file");
            return None;
        }
    };

    let pid = parse_leading_pid(&contents);
    if pid.is_none() {
        tracing::warn!(path = %path.display(), "pid file does not contain a pid, ignoring");
    }
    pid
}

/// Remove the pid file, ignoring failure.
pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(error = %e, path = %path.display(), "pid file not removed");
    }
}

fn parse_leading_pid(text: &str) -> Option<Pid> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<i32>().ok().map(Pid::from_raw)
}
