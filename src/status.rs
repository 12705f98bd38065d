/// `--status` report: which instance the pid file names, and whether it runs.
use crate::{pidfile, probe};
use serde::Serialize;
use std::path::Path;

/// The JSON payload printed by `pidwarden --status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub pid_file: String,
    pub pid: Option<i32>,
    pub alive: bool,
}

impl StatusReport {
    pub fn collect(pid_path: &Path) -> Self {
        let pid = pidfile::read(pid_path).filter(|pid| pid.as_raw() > 0);
        Self {
            pid_file: pid_path.display().to_string(),
            pid: pid.map(|p| p.as_raw()),
            alive: pid.is_some_and(probe::is_alive),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
