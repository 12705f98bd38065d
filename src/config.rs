use crate::reaper::ReapPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from the optional `pidwarden.toml`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct FileConfig {
    pub identity: IdentityConfig,
    pub daemon: DaemonConfig,
    pub reap: ReapConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemonize: bool,
    pub log_file: PathBuf,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReapConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_delay_ms: u64,
}

// --- Default implementations ---

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("daemon.pid"),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemonize: true,
            log_file: PathBuf::from("daemon.log"),
        }
    }
}

impl Default for ReapConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_polls: 10,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 1000,
        }
    }
}

/// Load the config file at `path`, falling back to defaults.
///
/// A missing file is the normal case. A file that exists but does not parse
/// is reported and ignored.
pub fn load_config(path: &Path) -> FileConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                FileConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
        Err(e) => {
            tracing::warn!("failed to read {}: {e}", path.display());
            FileConfig::default()
        }
    }
}

/// Values given on the command line. `None` defers to the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub daemonize: Option<bool>,
    pub quit_requested: bool,
    pub identity_path: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

/// Fully resolved lifecycle settings, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub daemonize: bool,
    pub quit_requested: bool,
    pub identity_path: PathBuf,
    pub log_file: PathBuf,
    pub reap: ReapPolicy,
    pub grace_delay: Duration,
}

impl LifecycleConfig {
    /// Layer command-line overrides on top of the file config.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
        Self {
            daemonize: overrides.daemonize.unwrap_or(file.daemon.daemonize),
            quit_requested: overrides.quit_requested,
            identity_path: overrides.identity_path.unwrap_or(file.identity.path),
            log_file: overrides.log_file.unwrap_or(file.daemon.log_file),
            reap: ReapPolicy {
                poll_interval: Duration::from_millis(file.reap.poll_interval_ms),
                max_polls: file.reap.max_polls,
            },
            grace_delay: Duration::from_millis(file.shutdown.grace_delay_ms),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::resolve(FileConfig::default(), Overrides::default())
    }
}
