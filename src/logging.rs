/// Log sink setup.
///
/// Startup messages go to stderr through a thread-scoped subscriber so the
/// launching terminal sees them. Once this process is the running instance,
/// the global subscriber appends to the log file instead.
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose {
        "pidwarden=debug"
    } else {
        "pidwarden=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Log to stderr until the returned guard is dropped.
pub fn init_console(verbose: bool) -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// Send all further logging to `path`, appending.
///
/// Falls back to stderr when the file cannot be opened.
pub fn init_file(path: &Path, verbose: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false);

    let result = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => builder
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .try_init(),
        Err(e) => {
            eprintln!(
                "pidwarden: cannot open log file {}: {e}, logging to stderr",
                path.display()
            );
            builder.with_writer(std::io::stderr).try_init()
        }
    };

    if let Err(e) = result {
        eprintln!("pidwarden: logging already initialized: {e}");
    }
}
