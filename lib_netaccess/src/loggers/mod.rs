//! # Logging Setup
//!
//! Console + rolling JSON file logging for binaries built on this crate.
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: an ANSI console layer plus a JSON layer
/// writing to `<log_dir>/<app_name>.<date>`, rotated daily.
///
/// `RUST_LOG` wins over `level` when set.
///
/// # Returns
/// The guard of the non-blocking file writer. Keep it alive for the life of
/// the process; buffered lines are flushed when it drops.
///
/// # Errors
/// If the directory cannot be created, the filter is invalid, or a global
/// subscriber is already installed.
pub fn setup_logging(app_name: &str, log_dir: &Path, level: &str) -> io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(guard)
}
