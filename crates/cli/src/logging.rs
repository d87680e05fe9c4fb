//! Logging setup for the daemon

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{
  non_blocking::WorkerGuard,
  rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::EnvFilter;

/// Default filter, overridable with RUST_LOG
fn env_filter() -> EnvFilter {
  EnvFilter::builder()
    .with_default_directive(tracing::Level::INFO.into())
    .from_env_lossy()
}

/// Console logging with colors
pub fn init_console_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_target(true)
    .with_ansi(true)
    .init();
}

/// File logging into `log_dir`, one `YYYY-MM-DD.log` file per day.
///
/// Returns the guard that must be kept alive for the duration of the program.
/// A log directory that cannot be created is fatal.
pub fn init_file_logging(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir).with_context(|| format!("failed to create log directory {:?}", log_dir))?;

  let file_appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_suffix("log")
    .build(log_dir)
    .with_context(|| format!("failed to open log file in {:?}", log_dir))?;

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Ok(guard)
}
