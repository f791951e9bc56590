//! Tracing subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "FETCHKIT_LOG";

/// Install the global subscriber.
///
/// Logs go to stderr unless a file is configured. The returned guard must be
/// held until exit so buffered file output is flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = build_filter(config)?;

  match &config.file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

      Ok(None)
    }
  }
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
  EnvFilter::try_from_env(LOG_ENV)
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log filter '{}': {}", config.level, e))
}
