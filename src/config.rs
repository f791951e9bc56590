use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub retry: RetrySettings,
  pub http: HttpConfig,
  pub cache: CacheConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  /// Additional attempts after the first failure
  pub retries: u32,
  /// Constant delay between attempts, in milliseconds
  pub retry_delay_ms: u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    let defaults = RetryConfig::default();
    Self {
      retries: defaults.retries,
      retry_delay_ms: u64::try_from(defaults.retry_delay.as_millis()).unwrap_or(u64::MAX),
    }
  }
}

impl From<&RetrySettings> for RetryConfig {
  fn from(settings: &RetrySettings) -> Self {
    RetryConfig::new(settings.retries, Duration::from_millis(settings.retry_delay_ms))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: concat!("fetchkit/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Keep fetched bodies in a SQLite database instead of memory
  pub persist: bool,
  /// Database location (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when FETCHKIT_LOG is unset
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "warn".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fetchkit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fetchkit/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fetchkit.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fetchkit").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not an empty map
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  pub fn retry_config(&self) -> RetryConfig {
    RetryConfig::from(&self.retry)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.retry.retries, 3);
    assert_eq!(config.retry.retry_delay_ms, 1000);
    assert_eq!(config.http.timeout_secs, 30);
    assert!(!config.cache.persist);
    assert_eq!(config.log.level, "warn");
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse("retry:\n  retries: 5\ncache:\n  persist: true\n").unwrap();
    assert_eq!(config.retry.retries, 5);
    assert_eq!(config.retry.retry_delay_ms, 1000);
    assert!(config.cache.persist);
    assert_eq!(config.http.timeout_secs, 30);
  }

  #[test]
  fn test_empty_file_is_default() {
    let config = Config::parse("  \n").unwrap();
    assert_eq!(config.retry.retries, 3);
  }

  #[test]
  fn test_retry_config_conversion() {
    let config = Config::parse("retry:\n  retries: 2\n  retry_delay_ms: 100\n").unwrap();
    assert_eq!(
      config.retry_config(),
      RetryConfig::new(2, Duration::from_millis(100))
    );
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("absent.yaml"))).is_err());
  }

  #[test]
  fn test_load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fetchkit.yaml");
    std::fs::write(&path, "http:\n  timeout_secs: 5\nlog:\n  level: debug\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.http.timeout_secs, 5);
    assert_eq!(config.log.level, "debug");
  }
}
