//! Daemon configuration.
//!
//! The config lives at `<config-dir>/config.json` and is read once at startup.
//! A missing file is replaced by a freshly persisted default; a malformed file
//! is logged and left alone while the session runs on defaults.

use std::{
  collections::HashMap,
  io::ErrorKind,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, serde_as};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::dirs;

pub const DEFAULT_UPSTREAM: &str = "http://api.varnamproject.com";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to create config directory {path:?}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to write config file {path:?}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to serialize config: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// varnamd configuration
///
/// `null` in the file counts as a blank value, same as a missing field.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
  /// Upstream server holding the shared corrections corpus
  #[serde_as(as = "DefaultOnNull")]
  pub upstream: String,

  /// Scheme identifier -> whether learned words are synced for it.
  /// Absent schemes are not synced.
  #[serde_as(as = "DefaultOnNull<HashMap<_, DefaultOnNull>>")]
  pub schemes_to_sync: HashMap<String, bool>,

  /// Seconds between two sync ticks
  #[serde_as(as = "DefaultOnNull")]
  #[serde(alias = "SyncIntervalInSecs")]
  pub sync_interval_in_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    let mut config = Self {
      upstream: String::new(),
      schemes_to_sync: HashMap::new(),
      sync_interval_in_secs: 0,
    };
    config.set_defaults_for_blank_values();
    config
  }
}

impl Config {
  /// Load the config from the default location.
  pub fn load() -> Self {
    Self::load_from(&dirs::config_file_path())
  }

  /// Load the config from `path`. Never fails.
  ///
  /// - missing file: defaults are persisted to `path` and returned
  /// - unreadable or malformed file: a warning is logged, defaults are returned
  ///   and the file is not touched
  pub fn load_from(path: &Path) -> Self {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        let config = Self::default();
        match config.save_to(path) {
          Ok(()) => info!("Created default config: {:?}", path),
          Err(e) => warn!("Failed to persist default config: {}", e),
        }
        return config;
      }
      Err(e) => {
        warn!("Failed to read {:?}: {}. Using default config instead", path, e);
        return Self::default();
      }
    };

    match serde_json::from_str::<Config>(&content) {
      Ok(mut config) => {
        config.set_defaults_for_blank_values();
        debug!("Loaded config from {:?}", path);
        config
      }
      Err(e) => {
        warn!("{:?} is malformed ({}). Using default config instead", path, e);
        Self::default()
      }
    }
  }

  /// Fill every zero-valued field with its default.
  pub fn set_defaults_for_blank_values(&mut self) {
    if self.upstream.is_empty() {
      self.upstream = DEFAULT_UPSTREAM.to_string();
    }
    if self.sync_interval_in_secs == 0 {
      self.sync_interval_in_secs = DEFAULT_SYNC_INTERVAL_SECS;
    }
  }

  /// Enable or disable sync for a scheme. Not persisted until [`Config::save`].
  pub fn set_sync_status(&mut self, scheme: &str, enabled: bool) {
    self.schemes_to_sync.insert(scheme.to_string(), enabled);
  }

  /// Whether learned words for `scheme` are synced.
  pub fn is_sync_enabled(&self, scheme: &str) -> bool {
    self.schemes_to_sync.get(scheme).copied().unwrap_or(false)
  }

  /// Schemes with sync enabled, sorted for stable dispatch order.
  pub fn enabled_schemes(&self) -> Vec<String> {
    let mut schemes: Vec<String> = self
      .schemes_to_sync
      .iter()
      .filter(|(_, enabled)| **enabled)
      .map(|(scheme, _)| scheme.clone())
      .collect();
    schemes.sort();
    schemes
  }

  /// Persist to the default location.
  pub fn save(&self) -> Result<(), ConfigError> {
    self.save_to(&dirs::config_file_path())
  }

  /// Persist to `path`, creating parent directories as needed.
  pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let json = serde_json::to_string_pretty(self)?;
    std::fs::write(path, json).map_err(|source| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    })
  }
}

/// Process-wide config shared between the HTTP layer and the sync dispatcher.
///
/// Readers take a [`ConfigStore::snapshot`], so a sync tick never observes a
/// half-applied update to the scheme map.
#[derive(Debug)]
pub struct ConfigStore {
  path: PathBuf,
  inner: RwLock<Config>,
}

impl ConfigStore {
  pub fn new(path: PathBuf, config: Config) -> Self {
    Self {
      path,
      inner: RwLock::new(config),
    }
  }

  /// Load from `path` (see [`Config::load_from`]).
  pub fn load_from(path: PathBuf) -> Self {
    let config = Config::load_from(&path);
    Self::new(path, config)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Consistent copy of the current config.
  pub async fn snapshot(&self) -> Config {
    self.inner.read().await.clone()
  }

  pub async fn set_sync_status(&self, scheme: &str, enabled: bool) {
    self.inner.write().await.set_sync_status(scheme, enabled);
    info!(scheme, enabled, "Sync status updated");
  }

  /// Persist the current in-memory config to the store's path.
  pub async fn save(&self) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(&self.snapshot().await)?;

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| ConfigError::CreateDir {
          path: parent.to_path_buf(),
          source,
        })?;
    }

    tokio::fs::write(&self.path, json)
      .await
      .map_err(|source| ConfigError::Write {
        path: self.path.clone(),
        source,
      })?;
    debug!("Saved config to {:?}", self.path);
    Ok(())
  }

  /// Hold the write lock, stalling every reader until the guard drops.
  #[cfg(test)]
  pub(crate) async fn write_guard(&self) -> tokio::sync::RwLockWriteGuard<'_, Config> {
    self.inner.write().await
  }
}
