use std::path::{Path, PathBuf};

/// Get the varnamd config directory
///
/// Respects the following (in order of precedence):
/// 1. VARNAMD_CONFIG_DIR - explicit config directory override
/// 2. %LOCALAPPDATA%\.varnamd on Windows
/// 3. $HOME/.varnamd everywhere else
pub fn default_config_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("VARNAMD_CONFIG_DIR") {
    return PathBuf::from(dir);
  }

  #[cfg(windows)]
  let base = dirs::data_local_dir();
  #[cfg(not(windows))]
  let base = dirs::home_dir();

  base.unwrap_or_else(|| PathBuf::from(".")).join(".varnamd")
}

/// Get the config file path under the default config directory
pub fn config_file_path() -> PathBuf {
  config_file_in(&default_config_dir())
}

/// `<config-dir>/config.json`
pub fn config_file_in(config_dir: &Path) -> PathBuf {
  config_dir.join("config.json")
}

/// `<config-dir>/logs`
///
/// The directory is not created here; the logging setup owns that decision.
pub fn logs_dir_in(config_dir: &Path) -> PathBuf {
  config_dir.join("logs")
}

/// `<config-dir>/learnings`, one JSON file per scheme
pub fn learnings_dir_in(config_dir: &Path) -> PathBuf {
  config_dir.join("learnings")
}
