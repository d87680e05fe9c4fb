//! varnamd - transliteration daemon with learned-word sync

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::error;
use varnamd::{Daemon, DaemonOptions, RuntimeConfig, pool::DEFAULT_MAX_HANDLES_PER_SCHEME};

mod logging;

use logging::{init_console_logging, init_file_logging};

#[derive(Parser, Debug)]
#[command(name = "varnamd")]
#[command(version, about = "Transliteration daemon with learned-word sync")]
#[command(after_help = "\
FILES:
  $VARNAMD_CONFIG_DIR (default ~/.varnamd)
    config.json     upstream, schemesToSync, syncIntervalInSecs
    learnings/      learned words per scheme
    logs/           daily log files (--log-to-file)")]
struct Cli {
  /// Port to listen on
  #[arg(short, long, default_value_t = 8080)]
  port: u16,

  /// Host to listen on (empty for all interfaces)
  #[arg(long, default_value = "")]
  host: String,

  /// Directory of static UI files
  #[arg(long, value_name = "DIR")]
  ui: Option<PathBuf>,

  /// Enable internal APIs
  #[arg(long)]
  enable_internal_apis: bool,

  /// Maximum engine handles per scheme
  #[arg(long, default_value_t = DEFAULT_MAX_HANDLES_PER_SCHEME)]
  max_handle_count: usize,

  /// Periodically pull learned words from upstream
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  sync_words: bool,

  /// Write logs to <config-dir>/logs instead of the console
  #[arg(long)]
  log_to_file: bool,
}

impl Cli {
  fn into_options(self) -> DaemonOptions {
    DaemonOptions {
      port: self.port,
      host: self.host,
      ui_dir: self.ui,
      enable_internal_apis: self.enable_internal_apis,
      max_handle_count: self.max_handle_count,
      sync_words: self.sync_words,
      log_to_file: self.log_to_file,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let runtime = RuntimeConfig::new(Cli::parse().into_options());

  let _guard = if runtime.options.log_to_file {
    Some(init_file_logging(&runtime.logs_dir())?)
  } else {
    init_console_logging();
    None
  };

  if let Err(e) = Daemon::new(runtime).run(CancellationToken::new()).await {
    error!("Daemon failed: {}", e);
    return Err(e.into());
  }
  Ok(())
}
