//! Daemon lifecycle.
//!
//! # Architecture
//!
//! ```text
//! Daemon (Supervisor)
//!   └── DaemonContext (handed to the HTTP layer)
//!         ├── ConfigStore
//!         ├── HandlePool<LearningsEngineFactory>
//!         └── SyncDispatcher
//!               └── UpstreamSync (one unit per enabled scheme per tick)
//! ```
//!
//! # Lifecycle
//!
//! 1. Load config (missing file is created with defaults)
//! 2. Build the handle pool and the sync dispatcher
//! 3. If word sync is enabled, start the dispatcher and run one sync now
//! 4. Wait for ctrl-c, SIGTERM or the caller's `CancellationToken`
//! 5. Graceful shutdown: stop the dispatcher (waits for in-flight units),
//!    close the pool

use std::{
  net::{IpAddr, Ipv4Addr, SocketAddr},
  path::PathBuf,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  dirs,
  domain::config::ConfigStore,
  engine::{LearnedWordStore, LearningsEngineFactory},
  pool::{DEFAULT_MAX_HANDLES_PER_SCHEME, HandlePool, PoolConfig},
  sync::{SyncDispatcher, SyncError, SyncUnit, UpstreamSync, UpstreamSyncConfig},
};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error("Invalid listen host {0:?}")]
  InvalidHost(String),
  #[error(transparent)]
  Sync(#[from] SyncError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Process options, set from command-line flags.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
  pub port: u16,
  /// Listen host; empty means all interfaces
  pub host: String,
  /// Directory of static UI files served by the HTTP layer
  pub ui_dir: Option<PathBuf>,
  pub enable_internal_apis: bool,
  /// Maximum engine handles per scheme
  pub max_handle_count: usize,
  /// Periodically pull learned words from upstream
  pub sync_words: bool,
  pub log_to_file: bool,
}

impl Default for DaemonOptions {
  fn default() -> Self {
    Self {
      port: 8080,
      host: String::new(),
      ui_dir: None,
      enable_internal_apis: false,
      max_handle_count: DEFAULT_MAX_HANDLES_PER_SCHEME,
      sync_words: true,
      log_to_file: false,
    }
  }
}

impl DaemonOptions {
  /// Address the HTTP layer should bind.
  pub fn listen_addr(&self) -> Result<SocketAddr, DaemonError> {
    let ip = match self.host.trim() {
      "" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
      "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
      host => host.parse().map_err(|_| DaemonError::InvalidHost(host.to_string()))?,
    };
    Ok(SocketAddr::new(ip, self.port))
  }
}

/// Daemon runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  pub options: DaemonOptions,
  /// Holds `config.json`, `logs/` and `learnings/`
  pub config_dir: PathBuf,
}

impl RuntimeConfig {
  pub fn new(options: DaemonOptions) -> Self {
    Self {
      options,
      config_dir: dirs::default_config_dir(),
    }
  }

  pub fn config_path(&self) -> PathBuf {
    dirs::config_file_in(&self.config_dir)
  }

  pub fn learnings_dir(&self) -> PathBuf {
    dirs::learnings_dir_in(&self.config_dir)
  }

  pub fn logs_dir(&self) -> PathBuf {
    dirs::logs_dir_in(&self.config_dir)
  }
}

// ============================================================================
// Context
// ============================================================================

/// Everything the request handlers need, passed explicitly instead of living
/// in process-wide globals.
#[derive(Debug)]
pub struct DaemonContext {
  pub options: DaemonOptions,
  pub config: Arc<ConfigStore>,
  pub learnings: Arc<LearnedWordStore>,
  pub pool: HandlePool<LearningsEngineFactory>,
  pub dispatcher: SyncDispatcher,
  pub started_at: DateTime<Utc>,
}

impl DaemonContext {
  pub fn build(runtime: &RuntimeConfig) -> Result<Self, DaemonError> {
    let config = Arc::new(ConfigStore::load_from(runtime.config_path()));
    let learnings = Arc::new(LearnedWordStore::new(runtime.learnings_dir()));

    let pool = HandlePool::new(
      LearningsEngineFactory::new(Arc::clone(&learnings)),
      PoolConfig {
        max_handles_per_scheme: runtime.options.max_handle_count,
        ..PoolConfig::default()
      },
    );

    let upstream = UpstreamSync::new(Arc::clone(&learnings), UpstreamSyncConfig::default())?;
    let dispatcher = SyncDispatcher::new(Arc::clone(&config), Arc::new(upstream) as Arc<dyn SyncUnit>);

    Ok(Self {
      options: runtime.options.clone(),
      config,
      learnings,
      pool,
      dispatcher,
      started_at: Utc::now(),
    })
  }

  pub fn uptime(&self) -> chrono::Duration {
    Utc::now() - self.started_at
  }
}

// ============================================================================
// Daemon
// ============================================================================

/// The varnamd daemon: owns the context and coordinates startup and shutdown.
pub struct Daemon {
  runtime_config: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run until ctrl-c, SIGTERM or `cancel` fires.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
    let options = &self.runtime_config.options;
    let addr = options.listen_addr()?;
    info!("Starting varnamd");
    info!("Config dir: {:?}", self.runtime_config.config_dir);
    info!(
      addr = %addr,
      ui = ?options.ui_dir,
      internal_apis = options.enable_internal_apis,
      max_handles = options.max_handle_count,
      "Listen settings"
    );

    let ctx = Arc::new(DaemonContext::build(&self.runtime_config)?);

    let signal_cancel = cancel.clone();
    let signals = tokio::spawn(async move {
      tokio::select! {
          _ = shutdown_signal() => signal_cancel.cancel(),
          _ = signal_cancel.cancelled() => {}
      }
    });

    let result = serve(Arc::clone(&ctx), cancel.clone()).await;
    cancel.cancel();
    let _ = signals.await;
    result
  }
}

/// Start background work on `ctx`, wait for `cancel`, then shut it down.
pub(crate) async fn serve(ctx: Arc<DaemonContext>, cancel: CancellationToken) -> Result<(), DaemonError> {
  if ctx.options.sync_words {
    ctx.dispatcher.start().await?;
    ctx.dispatcher.run_now();
  } else {
    info!("Word sync is disabled");
  }

  cancel.cancelled().await;

  info!("Shutting down...");
  ctx.dispatcher.stop().await;
  ctx.pool.close();

  info!("Daemon shutdown complete");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      warn!("Failed to listen for ctrl-c: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        warn!("Failed to listen for SIGTERM: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
      _ = ctrl_c => info!("Received ctrl-c"),
      _ = terminate => info!("Received SIGTERM"),
  }
}
