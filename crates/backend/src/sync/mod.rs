//! Learned-word synchronization with the upstream server.
//!
//! The [`SyncDispatcher`] fires a tick every `sync_interval_in_secs` (plus
//! out-of-band ticks from [`SyncDispatcher::run_now`]) and runs one
//! [`SyncUnit`] per enabled scheme. Units for different schemes run in
//! parallel; units for the same scheme never overlap.

mod dispatcher;
mod status;
mod upstream;

#[cfg(test)]
mod __tests__;

pub use dispatcher::{SyncDispatcher, SyncTick, TickReport, TickSource};
pub use status::{StatusBoard, SyncStatus};
pub use upstream::{DownloadPage, UpstreamSync, UpstreamSyncConfig, UpstreamWord};

use crate::{domain::scheme::InvalidScheme, engine::StoreError};

/// Result of one successful sync unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
  /// Words received from upstream
  pub words_received: usize,
  /// Words that were new to the local store
  pub words_added: usize,
  /// Pages fetched
  pub pages: usize,
  /// Upstream offset after this run
  pub last_offset: u64,
}

/// One synchronization of a scheme's learned words against an upstream.
///
/// Implementations must not retry internally; the next tick is the retry.
#[async_trait::async_trait]
pub trait SyncUnit: Send + Sync + 'static {
  async fn sync(&self, scheme: &str, upstream: &str) -> Result<SyncOutcome, SyncError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("Sync dispatcher is already running")]
  AlreadyRunning,
  #[error(transparent)]
  InvalidScheme(#[from] InvalidScheme),
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Upstream returned {status} for {url}")]
  Upstream { status: u16, url: String },
  #[error("Storage error: {0}")]
  Store(#[from] StoreError),
  #[error("Sync task failed: {0}")]
  Task(String),
}
