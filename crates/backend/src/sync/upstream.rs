//! Pull-based sync against a varnamd upstream.
//!
//! Words are downloaded page by page from
//! `GET {upstream}/download/{scheme}/{offset}`, where `offset` is the highest
//! upstream word id already merged locally. Each page is merged into the
//! [`LearnedWordStore`] before the next one is requested, so a failed run
//! keeps the progress it made. Local corrections are not pushed upstream.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::{SyncError, SyncOutcome, SyncUnit};
use crate::{
  domain::scheme::SchemeId,
  engine::{LearnedWord, LearnedWordStore, StoreError},
};

/// One page of `/download/{scheme}/{offset}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DownloadPage {
  pub count: usize,
  pub words: Vec<UpstreamWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamWord {
  pub id: u64,
  pub word: String,
  #[serde(default = "default_confidence")]
  pub confidence: u32,
}

fn default_confidence() -> u32 {
  1
}

#[derive(Debug, Clone)]
pub struct UpstreamSyncConfig {
  /// Timeout for a single page request (default: 30s)
  pub request_timeout: Duration,
  /// Pages fetched per run before yielding to the next tick (default: 100)
  pub max_pages_per_run: usize,
}

impl Default for UpstreamSyncConfig {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(30),
      max_pages_per_run: 100,
    }
  }
}

#[derive(Debug, Clone)]
pub struct UpstreamSync {
  client: reqwest::Client,
  store: Arc<LearnedWordStore>,
  config: UpstreamSyncConfig,
}

impl UpstreamSync {
  pub fn new(store: Arc<LearnedWordStore>, config: UpstreamSyncConfig) -> Result<Self, SyncError> {
    let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
    Ok(Self { client, store, config })
  }

  /// Run a store operation on the blocking pool.
  async fn with_store<T, F>(&self, op: F) -> Result<T, SyncError>
  where
    T: Send + 'static,
    F: FnOnce(&LearnedWordStore) -> Result<T, StoreError> + Send + 'static,
  {
    let store = Arc::clone(&self.store);
    let result = tokio::task::spawn_blocking(move || op(&store))
      .await
      .map_err(|e| SyncError::Task(e.to_string()))?;
    Ok(result?)
  }

  fn download_url(upstream: &str, scheme: &SchemeId, offset: u64) -> String {
    format!("{}/download/{}/{}", upstream.trim_end_matches('/'), scheme, offset)
  }

  async fn fetch_page(&self, url: &str) -> Result<DownloadPage, SyncError> {
    trace!(url, "Fetching upstream page");
    let response = self.client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
      warn!(url, status = %status, "Upstream rejected sync request");
      return Err(SyncError::Upstream {
        status: status.as_u16(),
        url: url.to_string(),
      });
    }

    Ok(response.json::<DownloadPage>().await?)
  }
}

#[async_trait::async_trait]
impl SyncUnit for UpstreamSync {
  async fn sync(&self, scheme: &str, upstream: &str) -> Result<SyncOutcome, SyncError> {
    let scheme = SchemeId::parse(scheme)?;
    let id = scheme.clone();
    let mut offset = self.with_store(move |store| store.load(&id)).await?.last_offset;
    let mut outcome = SyncOutcome {
      last_offset: offset,
      ..SyncOutcome::default()
    };

    for _ in 0..self.config.max_pages_per_run {
      let url = Self::download_url(upstream, &scheme, offset);
      let page = self.fetch_page(&url).await?;
      if page.words.is_empty() {
        break;
      }

      let next_offset = page.words.iter().map(|w| w.id).max().unwrap_or(offset).max(offset);
      outcome.words_received += page.words.len();
      outcome.pages += 1;

      let words: Vec<LearnedWord> = page
        .words
        .into_iter()
        .filter(|w| !w.word.trim().is_empty())
        .map(|w| LearnedWord {
          word: w.word,
          confidence: w.confidence,
        })
        .collect();
      let id = scheme.clone();
      outcome.words_added += self
        .with_store(move |store| store.merge(&id, words, Some(next_offset)))
        .await?;

      if next_offset == offset {
        debug!(scheme = %scheme, offset, "Upstream did not advance the offset, stopping");
        break;
      }
      offset = next_offset;
      outcome.last_offset = offset;
    }

    debug!(
      scheme = %scheme,
      pages = outcome.pages,
      received = outcome.words_received,
      added = outcome.words_added,
      last_offset = outcome.last_offset,
      "Upstream sync finished"
    );
    Ok(outcome)
  }
}
