//! File-backed learned-word storage, one JSON file per scheme.
//!
//! Both the sync dispatcher (words pulled from upstream) and engine handles
//! (corrections learned from requests) write here. Writes for one scheme are
//! serialized and go through a temp file + rename so readers never see a
//! partially written file.

use std::{
  collections::BTreeMap,
  io::ErrorKind,
  path::PathBuf,
  sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::scheme::SchemeId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("IO error on {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Learned words for {scheme} are corrupt: {reason}")]
  Corrupt { scheme: String, reason: String },
  #[error("Failed to serialize learned words: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Learned words for one scheme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemeLearnings {
  /// Highest upstream word id already merged
  pub last_offset: u64,
  /// Word -> confidence
  pub words: BTreeMap<String, u32>,
}

/// A word to merge into a scheme's learnings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnedWord {
  pub word: String,
  pub confidence: u32,
}

#[derive(Debug)]
pub struct LearnedWordStore {
  dir: PathBuf,
  /// Per-scheme write locks
  locks: DashMap<SchemeId, Arc<Mutex<()>>>,
}

impl LearnedWordStore {
  pub fn new(dir: PathBuf) -> Self {
    Self {
      dir,
      locks: DashMap::new(),
    }
  }

  pub fn path_for(&self, scheme: &SchemeId) -> PathBuf {
    self.dir.join(format!("{}.json", scheme))
  }

  pub(crate) fn lock_for(&self, scheme: &SchemeId) -> Arc<Mutex<()>> {
    self.locks.entry(scheme.clone()).or_default().clone()
  }

  /// Load a scheme's learnings. A missing file is an empty set of learnings.
  pub fn load(&self, scheme: &SchemeId) -> Result<SchemeLearnings, StoreError> {
    let path = self.path_for(scheme);
    let content = match std::fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SchemeLearnings::default()),
      Err(source) => return Err(StoreError::Io { path, source }),
    };

    serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
      scheme: scheme.to_string(),
      reason: e.to_string(),
    })
  }

  /// Replace a scheme's learnings.
  pub fn save(&self, scheme: &SchemeId, learnings: &SchemeLearnings) -> Result<(), StoreError> {
    let lock = self.lock_for(scheme);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    self.write(scheme, learnings)
  }

  /// Merge words into a scheme's learnings, keeping the higher confidence for
  /// words already known. `offset`, when given, only ever moves forward.
  ///
  /// Returns the number of words that were not known before.
  pub fn merge(
    &self,
    scheme: &SchemeId,
    words: impl IntoIterator<Item = LearnedWord>,
    offset: Option<u64>,
  ) -> Result<usize, StoreError> {
    let lock = self.lock_for(scheme);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

    let mut learnings = self.load(scheme)?;
    let mut added = 0;
    for LearnedWord { word, confidence } in words {
      match learnings.words.get_mut(&word) {
        Some(existing) => *existing = (*existing).max(confidence),
        None => {
          learnings.words.insert(word, confidence);
          added += 1;
        }
      }
    }
    if let Some(offset) = offset {
      learnings.last_offset = learnings.last_offset.max(offset);
    }

    self.write(scheme, &learnings)?;
    trace!(scheme = %scheme, added, last_offset = learnings.last_offset, "Merged learned words");
    Ok(added)
  }

  fn write(&self, scheme: &SchemeId, learnings: &SchemeLearnings) -> Result<(), StoreError> {
    std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
      path: self.dir.clone(),
      source,
    })?;

    let path = self.path_for(scheme);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec(learnings)?;
    std::fs::write(&tmp, json).map_err(|source| StoreError::Io {
      path: tmp.clone(),
      source,
    })?;
    std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
      path: path.clone(),
      source,
    })?;

    debug!(scheme = %scheme, words = learnings.words.len(), "Saved learned words");
    Ok(())
  }
}
