use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use tracing::debug;

use super::{
  Engine, EngineError, EngineFactory,
  store::{LearnedWord, LearnedWordStore},
};
use crate::domain::scheme::SchemeId;

/// A learned word returned by [`LearningsEngine::suggest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
  pub word: String,
  pub confidence: u32,
}

/// Engine backed by a scheme's learned words.
///
/// Holds the scheme's learnings in memory as of open (or the last
/// [`LearningsEngine::reload`]) plus corrections learned through this handle
/// that have not been flushed yet.
#[derive(Debug)]
pub struct LearningsEngine {
  scheme: SchemeId,
  store: Arc<LearnedWordStore>,
  words: BTreeMap<String, u32>,
  pending: BTreeMap<String, u32>,
}

impl LearningsEngine {
  pub fn open(scheme: SchemeId, store: Arc<LearnedWordStore>) -> Result<Self, EngineError> {
    let learnings = store.load(&scheme)?;
    debug!(scheme = %scheme, words = learnings.words.len(), "Opened learnings engine");
    Ok(Self {
      scheme,
      store,
      words: learnings.words,
      pending: BTreeMap::new(),
    })
  }

  /// Learned words starting with `prefix`, highest confidence first.
  pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
    let mut merged: BTreeMap<&str, u32> = BTreeMap::new();
    let from = (Bound::Included(prefix), Bound::Unbounded);
    let known = self.words.range::<str, _>(from);
    let pending = self.pending.range::<str, _>(from);
    let matching = known
      .take_while(|(word, _)| word.starts_with(prefix))
      .chain(pending.take_while(|(word, _)| word.starts_with(prefix)));

    for (word, confidence) in matching {
      let entry = merged.entry(word.as_str()).or_default();
      *entry = (*entry).max(*confidence);
    }

    let mut suggestions: Vec<Suggestion> = merged
      .into_iter()
      .map(|(word, confidence)| Suggestion {
        word: word.to_string(),
        confidence,
      })
      .collect();
    suggestions.sort_by(|a, b| b.confidence.cmp(&a.confidence).then_with(|| a.word.cmp(&b.word)));
    suggestions.truncate(limit);
    suggestions
  }

  /// Record a correction. Bumps the confidence of a known word.
  pub fn learn(&mut self, word: &str) -> Result<(), EngineError> {
    let word = word.trim();
    if word.is_empty() || word.chars().any(char::is_whitespace) {
      return Err(EngineError::InvalidWord(word.to_string()));
    }

    let known = self.words.get(word).copied().unwrap_or(0);
    let entry = self.pending.entry(word.to_string()).or_insert(known);
    *entry = entry.saturating_add(1);
    Ok(())
  }

  /// Persist pending corrections. Returns how many words were new to the store.
  pub fn flush(&mut self) -> Result<usize, EngineError> {
    if self.pending.is_empty() {
      return Ok(0);
    }

    let pending = std::mem::take(&mut self.pending);
    let words = pending.iter().map(|(word, confidence)| LearnedWord {
      word: word.clone(),
      confidence: *confidence,
    });
    let added = self.store.merge(&self.scheme, words, None)?;
    self.words.extend(pending);
    Ok(added)
  }

  /// Pick up words merged into the store since this engine was opened.
  pub fn reload(&mut self) -> Result<(), EngineError> {
    let learnings = self.store.load(&self.scheme)?;
    self.words = learnings.words;
    Ok(())
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }
}

impl Engine for LearningsEngine {
  fn scheme(&self) -> &str {
    self.scheme.as_str()
  }
}

/// Opens [`LearningsEngine`]s over a shared store.
#[derive(Debug, Clone)]
pub struct LearningsEngineFactory {
  store: Arc<LearnedWordStore>,
}

impl LearningsEngineFactory {
  pub fn new(store: Arc<LearnedWordStore>) -> Self {
    Self { store }
  }
}

impl EngineFactory for LearningsEngineFactory {
  type Engine = LearningsEngine;

  fn open(&self, scheme: &str) -> Result<LearningsEngine, EngineError> {
    let scheme = SchemeId::parse(scheme)?;
    LearningsEngine::open(scheme, Arc::clone(&self.store))
  }
}
