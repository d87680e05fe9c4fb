//! Transliteration engines.
//!
//! An engine is stateful and expensive to open, and it is bound to exactly one
//! scheme. The [`crate::pool::HandlePool`] opens engines through an
//! [`EngineFactory`] and lends them out one caller at a time.

mod learnings;
pub mod store;

pub use learnings::{LearningsEngine, LearningsEngineFactory, Suggestion};
pub use store::{LearnedWord, LearnedWordStore, SchemeLearnings, StoreError};

use crate::domain::scheme::InvalidScheme;

/// An engine instance bound to one scheme.
pub trait Engine: Send + 'static {
  fn scheme(&self) -> &str;
}

/// Opens engines for a scheme.
pub trait EngineFactory: Send + Sync + 'static {
  type Engine: Engine;

  fn open(&self, scheme: &str) -> Result<Self::Engine, EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error(transparent)]
  InvalidScheme(#[from] InvalidScheme),
  #[error("Invalid word: {0:?}")]
  InvalidWord(String),
  #[error("Engine for {scheme} is corrupt: {reason}")]
  Corrupt { scheme: String, reason: String },
  #[error("Storage error: {0}")]
  Store(#[source] StoreError),
}

impl EngineError {
  /// Whether the engine that produced this error must not be reused.
  pub fn is_fatal(&self) -> bool {
    matches!(self, EngineError::Corrupt { .. })
  }
}

impl From<StoreError> for EngineError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::Corrupt { scheme, reason } => EngineError::Corrupt { scheme, reason },
      other => EngineError::Store(other),
    }
  }
}
