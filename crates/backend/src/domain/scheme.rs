//! Scheme identifiers.
//!
//! A scheme id ends up in file names (`learnings/<scheme>.json`) and in
//! upstream URLs, so only short lowercase ASCII identifiers are accepted.

use std::fmt;

use serde::{Deserialize, Serialize};

const MAX_SCHEME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid scheme identifier {0:?}")]
pub struct InvalidScheme(pub String);

/// Identifier of a transliteration scheme (e.g. `ml`, `hi`, `ta`)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemeId(String);

impl SchemeId {
  pub fn parse(raw: &str) -> Result<Self, InvalidScheme> {
    let valid = !raw.is_empty()
      && raw.len() <= MAX_SCHEME_LEN
      && raw
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');

    if valid {
      Ok(Self(raw.to_string()))
    } else {
      Err(InvalidScheme(raw.to_string()))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for SchemeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for SchemeId {
  type Error = InvalidScheme;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<SchemeId> for String {
  fn from(id: SchemeId) -> Self {
    id.0
  }
}

impl AsRef<str> for SchemeId {
  fn as_ref(&self) -> &str {
    &self.0
  }
}
