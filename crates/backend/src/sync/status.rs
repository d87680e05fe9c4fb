use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::SyncOutcome;

/// Last known sync state of one scheme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
  pub last_attempt: Option<DateTime<Utc>>,
  pub last_success: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
  /// Words added locally across all runs
  pub words_learned: u64,
  pub last_offset: u64,
  pub runs: u64,
  pub failures: u64,
  pub running: bool,
}

/// Per-scheme sync status, written by sync units and read by the status surface
#[derive(Debug, Default)]
pub struct StatusBoard {
  schemes: DashMap<String, SyncStatus>,
}

impl StatusBoard {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_start(&self, scheme: &str) {
    let mut status = self.schemes.entry(scheme.to_string()).or_default();
    status.last_attempt = Some(Utc::now());
    status.running = true;
    status.runs += 1;
  }

  pub fn record_success(&self, scheme: &str, outcome: &SyncOutcome) {
    let mut status = self.schemes.entry(scheme.to_string()).or_default();
    status.last_success = Some(Utc::now());
    status.last_error = None;
    status.words_learned += outcome.words_added as u64;
    status.last_offset = outcome.last_offset;
    status.running = false;
  }

  pub fn record_failure(&self, scheme: &str, error: &str) {
    let mut status = self.schemes.entry(scheme.to_string()).or_default();
    status.last_error = Some(error.to_string());
    status.failures += 1;
    status.running = false;
  }

  pub fn get(&self, scheme: &str) -> Option<SyncStatus> {
    self.schemes.get(scheme).map(|s| s.clone())
  }

  /// All schemes that have been attempted at least once, sorted by scheme.
  pub fn snapshot(&self) -> Vec<(String, SyncStatus)> {
    let mut all: Vec<_> = self
      .schemes
      .iter()
      .map(|e| (e.key().clone(), e.value().clone()))
      .collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    all
  }
}
