//! Upstream sync tests against an in-process HTTP server.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use crate::{
    domain::{
      config::{Config, ConfigStore},
      scheme::SchemeId,
    },
    engine::LearnedWordStore,
    sync::{
      SyncDispatcher, SyncError, SyncUnit, UpstreamSync, UpstreamSyncConfig,
      __tests__::helpers::{FakeUpstream, learnings_dir},
    },
  };

  const EMPTY_PAGE: &str = r#"{"count":0,"words":[]}"#;

  fn paged_routes(path: &str) -> (u16, String) {
    match path {
      "/download/ml/0" => (
        200,
        r#"{"count":2,"words":[{"id":1,"word":"മലയാളം","confidence":3},{"id":2,"word":"കേരളം"}]}"#.to_string(),
      ),
      "/download/ml/2" => (200, r#"{"count":1,"words":[{"id":3,"word":"വർണം","confidence":2}]}"#.to_string()),
      _ => (200, EMPTY_PAGE.to_string()),
    }
  }

  fn unit(dir: &TempDir) -> (UpstreamSync, Arc<LearnedWordStore>) {
    let store = Arc::new(LearnedWordStore::new(learnings_dir(dir)));
    let config = UpstreamSyncConfig {
      request_timeout: Duration::from_secs(5),
      ..UpstreamSyncConfig::default()
    };
    (UpstreamSync::new(Arc::clone(&store), config).unwrap(), store)
  }

  #[tokio::test]
  async fn test_pages_until_empty_and_persists_offset() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(paged_routes).await;
    let (sync, store) = unit(&dir);

    let outcome = sync.sync("ml", &upstream.base_url).await.unwrap();
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.words_received, 3);
    assert_eq!(outcome.words_added, 3);
    assert_eq!(outcome.last_offset, 3);
    assert_eq!(
      upstream.requests(),
      vec!["/download/ml/0", "/download/ml/2", "/download/ml/3"]
    );

    let learnings = store.load(&SchemeId::parse("ml").unwrap()).unwrap();
    assert_eq!(learnings.last_offset, 3);
    assert_eq!(learnings.words["മലയാളം"], 3);
    assert_eq!(learnings.words["കേരളം"], 1, "missing confidence defaults to 1");

    // A second run resumes from the stored offset
    let outcome = sync.sync("ml", &upstream.base_url).await.unwrap();
    assert_eq!(outcome.pages, 0);
    assert_eq!(outcome.words_added, 0);
    assert_eq!(upstream.requests().last().map(String::as_str), Some("/download/ml/3"));
    assert_eq!(upstream.requests().len(), 4);
  }

  #[tokio::test]
  async fn test_blocked_store_write_does_not_stall_the_runtime() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(paged_routes).await;
    let (sync, store) = unit(&dir);
    let ml = SchemeId::parse("ml").unwrap();

    // merge waits on this lock on whatever thread it runs on
    let lock = store.lock_for(&ml);
    let held = lock.lock().unwrap();

    let base_url = upstream.base_url.clone();
    let running = tokio::spawn(async move { sync.sync("ml", &base_url).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running.is_finished(), "merge should be waiting on the store lock");
    assert_eq!(upstream.requests(), vec!["/download/ml/0"]);

    drop(held);
    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
      .await
      .expect("sync should finish once the store is free")
      .unwrap()
      .unwrap();
    assert_eq!(outcome.words_added, 3);
    assert_eq!(store.load(&ml).unwrap().last_offset, 3);
  }

  #[tokio::test]
  async fn test_offset_that_does_not_advance_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(|_| (200, r#"{"count":1,"words":[{"id":0,"word":"x"}]}"#.to_string())).await;
    let (sync, _) = unit(&dir);

    let outcome = sync.sync("ml", &upstream.base_url).await.unwrap();
    assert_eq!(outcome.pages, 1);
    assert_eq!(upstream.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_server_error_is_reported() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(|_| (500, "{}".to_string())).await;
    let (sync, store) = unit(&dir);

    let err = sync.sync("ml", &upstream.base_url).await.unwrap_err();
    match err {
      SyncError::Upstream { status, url } => {
        assert_eq!(status, 500);
        assert!(url.ends_with("/download/ml/0"));
      }
      other => panic!("expected upstream error, got {other:?}"),
    }
    assert_eq!(store.load(&SchemeId::parse("ml").unwrap()).unwrap().last_offset, 0);
  }

  #[tokio::test]
  async fn test_progress_survives_a_failed_page() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(|path| match path {
      "/download/ml/0" => (200, r#"{"count":1,"words":[{"id":7,"word":"ഒന്ന്"}]}"#.to_string()),
      _ => (503, String::new()),
    })
    .await;
    let (sync, store) = unit(&dir);

    assert!(sync.sync("ml", &upstream.base_url).await.is_err());
    let learnings = store.load(&SchemeId::parse("ml").unwrap()).unwrap();
    assert_eq!(learnings.last_offset, 7);
    assert!(learnings.words.contains_key("ഒന്ന്"));
  }

  #[tokio::test]
  async fn test_malformed_body_is_a_request_error() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(|_| (200, "not json".to_string())).await;
    let (sync, _) = unit(&dir);

    let err = sync.sync("ml", &upstream.base_url).await.unwrap_err();
    assert!(matches!(err, SyncError::Request(_)), "got {err:?}");
  }

  #[tokio::test]
  async fn test_unreachable_upstream_is_a_request_error() {
    let dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (sync, _) = unit(&dir);

    let err = sync.sync("ml", &format!("http://{addr}")).await.unwrap_err();
    assert!(matches!(err, SyncError::Request(_)), "got {err:?}");
  }

  #[tokio::test]
  async fn test_invalid_scheme_is_rejected_before_any_request() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(paged_routes).await;
    let (sync, _) = unit(&dir);

    let err = sync.sync("../etc", &upstream.base_url).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidScheme(_)));
    assert!(upstream.requests().is_empty());
  }

  #[tokio::test]
  async fn test_trailing_slash_in_upstream_is_ignored() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(|_| (200, EMPTY_PAGE.to_string())).await;
    let (sync, _) = unit(&dir);

    sync.sync("ml", &format!("{}/", upstream.base_url)).await.unwrap();
    assert_eq!(upstream.requests(), vec!["/download/ml/0"]);
  }

  /// Test: dispatcher + upstream sync only ever contacts upstream for enabled schemes.
  #[tokio::test]
  async fn test_dispatcher_syncs_enabled_schemes_against_upstream() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::start(|_| (200, EMPTY_PAGE.to_string())).await;

    let mut config = Config {
      upstream: upstream.base_url.clone(),
      ..Config::default()
    };
    config.set_sync_status("ml", true);
    config.set_sync_status("hi", false);
    let config = Arc::new(ConfigStore::new(dir.path().join("config.json"), config));

    let (sync, _) = unit(&dir);
    let dispatcher = SyncDispatcher::new(config, Arc::new(sync) as Arc<dyn SyncUnit>);
    let mut reports = dispatcher.subscribe();

    dispatcher.start().await.unwrap();
    dispatcher.run_now();
    let report = reports.recv().await.unwrap();
    dispatcher.stop().await;

    assert_eq!(report.dispatched, vec!["ml".to_string()]);
    assert_eq!(upstream.requests(), vec!["/download/ml/0"]);
    let status = dispatcher.scheme_status("ml").unwrap();
    assert!(status.last_success.is_some());
    assert!(dispatcher.scheme_status("hi").is_none());
  }
}
