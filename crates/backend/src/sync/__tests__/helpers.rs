//! Test doubles for sync tests: a scripted [`SyncUnit`] and a canned HTTP
//! upstream served from an in-process listener.

use std::{
  collections::{HashMap, HashSet},
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use tempfile::TempDir;
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpListener,
  task::JoinHandle,
};

use crate::{
  domain::config::{Config, ConfigStore},
  sync::{SyncDispatcher, SyncError, SyncOutcome, SyncUnit},
};

/// Sync unit that sleeps for `delay`, records every call, and tracks how many
/// units run at once (overall and per scheme).
#[derive(Debug, Default)]
pub struct FakeUnit {
  delay: Duration,
  failing: HashSet<String>,
  panicking: HashSet<String>,
  calls: Mutex<Vec<(String, String)>>,
  active: Mutex<HashMap<String, usize>>,
  peak_per_scheme: Mutex<HashMap<String, usize>>,
  running: AtomicUsize,
  peak_overall: AtomicUsize,
  completed: AtomicUsize,
}

impl FakeUnit {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn failing_for(mut self, scheme: &str) -> Self {
    self.failing.insert(scheme.to_string());
    self
  }

  pub fn panicking_for(mut self, scheme: &str) -> Self {
    self.panicking.insert(scheme.to_string());
    self
  }

  pub fn calls_for(&self, scheme: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|(s, _)| s == scheme).count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn upstreams(&self) -> Vec<String> {
    self.calls.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
  }

  pub fn peak_for(&self, scheme: &str) -> usize {
    self.peak_per_scheme.lock().unwrap().get(scheme).copied().unwrap_or(0)
  }

  pub fn peak_overall(&self) -> usize {
    self.peak_overall.load(Ordering::SeqCst)
  }

  pub fn completed(&self) -> usize {
    self.completed.load(Ordering::SeqCst)
  }
}

#[async_trait::async_trait]
impl SyncUnit for FakeUnit {
  async fn sync(&self, scheme: &str, upstream: &str) -> Result<SyncOutcome, SyncError> {
    self.calls.lock().unwrap().push((scheme.to_string(), upstream.to_string()));
    if self.panicking.contains(scheme) {
      panic!("unit for {scheme} blew up");
    }
    {
      let mut active = self.active.lock().unwrap();
      let count = active.entry(scheme.to_string()).or_default();
      *count += 1;
      let mut peaks = self.peak_per_scheme.lock().unwrap();
      let peak = peaks.entry(scheme.to_string()).or_default();
      *peak = (*peak).max(*count);
    }
    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak_overall.fetch_max(now, Ordering::SeqCst);

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    self.running.fetch_sub(1, Ordering::SeqCst);
    *self.active.lock().unwrap().get_mut(scheme).unwrap() -= 1;
    self.completed.fetch_add(1, Ordering::SeqCst);

    if self.failing.contains(scheme) {
      return Err(SyncError::Upstream {
        status: 503,
        url: format!("injected failure for {scheme}"),
      });
    }
    Ok(SyncOutcome {
      words_received: 1,
      words_added: 1,
      pages: 1,
      last_offset: 1,
    })
  }
}

/// Config store over a temp dir with the given schemes and interval
pub fn config_store(dir: &TempDir, schemes: &[(&str, bool)], interval_secs: u64) -> Arc<ConfigStore> {
  let mut config = Config {
    sync_interval_in_secs: interval_secs,
    ..Config::default()
  };
  for (scheme, enabled) in schemes {
    config.set_sync_status(scheme, *enabled);
  }
  Arc::new(ConfigStore::new(dir.path().join("config.json"), config))
}

pub fn dispatcher_with(
  dir: &TempDir,
  schemes: &[(&str, bool)],
  interval_secs: u64,
  unit: FakeUnit,
) -> (SyncDispatcher, Arc<FakeUnit>, Arc<ConfigStore>) {
  let store = config_store(dir, schemes, interval_secs);
  let unit = Arc::new(unit);
  let dispatcher = SyncDispatcher::new(Arc::clone(&store), Arc::clone(&unit) as Arc<dyn SyncUnit>);
  (dispatcher, unit, store)
}

type Routes = Arc<dyn Fn(&str) -> (u16, String) + Send + Sync>;

/// Minimal HTTP/1.1 upstream answering every request from `routes`.
pub struct FakeUpstream {
  pub base_url: String,
  requests: Arc<Mutex<Vec<String>>>,
  server: JoinHandle<()>,
}

impl FakeUpstream {
  pub async fn start(routes: impl Fn(&str) -> (u16, String) + Send + Sync + 'static) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let routes: Routes = Arc::new(routes);

    let server = {
      let requests = Arc::clone(&requests);
      tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
          let requests = Arc::clone(&requests);
          let routes = Arc::clone(&routes);
          tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
              match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
              }
            }
            let head = String::from_utf8_lossy(&buf);
            let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
            requests.lock().unwrap().push(path.clone());

            let (status, body) = routes(&path);
            let response = format!(
              "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
              body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
          });
        }
      })
    };

    Self {
      base_url,
      requests,
      server,
    }
  }

  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

impl Drop for FakeUpstream {
  fn drop(&mut self) {
    self.server.abort();
  }
}

/// A learnings directory inside `dir`
pub fn learnings_dir(dir: &TempDir) -> PathBuf {
  dir.path().join("learnings")
}
