//! Timer-driven sync scheduler.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Running --stop()--> Stopped
//!                         │
//!                         ├── timer tick every `sync_interval_in_secs`
//!                         └── run_now() tick, out of band
//! ```
//!
//! Every tick reads one config snapshot and spawns a unit per enabled scheme.
//! A scheme whose previous unit is still running is skipped for that tick, so
//! ticks never pile up behind a slow upstream and units for one scheme never
//! overlap. `stop()` prevents new ticks and units and waits for the ones in
//! flight; it never aborts them.

use std::{
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use dashmap::DashMap;
use tokio::{
  sync::{broadcast, mpsc},
  task::JoinHandle,
  time::{MissedTickBehavior, interval},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::{StatusBoard, SyncError, SyncStatus, SyncUnit};
use crate::domain::config::ConfigStore;

/// What fired a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
  Timer,
  Manual,
}

/// One firing of the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTick {
  pub number: u64,
  pub source: TickSource,
  pub upstream: String,
  /// Enabled schemes at the time of the tick
  pub schemes: Vec<String>,
}

/// What a tick did, published after its units were spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
  pub number: u64,
  pub source: TickSource,
  pub dispatched: Vec<String>,
  /// Schemes whose previous unit was still running
  pub skipped: Vec<String>,
}

enum State {
  Stopped,
  Running {
    cancel: CancellationToken,
    trigger: mpsc::Sender<()>,
    timer: JoinHandle<()>,
    units: TaskTracker,
  },
}

struct Shared {
  config: Arc<ConfigStore>,
  unit: Arc<dyn SyncUnit>,
  /// Held by the running unit of each scheme
  scheme_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
  status: StatusBoard,
  ticks: AtomicU64,
  reports: broadcast::Sender<TickReport>,
}

pub struct SyncDispatcher {
  shared: Arc<Shared>,
  state: Mutex<State>,
}

impl SyncDispatcher {
  pub fn new(config: Arc<ConfigStore>, unit: Arc<dyn SyncUnit>) -> Self {
    let (reports, _) = broadcast::channel(64);
    Self {
      shared: Arc::new(Shared {
        config,
        unit,
        scheme_locks: DashMap::new(),
        status: StatusBoard::new(),
        ticks: AtomicU64::new(0),
        reports,
      }),
      state: Mutex::new(State::Stopped),
    }
  }

  /// Start the timer. The first timer tick fires one interval from now; use
  /// [`SyncDispatcher::run_now`] for an immediate one.
  pub async fn start(&self) -> Result<(), SyncError> {
    let period = Duration::from_secs(self.shared.config.snapshot().await.sync_interval_in_secs.max(1));

    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(*state, State::Running { .. }) {
      return Err(SyncError::AlreadyRunning);
    }

    let cancel = CancellationToken::new();
    let units = TaskTracker::new();
    let (trigger, trigger_rx) = mpsc::channel(1);

    let timer = tokio::spawn(run_timer(
      Arc::clone(&self.shared),
      period,
      cancel.clone(),
      trigger_rx,
      units.clone(),
    ));

    *state = State::Running {
      cancel,
      trigger,
      timer,
      units,
    };
    info!(interval_secs = period.as_secs(), "Sync dispatcher started");
    Ok(())
  }

  /// Fire a tick now, out of band. Coalesces with a tick already pending.
  pub fn run_now(&self) {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    match &*state {
      State::Running { trigger, .. } => {
        if trigger.try_send(()).is_err() {
          debug!("Immediate sync already pending");
        }
      }
      State::Stopped => debug!("Ignoring run_now, sync dispatcher is stopped"),
    }
  }

  /// Stop ticking and wait for units in flight to finish.
  pub async fn stop(&self) {
    let previous = {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::replace(&mut *state, State::Stopped)
    };

    let State::Running {
      cancel, timer, units, ..
    } = previous
    else {
      return;
    };

    info!("Stopping sync dispatcher");
    cancel.cancel();
    if let Err(e) = timer.await {
      warn!("Sync timer task failed: {}", e);
    }

    units.close();
    if !units.is_empty() {
      info!(in_flight = units.len(), "Waiting for in-flight sync units");
    }
    units.wait().await;
    info!("Sync dispatcher stopped");
  }

  pub fn is_running(&self) -> bool {
    matches!(
      *self.state.lock().unwrap_or_else(PoisonError::into_inner),
      State::Running { .. }
    )
  }

  /// Reports of every tick from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
    self.shared.reports.subscribe()
  }

  pub fn status(&self) -> Vec<(String, SyncStatus)> {
    self.shared.status.snapshot()
  }

  pub fn scheme_status(&self, scheme: &str) -> Option<SyncStatus> {
    self.shared.status.get(scheme)
  }
}

async fn run_timer(
  shared: Arc<Shared>,
  period: Duration,
  cancel: CancellationToken,
  mut trigger: mpsc::Receiver<()>,
  units: TaskTracker,
) {
  let mut timer = interval(period);
  timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

  // Skip the immediate tick
  timer.tick().await;

  loop {
    let source = tokio::select! {
        biased;

        _ = cancel.cancelled() => break,

        Some(()) = trigger.recv() => TickSource::Manual,

        _ = timer.tick() => TickSource::Timer,
    };

    shared.dispatch(source, &cancel, &units).await;
  }

  debug!("Sync timer stopped");
}

impl Shared {
  fn scheme_lock(&self, scheme: &str) -> Arc<tokio::sync::Mutex<()>> {
    self.scheme_locks.entry(scheme.to_string()).or_default().clone()
  }

  async fn dispatch(self: &Arc<Self>, source: TickSource, cancel: &CancellationToken, units: &TaskTracker) {
    let config = self.config.snapshot().await;
    let tick = SyncTick {
      number: self.ticks.fetch_add(1, Ordering::Relaxed) + 1,
      source,
      upstream: config.upstream.clone(),
      schemes: config.enabled_schemes(),
    };

    debug!(tick = tick.number, source = ?tick.source, schemes = tick.schemes.len(), "Sync tick");

    let mut dispatched = Vec::with_capacity(tick.schemes.len());
    let mut skipped = Vec::new();

    for scheme in &tick.schemes {
      if cancel.is_cancelled() {
        debug!(tick = tick.number, "Dispatcher stopping, not starting more units");
        break;
      }

      let Ok(guard) = self.scheme_lock(scheme).try_lock_owned() else {
        debug!(scheme = %scheme, tick = tick.number, "Previous sync still running, skipping");
        skipped.push(scheme.clone());
        continue;
      };

      let shared = Arc::clone(self);
      let scheme_owned = scheme.clone();
      let upstream = tick.upstream.clone();
      units.spawn(async move {
        let _guard = guard;
        shared.run_unit(&scheme_owned, &upstream).await;
      });
      dispatched.push(scheme.clone());
    }

    // No receivers is fine
    let _ = self.reports.send(TickReport {
      number: tick.number,
      source: tick.source,
      dispatched,
      skipped,
    });
  }

  async fn run_unit(&self, scheme: &str, upstream: &str) {
    self.status.record_start(scheme);
    debug!(scheme, upstream, "Syncing learned words");

    // A panicking unit must still clear the running flag
    let unit = Arc::clone(&self.unit);
    let (scheme_owned, upstream_owned) = (scheme.to_string(), upstream.to_string());
    let result = tokio::spawn(async move { unit.sync(&scheme_owned, &upstream_owned).await })
      .await
      .unwrap_or_else(|e| Err(SyncError::Task(e.to_string())));

    match result {
      Ok(outcome) => {
        if outcome.words_added > 0 {
          info!(scheme, added = outcome.words_added, "Learned words from upstream");
        }
        self.status.record_success(scheme, &outcome);
      }
      Err(e) => {
        warn!(scheme, error = %e, "Sync failed, will retry next tick");
        self.status.record_failure(scheme, &e.to_string());
      }
    }
  }
}

impl std::fmt::Debug for SyncDispatcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncDispatcher")
      .field("running", &self.is_running())
      .field("ticks", &self.shared.ticks.load(Ordering::Relaxed))
      .finish()
  }
}
