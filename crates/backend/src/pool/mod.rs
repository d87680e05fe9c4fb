//! Per-scheme bounded pool of engine handles.
//!
//! Every scheme gets its own [`SchemeSlots`]: a counting semaphore with
//! `max_handles_per_scheme` permits, a stack of idle engines, and a count of
//! live engines. There is no lock shared across schemes, so traffic for one
//! language never waits on another.
//!
//! # Policy at capacity
//!
//! [`HandlePool::acquire`] waits until a handle is released or invalidated.
//! The wait can be bounded with [`PoolConfig::acquire_timeout`], after which
//! the caller gets [`PoolError::Exhausted`]. [`HandlePool::try_acquire`] is the
//! fail-fast variant and never waits.
//!
//! # Invariant
//!
//! For every scheme, `in_use + idle <= max` at all times. A permit is held for
//! every lent handle, and an engine is only opened by a permit holder that
//! found the idle set empty. Engines are opened lazily; nothing is allocated
//! up front.

mod handle;


use std::{
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use dashmap::DashMap;
pub use handle::PooledHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::{
  domain::scheme::{InvalidScheme, SchemeId},
  engine::{Engine, EngineError, EngineFactory},
};

pub const DEFAULT_MAX_HANDLES_PER_SCHEME: usize = 10;

/// Handle pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
  /// Maximum number of engines per scheme, lent out or idle (default: 10)
  pub max_handles_per_scheme: usize,
  /// Upper bound on how long `acquire` waits at capacity (default: unbounded)
  pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_handles_per_scheme: DEFAULT_MAX_HANDLES_PER_SCHEME,
      acquire_timeout: None,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  #[error(transparent)]
  InvalidScheme(#[from] InvalidScheme),
  #[error("All {max} handles for {scheme} are in use")]
  Exhausted { scheme: String, max: usize },
  #[error("Handle pool is closed")]
  Closed,
  #[error("Failed to open engine for {scheme}: {source}")]
  Engine {
    scheme: String,
    #[source]
    source: EngineError,
  },
}

/// Point-in-time counters for one scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
  pub max: usize,
  /// Engines currently allocated (lent out + idle)
  pub live: usize,
  pub idle: usize,
  pub in_use: usize,
}

/// Capacity and idle engines for one scheme
pub(crate) struct SchemeSlots<E> {
  scheme: SchemeId,
  max: usize,
  permits: Arc<Semaphore>,
  idle: Mutex<Vec<E>>,
  live: AtomicUsize,
  closed: AtomicBool,
}

impl<E: Engine> SchemeSlots<E> {
  fn new(scheme: SchemeId, max: usize) -> Self {
    Self {
      scheme,
      max,
      permits: Arc::new(Semaphore::new(max)),
      idle: Mutex::new(Vec::new()),
      live: AtomicUsize::new(0),
      closed: AtomicBool::new(false),
    }
  }

  fn pop_idle(&self) -> Option<E> {
    self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
  }

  fn push_idle(&self, engine: E) {
    self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(engine);
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.permits.close();
    let drained: Vec<E> = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
    self.live.fetch_sub(drained.len(), Ordering::AcqRel);
  }

  fn stats(&self) -> PoolStats {
    let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).len();
    let in_use = if self.is_closed() {
      self.live.load(Ordering::Acquire)
    } else {
      self.max - self.permits.available_permits()
    };
    PoolStats {
      max: self.max,
      live: self.live.load(Ordering::Acquire),
      idle,
      in_use,
    }
  }
}

/// Bounded, lazily grown pool of engines per scheme.
///
/// Cheap to clone; clones share the same slots.
pub struct HandlePool<F: EngineFactory> {
  inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: EngineFactory> {
  factory: F,
  config: PoolConfig,
  schemes: DashMap<SchemeId, Arc<SchemeSlots<F::Engine>>>,
  closed: AtomicBool,
}

impl<F: EngineFactory> Clone for HandlePool<F> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<F: EngineFactory> std::fmt::Debug for HandlePool<F> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HandlePool")
      .field("config", &self.inner.config)
      .field("schemes", &self.schemes())
      .field("closed", &self.inner.closed.load(Ordering::Relaxed))
      .finish()
  }
}

impl<F: EngineFactory> HandlePool<F> {
  pub fn new(factory: F, mut config: PoolConfig) -> Self {
    if config.max_handles_per_scheme == 0 {
      warn!("max_handles_per_scheme must be at least 1, using 1");
      config.max_handles_per_scheme = 1;
    }
    info!(
      max_handles_per_scheme = config.max_handles_per_scheme,
      acquire_timeout_ms = config.acquire_timeout.map(|t| t.as_millis() as u64),
      "Handle pool initialized"
    );

    Self {
      inner: Arc::new(PoolInner {
        factory,
        config,
        schemes: DashMap::new(),
        closed: AtomicBool::new(false),
      }),
    }
  }

  pub fn config(&self) -> &PoolConfig {
    &self.inner.config
  }

  /// Borrow an engine for `scheme`, waiting while the scheme is at capacity.
  ///
  /// # Errors
  ///
  /// - [`PoolError::Exhausted`] if `acquire_timeout` elapsed while waiting
  /// - [`PoolError::Closed`] if the pool was closed before or during the wait
  /// - [`PoolError::Engine`] if a new engine could not be opened
  pub async fn acquire(&self, scheme: &str) -> Result<PooledHandle<F::Engine>, PoolError> {
    let slots = self.slots_for(scheme)?;
    let wait = Arc::clone(&slots.permits).acquire_owned();

    let permit = match self.inner.config.acquire_timeout {
      None => wait.await.map_err(|_| PoolError::Closed)?,
      Some(limit) => match tokio::time::timeout(limit, wait).await {
        Ok(permit) => permit.map_err(|_| PoolError::Closed)?,
        Err(_) => {
          debug!(scheme, "Timed out waiting for an engine handle");
          return Err(PoolError::Exhausted {
            scheme: scheme.to_string(),
            max: slots.max,
          });
        }
      },
    };

    if let Some(engine) = slots.pop_idle() {
      return Ok(PooledHandle::new(engine, slots, permit));
    }

    let inner = Arc::clone(&self.inner);
    let open_scheme = slots.scheme.clone();
    let opened = match tokio::task::spawn_blocking(move || inner.factory.open(open_scheme.as_str())).await {
      Ok(opened) => opened,
      Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
      Err(_) => return Err(PoolError::Closed),
    };
    Self::finish_open(slots, permit, opened)
  }

  /// Borrow an engine for `scheme` without waiting.
  ///
  /// A new engine is opened on the calling thread; prefer
  /// [`HandlePool::acquire`] from async code.
  ///
  /// # Errors
  ///
  /// Returns [`PoolError::Exhausted`] immediately when the scheme is at capacity.
  pub fn try_acquire(&self, scheme: &str) -> Result<PooledHandle<F::Engine>, PoolError> {
    let slots = self.slots_for(scheme)?;
    let permit = match Arc::clone(&slots.permits).try_acquire_owned() {
      Ok(permit) => permit,
      Err(TryAcquireError::NoPermits) => {
        return Err(PoolError::Exhausted {
          scheme: scheme.to_string(),
          max: slots.max,
        });
      }
      Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
    };

    self.checkout(slots, permit)
  }

  /// Return a handle to the idle set. Same as dropping it.
  pub fn release(&self, handle: PooledHandle<F::Engine>) {
    handle.release();
  }

  /// Discard a handle whose engine is in an unrecoverable state.
  pub fn invalidate(&self, handle: PooledHandle<F::Engine>) {
    handle.invalidate();
  }

  /// Counters for `scheme`. Schemes never acquired report zero usage.
  pub fn stats(&self, scheme: &str) -> PoolStats {
    match SchemeId::parse(scheme).ok().and_then(|id| self.inner.schemes.get(&id).map(|s| s.stats())) {
      Some(stats) => stats,
      None => PoolStats {
        max: self.inner.config.max_handles_per_scheme,
        ..PoolStats::default()
      },
    }
  }

  /// Schemes that have had at least one acquisition.
  pub fn schemes(&self) -> Vec<String> {
    let mut schemes: Vec<String> = self.inner.schemes.iter().map(|e| e.key().to_string()).collect();
    schemes.sort();
    schemes
  }

  /// Refuse new acquisitions, wake waiters with [`PoolError::Closed`], and drop
  /// idle engines. Lent handles are dropped when their holders let go.
  pub fn close(&self) {
    if self.inner.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    for entry in self.inner.schemes.iter() {
      entry.value().close();
    }
    info!("Handle pool closed");
  }

  fn slots_for(&self, scheme: &str) -> Result<Arc<SchemeSlots<F::Engine>>, PoolError> {
    if self.inner.closed.load(Ordering::Acquire) {
      return Err(PoolError::Closed);
    }
    let id = SchemeId::parse(scheme)?;

    if let Some(slots) = self.inner.schemes.get(&id) {
      return Ok(Arc::clone(slots.value()));
    }

    let max = self.inner.config.max_handles_per_scheme;
    let slots = self
      .inner
      .schemes
      .entry(id.clone())
      .or_insert_with(|| {
        debug!(scheme = %id, max, "Created handle slots");
        Arc::new(SchemeSlots::new(id, max))
      })
      .clone();

    // close() may have finished iterating before this insert
    if self.inner.closed.load(Ordering::Acquire) {
      slots.close();
      return Err(PoolError::Closed);
    }
    Ok(slots)
  }

  fn checkout(
    &self,
    slots: Arc<SchemeSlots<F::Engine>>,
    permit: OwnedSemaphorePermit,
  ) -> Result<PooledHandle<F::Engine>, PoolError> {
    if let Some(engine) = slots.pop_idle() {
      return Ok(PooledHandle::new(engine, slots, permit));
    }

    let opened = self.inner.factory.open(slots.scheme.as_str());
    Self::finish_open(slots, permit, opened)
  }

  fn finish_open(
    slots: Arc<SchemeSlots<F::Engine>>,
    permit: OwnedSemaphorePermit,
    opened: Result<F::Engine, EngineError>,
  ) -> Result<PooledHandle<F::Engine>, PoolError> {
    match opened {
      Ok(engine) => {
        let live = slots.live.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(scheme = %slots.scheme, live, max = slots.max, "Opened new engine");
        Ok(PooledHandle::new(engine, slots, permit))
      }
      Err(source) => {
        warn!(scheme = %slots.scheme, error = %source, "Failed to open engine");
        // permit drops here, freeing the unit this call reserved
        Err(PoolError::Engine {
          scheme: slots.scheme.to_string(),
          source,
        })
      }
    }
  }
}
