use std::{
  fmt,
  ops::{Deref, DerefMut},
  sync::{Arc, atomic::Ordering},
};

use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace};

use super::SchemeSlots;
use crate::engine::Engine;

/// An engine lent out by the [`super::HandlePool`].
///
/// Dropping the handle returns the engine to the pool's idle set and frees its
/// capacity unit, so early returns and `?` never leak capacity. Call
/// [`PooledHandle::invalidate`] instead when the engine must not be reused.
pub struct PooledHandle<E: Engine> {
  engine: Option<E>,
  slots: Arc<SchemeSlots<E>>,
  // Released after `Drop::drop` has put the engine back, see `Drop` below.
  _permit: OwnedSemaphorePermit,
}

impl<E: Engine> PooledHandle<E> {
  pub(super) fn new(engine: E, slots: Arc<SchemeSlots<E>>, permit: OwnedSemaphorePermit) -> Self {
    Self {
      engine: Some(engine),
      slots,
      _permit: permit,
    }
  }

  pub fn scheme(&self) -> &str {
    self.slots.scheme.as_str()
  }

  /// Return the engine to the pool for reuse.
  pub fn release(self) {
    drop(self);
  }

  /// Discard the engine. The pool opens a fresh one on next demand.
  pub fn invalidate(mut self) {
    if let Some(engine) = self.engine.take() {
      drop(engine);
      self.slots.live.fetch_sub(1, Ordering::AcqRel);
      debug!(scheme = %self.slots.scheme, "Invalidated engine handle");
    }
  }
}

impl<E: Engine> Deref for PooledHandle<E> {
  type Target = E;

  fn deref(&self) -> &E {
    // Only `invalidate` and `drop` take the engine, and both consume the handle.
    self.engine.as_ref().unwrap_or_else(|| unreachable!("engine taken from live handle"))
  }
}

impl<E: Engine> DerefMut for PooledHandle<E> {
  fn deref_mut(&mut self) -> &mut E {
    self.engine.as_mut().unwrap_or_else(|| unreachable!("engine taken from live handle"))
  }
}

impl<E: Engine> Drop for PooledHandle<E> {
  fn drop(&mut self) {
    // The engine must be back in the idle set before the permit is released,
    // otherwise a waiter could open a new engine past the scheme's maximum.
    if let Some(engine) = self.engine.take() {
      if self.slots.is_closed() {
        drop(engine);
        self.slots.live.fetch_sub(1, Ordering::AcqRel);
      } else {
        self.slots.push_idle(engine);
        trace!(scheme = %self.slots.scheme, "Released engine handle");
      }
    }
  }
}

impl<E: Engine> fmt::Debug for PooledHandle<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PooledHandle").field("scheme", &self.slots.scheme).finish()
  }
}
