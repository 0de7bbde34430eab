//! Canonical in-memory state of one entity store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::cache::{CacheSource, QueryCache};
use crate::entity::{is_temporary_id, Entity};
use crate::error::RemoteError;
use crate::session::AuthSentinel;
use crate::signal::ChangeSignal;

/// Visible slice of one entity type plus its metadata.
#[derive(Debug, Clone)]
pub struct StoreState<T> {
  /// Current page or result set, not the full remote dataset
  pub items: Vec<T>,
  /// Server-reported total for pagination
  pub total_count: u64,
  pub loading: bool,
  /// User-facing message of the last failure
  pub error: Option<String>,
  /// Time of the last committed mutation
  pub last_mutated_at: Option<DateTime<Utc>>,
  /// Where `items` came from, `None` before the first load
  pub source: Option<CacheSource>,
}

impl<T> Default for StoreState<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      total_count: 0,
      loading: false,
      error: None,
      last_mutated_at: None,
      source: None,
    }
  }
}

impl<T: Entity> StoreState<T> {
  pub fn position(&self, id: &str) -> Option<usize> {
    self.items.iter().position(|item| item.id() == id)
  }

  pub fn get(&self, id: &str) -> Option<&T> {
    self.items.iter().find(|item| item.id() == id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.position(id).is_some()
  }

  /// Show a freshly loaded page.
  ///
  /// Provisional rows of creates still in flight stay on top and count toward
  /// the total until their mutation settles.
  pub(crate) fn replace_page(&mut self, items: Vec<T>, total_count: u64) {
    let mut rows: Vec<T> = self
      .items
      .drain(..)
      .filter(|item| is_temporary_id(item.id()))
      .collect();
    self.total_count = total_count + rows.len() as u64;
    rows.extend(items);
    self.items = rows;
  }
}

/// State shared between a store, its coordinator and its detached remote calls.
pub(crate) struct StoreCore<T> {
  state: Mutex<StoreState<T>>,
  pub(crate) cache: QueryCache<T>,
  pub(crate) signal: ChangeSignal,
  load_generation: AtomicU64,
  sentinel: Option<Arc<dyn AuthSentinel>>,
}

impl<T: Entity> StoreCore<T> {
  pub(crate) fn new(cache: QueryCache<T>, sentinel: Option<Arc<dyn AuthSentinel>>) -> Self {
    Self {
      state: Mutex::new(StoreState::default()),
      cache,
      signal: ChangeSignal::new(T::entity_type()),
      load_generation: AtomicU64::new(0),
      sentinel,
    }
  }

  /// Lock the state. Never held across an await.
  pub(crate) fn state(&self) -> MutexGuard<'_, StoreState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start a new list request, superseding every earlier one.
  pub(crate) fn next_generation(&self) -> u64 {
    self.load_generation.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Generation of the most recent list request or reset.
  pub(crate) fn generation(&self) -> u64 {
    self.load_generation.load(Ordering::SeqCst)
  }

  pub(crate) fn is_latest(&self, generation: u64) -> bool {
    self.load_generation.load(Ordering::SeqCst) == generation
  }

  /// Forward an authorization failure to the session.
  pub(crate) fn escalate(&self, err: &RemoteError) {
    if !err.is_unauthorized() {
      return;
    }
    if let Some(sentinel) = &self.sentinel {
      sentinel.unauthorized(T::entity_type(), err);
    }
  }
}
