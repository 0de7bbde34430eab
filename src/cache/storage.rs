//! Cache storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::traits::CacheEntry;

/// Trait for page cache backends.
///
/// Storage is infallible: a miss is not an error.
pub trait PageStorage<T>: Send + Sync {
  /// Get the entry stored under a query hash, regardless of age.
  fn get(&self, hash: &str) -> Option<CacheEntry<T>>;

  /// Store an entry, replacing any previous one for the same hash.
  fn put(&self, hash: String, entry: CacheEntry<T>);

  /// Drop every entry matching the predicate.
  fn remove_where(&self, predicate: &dyn Fn(&CacheEntry<T>) -> bool);

  /// Drop all entries.
  fn clear(&self);

  /// Number of physically present entries (fresh or stale).
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl<T> PageStorage<T> for NoopStorage {
  fn get(&self, _hash: &str) -> Option<CacheEntry<T>> {
    None // Always miss
  }

  fn put(&self, _hash: String, _entry: CacheEntry<T>) {}

  fn remove_where(&self, _predicate: &dyn Fn(&CacheEntry<T>) -> bool) {}

  fn clear(&self) {}

  fn len(&self) -> usize {
    0
  }
}

/// Hash map storage owned by one entity store.
pub struct MemoryStorage<T> {
  entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for MemoryStorage<T> {
  fn default() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }
}

impl<T> MemoryStorage<T> {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<T: Clone + Send + Sync> PageStorage<T> for MemoryStorage<T> {
  fn get(&self, hash: &str) -> Option<CacheEntry<T>> {
    self.entries().get(hash).cloned()
  }

  fn put(&self, hash: String, entry: CacheEntry<T>) {
    self.entries().insert(hash, entry);
  }

  fn remove_where(&self, predicate: &dyn Fn(&CacheEntry<T>) -> bool) {
    self.entries().retain(|_, entry| !predicate(entry));
  }

  fn clear(&self) {
    self.entries().clear();
  }

  fn len(&self) -> usize {
    self.entries().len()
  }
}
