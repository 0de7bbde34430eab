//! TTL-bounded query cache for one entity type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::storage::{MemoryStorage, NoopStorage, PageStorage};
use super::traits::{CacheEntry, QueryKey};

/// Default time-to-live for cached pages.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Cache of list-query results with a time-to-live.
///
/// Entries older than the TTL are logically absent even while still in storage.
/// Every invalidation bumps an epoch; a response fetched under an older epoch is
/// refused by [`QueryCache::put_if_current`] so it cannot resurrect data that a
/// mutation made stale while the request was in flight.
pub struct QueryCache<T> {
  storage: Box<dyn PageStorage<T>>,
  /// How long before a cached page is considered stale
  ttl: Duration,
  epoch: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> QueryCache<T> {
  /// Create a cache backed by in-memory storage.
  pub fn new(ttl: Duration) -> Self {
    Self::with_storage(Box::new(MemoryStorage::new()), ttl)
  }

  /// Create a cache that never stores anything.
  pub fn disabled() -> Self {
    Self::with_storage(Box::new(NoopStorage), Duration::ZERO)
  }

  pub fn with_storage(storage: Box<dyn PageStorage<T>>, ttl: Duration) -> Self {
    Self {
      storage,
      ttl,
      epoch: AtomicU64::new(0),
    }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Check if an entry is stale at `now`.
  fn is_stale(&self, entry: &CacheEntry<T>, now: Instant) -> bool {
    entry.age(now) >= self.ttl
  }

  /// Get a fresh entry for the query, or `None` on a miss or stale entry.
  pub fn get<K: QueryKey>(&self, key: &K) -> Option<CacheEntry<T>> {
    let entry = self.storage.get(&key.cache_hash())?;
    if self.is_stale(&entry, Instant::now()) {
      debug!(query = %key.description(), "cache entry expired");
      return None;
    }
    Some(entry)
  }

  /// Store a page for the query.
  pub fn put<K: QueryKey>(&self, key: &K, items: Vec<T>, total_count: u64) {
    let now = Instant::now();
    // Stale entries are dead weight once a new page lands
    self
      .storage
      .remove_where(&|entry: &CacheEntry<T>| entry.age(now) >= self.ttl);
    self.storage.put(
      key.cache_hash(),
      CacheEntry {
        key: key.description(),
        items,
        total_count,
        cached_at: now,
      },
    );
  }

  /// Current invalidation epoch. Capture it before issuing a request.
  pub fn epoch(&self) -> u64 {
    self.epoch.load(Ordering::SeqCst)
  }

  /// Store a page only if no invalidation happened since `epoch` was captured.
  ///
  /// Returns whether the page was stored.
  pub fn put_if_current<K: QueryKey>(
    &self,
    epoch: u64,
    key: &K,
    items: Vec<T>,
    total_count: u64,
  ) -> bool {
    if self.epoch() != epoch {
      debug!(query = %key.description(), "not caching response fetched before invalidation");
      return false;
    }
    self.put(key, items, total_count);
    true
  }

  /// Drop every entry.
  pub fn invalidate_all(&self) {
    self.epoch.fetch_add(1, Ordering::SeqCst);
    self.storage.clear();
  }

  /// Number of physically present entries.
  pub fn len(&self) -> usize {
    self.storage.len()
  }

  pub fn is_empty(&self) -> bool {
    self.storage.is_empty()
  }
}
