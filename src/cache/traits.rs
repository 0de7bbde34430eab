//! Core traits and types for the query cache.

use tokio::time::Instant;

/// A query that can be memoized.
///
/// The hash must be a pure function of the query parameters: identical queries
/// collide and distinct queries never do.
pub trait QueryKey {
  /// Stable, fixed-length key for cache lookups
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;
}

/// A cached list-query result.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  /// Description of the query this entry answers
  pub key: String,
  /// The page of records in server order
  pub items: Vec<T>,
  /// Server-reported total for pagination
  pub total_count: u64,
  /// When the entry was stored
  pub cached_at: Instant,
}

impl<T> CacheEntry<T> {
  /// Age of the entry at `now`.
  pub fn age(&self, now: Instant) -> std::time::Duration {
    now.saturating_duration_since(self.cached_at)
  }
}

/// Indicates where page data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the remote endpoint
  Network,
  /// Data served from a cache entry younger than the TTL
  Cache,
}
