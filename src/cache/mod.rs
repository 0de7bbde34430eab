//! Query cache for paginated list results.
//!
//! This module provides the per-entity-type caching mechanism that:
//! - Keys list results by a hash of (page, page size, search, sort column, sort order)
//! - Treats entries older than the TTL as absent
//! - Is invalidated wholesale by every mutation of its entity type

mod key;
mod layer;
mod storage;
mod traits;

pub use key::{PageQuery, SortOrder};
pub use layer::{QueryCache, DEFAULT_TTL};
pub use storage::{MemoryStorage, NoopStorage, PageStorage};
pub use traits::{CacheEntry, CacheSource, QueryKey};
