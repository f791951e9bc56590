//! Response cache shared by every [`FetchController`](crate::fetch::FetchController).
//!
//! This module provides:
//! - The [`CacheStore`] contract (`has` / `get` / `set`) keyed by resource key
//! - An unbounded in-memory store plus a process-wide default instance
//! - A SQLite-backed store for caches that should survive restarts
//! - [`CacheLayer`], the cache-first lookup used by the fetch controller
//!
//! No store evicts or expires entries. Growth is bounded only by the number
//! of distinct resource keys fetched during the life of the store.

mod layer;
mod memory;
mod storage;
mod traits;

use std::sync::{Arc, OnceLock};

pub use layer::{CacheLayer, CacheResult};
pub use memory::{MemoryCacheStore, NoopCacheStore};
pub use storage::{CacheEntryInfo, SqliteCacheStore};
pub use traits::{CacheStore, DataSource};

static GLOBAL: OnceLock<Arc<MemoryCacheStore>> = OnceLock::new();

/// The process-wide cache used when no store is injected.
pub fn global() -> Arc<MemoryCacheStore> {
  Arc::clone(GLOBAL.get_or_init(|| Arc::new(MemoryCacheStore::new())))
}
