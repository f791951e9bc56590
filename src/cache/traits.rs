//! Core traits and types for the caching system.

use serde_json::Value;

/// Key-value store mapping a resource key to its last decoded response body.
///
/// Implementations must be safe to share across tasks; the controllers hold
/// them behind an `Arc` and touch them from spawned futures.
pub trait CacheStore: Send + Sync {
  /// True iff a value was previously stored for `key`.
  fn has(&self, key: &str) -> bool;

  /// The stored value for `key`, if any.
  fn get(&self, key: &str) -> Option<Value>;

  /// Store `value` under `key`, silently replacing any previous value.
  fn set(&self, key: &str, value: Value);

  /// Store `value` only if `key` has no entry yet. Returns true if it was stored.
  ///
  /// The default implementation is a check-then-set; stores that can do it
  /// under a single lock should override it.
  fn insert_if_absent(&self, key: &str, value: Value) -> bool {
    if self.has(key) {
      return false;
    }
    self.set(key, value);
    true
  }
}

/// Indicates where the data currently held by a controller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Fresh data from the network
  Network,
  /// Served from the cache without a request
  Cache,
}
