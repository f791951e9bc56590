//! In-memory cache stores.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::traits::CacheStore;

/// Unbounded in-memory cache. Entries live as long as the store does.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
  entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CacheStore for MemoryCacheStore {
  fn has(&self, key: &str) -> bool {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(key)
  }

  fn get(&self, key: &str) -> Option<Value> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .cloned()
  }

  fn set(&self, key: &str, value: Value) {
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_string(), value);
  }

  fn insert_if_absent(&self, key: &str, value: Value) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    if entries.contains_key(key) {
      return false;
    }
    entries.insert(key.to_string(), value);
    true
  }
}

/// Store that doesn't cache anything.
/// Every lookup misses and every write is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheStore;

impl CacheStore for NoopCacheStore {
  fn has(&self, _key: &str) -> bool {
    false
  }

  fn get(&self, _key: &str) -> Option<Value> {
    None
  }

  fn set(&self, _key: &str, _value: Value) {}
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_set_then_get() {
    let store = MemoryCacheStore::new();
    assert!(!store.has("/a"));
    assert_eq!(store.get("/a"), None);

    store.set("/a", json!({"id": 1}));
    assert!(store.has("/a"));
    assert_eq!(store.get("/a"), Some(json!({"id": 1})));
  }

  #[test]
  fn test_set_overwrites() {
    let store = MemoryCacheStore::new();
    store.set("/a", json!(1));
    store.set("/a", json!(2));
    assert_eq!(store.get("/a"), Some(json!(2)));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_insert_if_absent_keeps_first_value() {
    let store = MemoryCacheStore::new();
    assert!(store.insert_if_absent("/a", json!("first")));
    assert!(!store.insert_if_absent("/a", json!("second")));
    assert_eq!(store.get("/a"), Some(json!("first")));
  }

  #[test]
  fn test_keys_are_isolated() {
    let store = MemoryCacheStore::new();
    store.set("/k1", json!(1));
    assert!(!store.has("/k2"));
    store.set("/k2", json!(2));
    assert_eq!(store.get("/k1"), Some(json!(1)));
  }

  #[test]
  fn test_null_value_is_a_hit() {
    let store = MemoryCacheStore::new();
    store.set("/null", Value::Null);
    assert!(store.has("/null"));
  }

  #[test]
  fn test_noop_always_misses() {
    let store = NoopCacheStore;
    store.set("/a", json!(1));
    assert!(!store.has("/a"));
    assert!(store.insert_if_absent("/a", json!(1)));
    assert_eq!(store.get("/a"), None);
  }
}
