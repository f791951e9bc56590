//! Cache layer that orchestrates cache-first lookups with network fetching.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::traits::{CacheStore, DataSource};
use crate::error::FetchError;

/// Result from a cache operation, including where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: DataSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: DataSource::Network,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: DataSource::Cache,
    }
  }
}

/// Cache layer that sits between a controller and the network.
///
/// A hit short-circuits the network for the lifetime of the store. Only
/// successful responses are written, and a key is written at most once.
pub struct CacheLayer {
  store: Arc<dyn CacheStore>,
}

impl CacheLayer {
  /// Create a new cache layer over the given store.
  pub fn new(store: Arc<dyn CacheStore>) -> Self {
    Self { store }
  }

  /// Look the key up without touching the network.
  ///
  /// A hit whose stored value does not decode as `T` is reported as a
  /// [`FetchError::Decode`] rather than a miss.
  pub fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<Result<CacheResult<T>, FetchError>> {
    if !self.store.has(key) {
      debug!(key, "cache miss");
      return None;
    }
    let Some(value) = self.store.get(key) else {
      debug!(key, "cache entry vanished, treating as miss");
      return None;
    };
    debug!(key, "cache hit");
    Some(
      serde_json::from_value(value)
        .map(CacheResult::from_cache)
        .map_err(FetchError::from),
    )
  }

  /// Run `fetcher`, decode its value as `T` and store it under `key` if the
  /// key is still empty.
  ///
  /// Failures, including values that do not decode, are never cached.
  pub async fn fetch_and_store<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
  ) -> Result<CacheResult<T>, FetchError>
  where
    T: DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, FetchError>>,
  {
    let value = fetcher().await?;
    let data = serde_json::from_value(value.clone())?;
    if self.store.insert_if_absent(key, value) {
      debug!(key, "cache store");
    } else {
      debug!(key, "cache already populated, keeping first value");
    }
    Ok(CacheResult::from_network(data))
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}
