//! SQLite-backed cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

use super::traits::CacheStore;

/// Summary of one persisted cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
  pub key: String,
  pub cached_at: DateTime<Utc>,
  /// Size of the stored body in bytes
  pub size: usize,
}

/// Cache store that keeps decoded bodies in a SQLite database so they
/// survive restarts.
///
/// The [`CacheStore`] contract is infallible. Database failures are logged
/// and behave as a miss (reads) or a dropped write (writes).
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    key_hash TEXT PRIMARY KEY,
    resource_key TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteCacheStore {
  /// Open (or create) the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private, non-persistent database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fetchkit").join("cache.db"))
  }

  /// List every stored entry, oldest first.
  pub fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
    let conn = self.lock();
    let mut stmt = conn
      .prepare(
        "SELECT resource_key, cached_at, length(body) FROM response_cache
         ORDER BY cached_at, resource_key",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?;

    let mut entries = Vec::new();
    for row in rows {
      let (key, cached_at, size) = row.map_err(|e| eyre!("Failed to read cache entry: {}", e))?;
      entries.push(CacheEntryInfo {
        key,
        cached_at: parse_datetime(&cached_at)?,
        size: usize::try_from(size).unwrap_or_default(),
      });
    }

    Ok(entries)
  }

  /// Remove every entry. Returns how many were removed.
  pub fn clear(&self) -> Result<usize> {
    self
      .lock()
      .execute("DELETE FROM response_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }

  fn lock(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn read_body(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
    conn
      .query_row(
        "SELECT body FROM response_cache WHERE key_hash = ?",
        params![hash_key(key)],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))
  }

  fn write_body(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let body = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize body: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (key_hash, resource_key, body, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![hash_key(key), key, body],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;
    Ok(())
  }

  /// Read and decode the entry for `key`. An unreadable row counts as absent.
  fn read_value(&self, key: &str) -> Option<Value> {
    let body = match Self::read_body(&self.lock(), key) {
      Ok(body) => body?,
      Err(e) => {
        warn!(key, error = %e, "persisted cache read failed");
        return None;
      }
    };

    match serde_json::from_slice(&body) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, error = %e, "persisted cache entry is corrupt");
        None
      }
    }
  }

  /// Store `value` unless a readable entry already exists. Corrupt rows
  /// are overwritten.
  fn write_if_unreadable(&self, key: &str, value: &Value) -> Result<bool> {
    let conn = self.lock();
    if let Some(body) = Self::read_body(&conn, key)? {
      if serde_json::from_slice::<Value>(&body).is_ok() {
        return Ok(false);
      }
      warn!(key, "replacing corrupt persisted cache entry");
    }
    Self::write_body(&conn, key, value)?;
    Ok(true)
  }
}

impl CacheStore for SqliteCacheStore {
  fn has(&self, key: &str) -> bool {
    self.read_value(key).is_some()
  }

  fn get(&self, key: &str) -> Option<Value> {
    self.read_value(key)
  }

  fn set(&self, key: &str, value: Value) {
    if let Err(e) = Self::write_body(&self.lock(), key, &value) {
      warn!(key, error = %e, "persisted cache write failed");
    }
  }

  fn insert_if_absent(&self, key: &str, value: Value) -> bool {
    match self.write_if_unreadable(key, &value) {
      Ok(inserted) => inserted,
      Err(e) => {
        warn!(key, error = %e, "persisted cache write failed");
        false
      }
    }
  }
}

/// SHA256 hash for stable, fixed-length primary keys.
fn hash_key(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheLayer, DataSource};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn write_raw(store: &SqliteCacheStore, key: &str, body: &[u8]) {
    store
      .lock()
      .execute(
        "INSERT OR REPLACE INTO response_cache (key_hash, resource_key, body) VALUES (?, ?, ?)",
        params![hash_key(key), key, body],
      )
      .unwrap();
  }

  #[test]
  fn test_roundtrip_in_memory() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    assert!(!store.has("https://example.test/a"));

    store.set("https://example.test/a", json!({"id": 1, "name": "A"}));
    assert!(store.has("https://example.test/a"));
    assert_eq!(
      store.get("https://example.test/a"),
      Some(json!({"id": 1, "name": "A"}))
    );
    assert!(!store.has("https://example.test/b"));
  }

  #[test]
  fn test_insert_if_absent_is_write_once() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    assert!(store.insert_if_absent("/k", json!(1)));
    assert!(!store.insert_if_absent("/k", json!(2)));
    assert_eq!(store.get("/k"), Some(json!(1)));

    store.set("/k", json!(3));
    assert_eq!(store.get("/k"), Some(json!(3)));
  }

  #[test]
  fn test_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteCacheStore::open(Some(&path)).unwrap();
      store.set("/persisted", json!([1, 2, 3]));
    }

    let store = SqliteCacheStore::open(Some(&path)).unwrap();
    assert_eq!(store.get("/persisted"), Some(json!([1, 2, 3])));
  }

  #[test]
  fn test_entries_and_clear() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.set("/a", json!("x"));
    store.set("/b", json!({"k": true}));

    let entries = store.entries().unwrap();
    let mut keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["/a", "/b"]);
    assert!(entries.iter().all(|e| e.size > 0));

    assert_eq!(store.clear().unwrap(), 2);
    assert!(store.entries().unwrap().is_empty());
    assert!(!store.has("/a"));
  }

  #[test]
  fn test_corrupt_row_is_absent_and_replaced() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    write_raw(&store, "/k", b"{not json");

    assert!(!store.has("/k"));
    assert_eq!(store.get("/k"), None);

    assert!(store.insert_if_absent("/k", json!({"id": 1})));
    assert!(store.has("/k"));
    assert_eq!(store.get("/k"), Some(json!({"id": 1})));
    assert!(!store.insert_if_absent("/k", json!({"id": 2})));
  }

  #[tokio::test]
  async fn test_corrupt_row_is_refetched_once() {
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    write_raw(&store, "/k", b"{not json");
    let layer = CacheLayer::new(store.clone());
    let fetches = AtomicUsize::new(0);

    for _ in 0..2 {
      let result = match layer.cached::<Value>("/k") {
        Some(hit) => hit.unwrap(),
        None => layer
          .fetch_and_store("/k", || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"id": 1}))
          })
          .await
          .unwrap(),
      };
      assert_eq!(result.data, json!({"id": 1}));
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let hit = layer.cached::<Value>("/k").unwrap().unwrap();
    assert_eq!(hit.source, DataSource::Cache);
  }
}
