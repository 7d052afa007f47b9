//! Ephemeral response cache: raw responses keyed by canonical request, evicted by
//! insertion order once over capacity.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use crate::db;
use crate::error::StoreError;

/// A raw response as cached.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub request_key: String,
  pub url: String,
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

/// Trait for response cache backends.
pub trait ResponseStorage: Send + Sync {
  /// Look up a cached response by request key.
  fn get(&self, request_key: &str) -> Result<Option<CachedResponse>, StoreError>;

  /// Insert (or replace) a response, then evict the oldest entries beyond `max_entries`.
  /// Returns the number of evicted entries.
  fn insert(&self, response: &CachedResponse, max_entries: usize) -> Result<usize, StoreError>;

  /// Number of cached responses.
  fn len(&self) -> Result<usize, StoreError>;

  /// Oldest-first URLs of cached responses, at most `limit`.
  fn urls(&self, limit: usize) -> Result<Vec<String>, StoreError>;

  /// Drop every cached response.
  fn clear(&self) -> Result<(), StoreError>;
}

/// Canonical cache key for a request: origin, path and query pairs sorted by key,
/// hashed to a fixed-length hex string.
pub fn request_key(url: &Url) -> String {
  let mut pairs: Vec<(String, String)> = url
    .query_pairs()
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();
  pairs.sort();

  let mut input = format!("{}{}", url.origin().ascii_serialization(), url.path());
  for (i, (k, v)) in pairs.iter().enumerate() {
    input.push(if i == 0 { '?' } else { '&' });
    input.push_str(k);
    input.push('=');
    input.push_str(v);
  }

  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl ResponseStorage for NoopStorage {
  fn get(&self, _request_key: &str) -> Result<Option<CachedResponse>, StoreError> {
    Ok(None) // Always miss
  }

  fn insert(&self, _response: &CachedResponse, _max_entries: usize) -> Result<usize, StoreError> {
    Ok(0) // Discard
  }

  fn len(&self) -> Result<usize, StoreError> {
    Ok(0)
  }

  fn urls(&self, _limit: usize) -> Result<Vec<String>, StoreError> {
    Ok(Vec::new())
  }

  fn clear(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// SQLite-based response cache.
pub struct SqliteResponseCache {
  conn: Mutex<Connection>,
}

/// Schema for the response cache. `seq` records insertion order; replacing a key
/// re-inserts it, moving it to the young end.
const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    request_key TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL
);
"#;

impl SqliteResponseCache {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    Self::from_connection(db::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(RESPONSE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl ResponseStorage for SqliteResponseCache {
  fn get(&self, request_key: &str) -> Result<Option<CachedResponse>, StoreError> {
    let conn = self.conn.lock()?;
    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM response_cache WHERE request_key = ?1",
        params![request_key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()?;

    let Some((url, status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    Ok(Some(CachedResponse {
      request_key: request_key.to_string(),
      url,
      status,
      headers: serde_json::from_str(&headers)?,
      body,
      cached_at: DateTime::parse_from_rfc3339(&cached_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }))
  }

  fn insert(&self, response: &CachedResponse, max_entries: usize) -> Result<usize, StoreError> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "INSERT OR REPLACE INTO response_cache (request_key, url, status, headers, body, cached_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        response.request_key,
        response.url,
        response.status,
        serde_json::to_string(&response.headers)?,
        response.body,
        response.cached_at.to_rfc3339(),
      ],
    )?;

    let count: usize = tx.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
    let mut evicted = 0;
    if count > max_entries {
      evicted = tx.execute(
        "DELETE FROM response_cache WHERE seq IN
           (SELECT seq FROM response_cache ORDER BY seq LIMIT ?1)",
        params![count - max_entries],
      )?;
    }

    tx.commit()?;
    Ok(evicted)
  }

  fn len(&self) -> Result<usize, StoreError> {
    let conn = self.conn.lock()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?)
  }

  fn urls(&self, limit: usize) -> Result<Vec<String>, StoreError> {
    let conn = self.conn.lock()?;
    let mut stmt = conn.prepare("SELECT url FROM response_cache ORDER BY seq LIMIT ?1")?;
    let urls = stmt
      .query_map(params![limit], |row| row.get(0))?
      .collect::<Result<_, _>>()?;
    Ok(urls)
  }

  fn clear(&self) -> Result<(), StoreError> {
    let conn = self.conn.lock()?;
    conn.execute("DELETE FROM response_cache", [])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(path: &str) -> CachedResponse {
    let url = Url::parse(&format!("http://localhost{path}")).unwrap();
    CachedResponse {
      request_key: request_key(&url),
      url: url.to_string(),
      status: 200,
      headers: BTreeMap::from([("content-type".into(), "application/json".into())]),
      body: path.as_bytes().to_vec(),
      cached_at: Utc::now(),
    }
  }

  #[test]
  fn request_key_ignores_query_order() {
    let a = Url::parse("http://h/api/passage/John%203?translation=BSB&x=1").unwrap();
    let b = Url::parse("http://h/api/passage/John%203?x=1&translation=BSB").unwrap();
    let c = Url::parse("http://h/api/passage/John%203?translation=WEB&x=1").unwrap();
    assert_eq!(request_key(&a), request_key(&b));
    assert_ne!(request_key(&a), request_key(&c));
  }

  #[test]
  fn insert_and_get() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    let resp = response("/a");
    cache.insert(&resp, 10).unwrap();

    let got = cache.get(&resp.request_key).unwrap().unwrap();
    assert_eq!(got.body, b"/a");
    assert_eq!(got.headers["content-type"], "application/json");
  }

  #[test]
  fn never_exceeds_bound_and_evicts_oldest() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    for i in 0..25 {
      cache.insert(&response(&format!("/r{i}")), 10).unwrap();
      assert!(cache.len().unwrap() <= 10);
    }

    assert!(cache.get(&response("/r0").request_key).unwrap().is_none());
    assert!(cache.get(&response("/r14").request_key).unwrap().is_none());
    assert!(cache.get(&response("/r15").request_key).unwrap().is_some());
    assert!(cache.get(&response("/r24").request_key).unwrap().is_some());
  }

  #[test]
  fn reinsert_moves_entry_to_young_end() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    cache.insert(&response("/a"), 2).unwrap();
    cache.insert(&response("/b"), 2).unwrap();
    cache.insert(&response("/a"), 2).unwrap();
    cache.insert(&response("/c"), 2).unwrap();

    assert!(cache.get(&response("/a").request_key).unwrap().is_some());
    assert!(cache.get(&response("/b").request_key).unwrap().is_none());
  }

  #[test]
  fn clear_empties_cache() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    cache.insert(&response("/a"), 5).unwrap();
    cache.clear().unwrap();
    assert_eq!(cache.len().unwrap(), 0);
    assert!(cache.urls(20).unwrap().is_empty());
  }

  #[test]
  fn noop_storage_always_misses() {
    let storage = NoopStorage;
    let resp = response("/a");
    assert_eq!(storage.insert(&resp, 1).unwrap(), 0);
    assert!(storage.get(&resp.request_key).unwrap().is_none());
  }
}
