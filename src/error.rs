//! Error types shared across the engine.

use thiserror::Error;

/// Failure of a single outbound request.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The transport itself failed (DNS, connect, reset, timeout).
  #[error("network error fetching {url}: {message}")]
  Network { url: String, message: String },

  /// A response arrived but was not ok. Never cached.
  #[error("HTTP {status} from {url}")]
  Http { status: u16, url: String },

  /// Neither the network nor a cached copy could serve the request.
  #[error("offline and {url} is not cached")]
  Offline { url: String },
}

impl FetchError {
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Offline { .. })
  }
}

/// Failure inside one of the SQLite-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize record: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("record {key} does not belong to scope {scope}")]
  ScopeMismatch { scope: String, key: String },

  #[error("failed to create store directory {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
  fn from(_: std::sync::PoisonError<T>) -> Self {
    Self::LockPoisoned
  }
}

/// Failure of a reconciliation step against the remote store.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("not signed in")]
  NotAuthenticated,

  #[error("network unavailable")]
  Offline,

  #[error("remote rejected {kind}: HTTP {status}: {message}")]
  Rejected {
    kind: &'static str,
    status: u16,
    message: String,
  },

  #[error("remote unreachable: {0}")]
  Transport(String),

  #[error("unexpected remote payload for {kind}: {message}")]
  Decode { kind: &'static str, message: String },

  #[error("no {kind} with id {id}")]
  NotFound { kind: &'static str, id: String },

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Failure to start or run a bulk download.
#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("a download is already in progress")]
  AlreadyRunning,

  #[error("nothing selected for download")]
  NothingSelected,
}
