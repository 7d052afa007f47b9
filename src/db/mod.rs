//! SQLite connection helpers shared by the stores.

use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// File name of the structured store database inside the data directory.
pub const STORE_DB: &str = "store.db";
/// File name of the response cache database inside the data directory.
pub const RESPONSES_DB: &str = "responses.db";
/// File name of the local user-entity scratch database inside the data directory.
pub const USERDATA_DB: &str = "userdata.db";

/// Open or create a database file, creating its parent directory.
pub fn open(path: &Path) -> Result<Connection, StoreError> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
      path: parent.display().to_string(),
      source,
    })?;
  }

  let conn = Connection::open(path)?;
  conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
  Ok(conn)
}

/// Path of a named database inside `data_dir`.
pub fn path_in(data_dir: &Path, file: &str) -> PathBuf {
  data_dir.join(file)
}

/// Read the schema version recorded in the database header.
pub fn user_version(conn: &Connection) -> Result<i64, StoreError> {
  Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Record the schema version in the database header.
pub fn set_user_version(conn: &Connection, version: i64) -> Result<(), StoreError> {
  // PRAGMA does not accept bound parameters.
  conn.execute_batch(&format!("PRAGMA user_version = {version}"))?;
  Ok(())
}
