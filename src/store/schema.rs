//! Versioned schema for the structured store.
//!
//! Every category table shares one column layout so scope filters and upserts can be
//! generated per category. Columns a category does not index stay NULL.

use rusqlite::Connection;
use tracing::info;

use crate::db;
use crate::error::StoreError;

use super::records::Category;

/// Current schema version. Bump when appending to [`MIGRATIONS`].
pub const SCHEMA_VERSION: i64 = 2;

/// Migration `n` (1-based) brings a database from version `n - 1` to `n`.
/// Each step is idempotent so a half-applied step can be re-run.
const MIGRATIONS: &[&str] = &[
  r#"
CREATE TABLE IF NOT EXISTS verses (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_verses_by_ref ON verses(translation, book, chapter);

CREATE TABLE IF NOT EXISTS alignments (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alignments_by_ref ON alignments(translation, book, chapter);

CREATE TABLE IF NOT EXISTS lexicon (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS crossrefs (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_crossrefs_by_ref ON crossrefs(book, chapter);

CREATE TABLE IF NOT EXISTS commentary (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_commentary_by_ref ON commentary(book, chapter);

CREATE TABLE IF NOT EXISTS interlinear (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interlinear_by_ref ON interlinear(book, chapter);

-- Completeness registry: a row exists only once every record of the scope is written
CREATE TABLE IF NOT EXISTS scope_meta (
    scope_key TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    coordinates TEXT NOT NULL,
    cached INTEGER NOT NULL,
    cached_at TEXT NOT NULL,
    count INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scope_meta_category ON scope_meta(category);
"#,
  r#"
CREATE TABLE IF NOT EXISTS devotionals (
    id TEXT PRIMARY KEY,
    translation TEXT, book TEXT, chapter INTEGER, verse INTEGER, source TEXT, day TEXT,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_devotionals_by_day ON devotionals(day);

CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#,
];

/// Apply every migration newer than the recorded schema version.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
  let current = db::user_version(conn)?;
  for (index, step) in MIGRATIONS.iter().enumerate() {
    let version = index as i64 + 1;
    if version <= current {
      continue;
    }
    conn.execute_batch(step)?;
    db::set_user_version(conn, version)?;
    info!(version, "structured store schema upgraded");
  }
  Ok(())
}

/// Table holding records of `category`.
pub fn table(category: Category) -> &'static str {
  category.as_str()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn migrations_reach_current_version_and_are_idempotent() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    assert_eq!(db::user_version(&conn).unwrap(), SCHEMA_VERSION);

    // Re-running against an up-to-date database is a no-op.
    migrate(&conn).unwrap();
    assert_eq!(db::user_version(&conn).unwrap(), SCHEMA_VERSION);

    for category in Category::ALL {
      let n: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table(category)), [], |r| r.get(0))
        .unwrap();
      assert_eq!(n, 0);
    }
  }

  #[test]
  fn upgrade_from_version_one_adds_missing_tables() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(MIGRATIONS[0]).unwrap();
    db::set_user_version(&conn, 1).unwrap();

    migrate(&conn).unwrap();
    let exists: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'devotionals'",
        [],
        |r| r.get(0),
      )
      .unwrap();
    assert_eq!(exists, 1);
  }
}
