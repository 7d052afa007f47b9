//! Durable structured store for offline content.
//!
//! Records are grouped into scopes (e.g. one chapter of one translation). A scope is
//! offline-available exactly when its row exists in the completeness registry
//! (`scope_meta`); records and registry row are written in one transaction.

mod records;
mod schema;
mod stats;

pub use records::{
  AlignmentRecord, Category, Coordinates, CommentaryRecord, CrossRefRecord, DevotionalRecord,
  InterlinearWordRecord, LexiconEntry, StoreRecord, VerseRange, VerseRecord,
};
pub use schema::SCHEMA_VERSION;
pub use stats::{AlignmentStats, ChapterStats, LexiconStats, StoreStats, TranslationStats};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db;
use crate::error::StoreError;

/// Completeness registry entry for one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeMeta {
  pub scope_key: String,
  pub category: Category,
  pub coordinates: Coordinates,
  pub cached: bool,
  pub cached_at: DateTime<Utc>,
  pub count: usize,
}

/// SQLite-backed structured store.
pub struct StructuredStore {
  conn: Mutex<Connection>,
}

impl StructuredStore {
  /// Open or create the store at `path`, applying pending schema migrations.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    Self::from_connection(db::open(path)?)
  }

  /// Store backed by a private in-memory database.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    schema::migrate(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Replace the records of a scope and mark it complete.
  ///
  /// Rows previously saved under the same scope but missing from `records` are removed,
  /// so a re-save never yields the union of old and new sets.
  pub fn save_scope(
    &self,
    coordinates: &Coordinates,
    records: &[StoreRecord],
  ) -> Result<ScopeMeta, StoreError> {
    if let Some(stray) = records.iter().find(|r| !coordinates.contains(r)) {
      return Err(StoreError::ScopeMismatch {
        scope: coordinates.scope_key(),
        key: stray.key(),
      });
    }

    let category = coordinates.category();
    let table = schema::table(category);
    let (filter, filter_params) = scope_filter(coordinates);
    let meta = ScopeMeta {
      scope_key: coordinates.scope_key(),
      category,
      coordinates: coordinates.clone(),
      cached: true,
      cached_at: Utc::now(),
      count: records.len(),
    };

    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;

    let removed = tx.execute(
      &format!("DELETE FROM {table} WHERE {filter}"),
      params_from_iter(filter_params.iter()),
    )?;

    {
      let mut stmt = tx.prepare(&format!(
        "INSERT OR REPLACE INTO {table} (id, translation, book, chapter, verse, source, day, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
      ))?;
      for record in records {
        let cols = record.index_columns();
        stmt.execute(params![
          record.key(),
          cols.translation,
          cols.book,
          cols.chapter,
          cols.verse,
          cols.source,
          cols.day,
          record.to_data()?,
        ])?;
      }
    }

    // Narrower scopes stay registered only while the new rows still cover them.
    if let Some(prefix) = child_scope_prefix(coordinates) {
      let covered = covered_child_scopes(coordinates, records);
      let children = {
        let mut stmt =
          tx.prepare("SELECT scope_key FROM scope_meta WHERE substr(scope_key, 1, ?2) = ?1")?;
        let keys = stmt
          .query_map(params![prefix, prefix.len()], |row| row.get::<_, String>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        keys
      };
      for key in children {
        match covered.get(&key) {
          Some(count) => tx.execute(
            "UPDATE scope_meta SET count = ?2 WHERE scope_key = ?1",
            params![key, count],
          )?,
          None => tx.execute("DELETE FROM scope_meta WHERE scope_key = ?1", params![key])?,
        };
      }
    }

    // The enclosing scope, if registered, counts what its rows now hold.
    if let Some(parent) = parent_scope(coordinates) {
      let (parent_filter, parent_params) = scope_filter(&parent);
      let count: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {parent_filter}"),
        params_from_iter(parent_params.iter()),
        |row| row.get(0),
      )?;
      tx.execute(
        "UPDATE scope_meta SET count = ?2 WHERE scope_key = ?1",
        params![parent.scope_key(), count],
      )?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO scope_meta (scope_key, category, coordinates, cached, cached_at, count)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        meta.scope_key,
        category.as_str(),
        serde_json::to_string(&meta.coordinates)?,
        meta.cached,
        meta.cached_at.to_rfc3339(),
        meta.count,
      ],
    )?;

    tx.commit()?;
    debug!(scope = %meta.scope_key, count = meta.count, removed, "scope saved");
    Ok(meta)
  }

  /// Records of a scope via its secondary index, optionally narrowed to a verse range.
  pub fn get_scope(
    &self,
    coordinates: &Coordinates,
    range: Option<VerseRange>,
  ) -> Result<Vec<StoreRecord>, StoreError> {
    let category = coordinates.category();
    let table = schema::table(category);
    let (filter, filter_params) = scope_filter(coordinates);

    let conn = self.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT id, data FROM {table} WHERE {filter} ORDER BY chapter, verse, id"
    ))?;
    let rows: Vec<(String, String)> = stmt
      .query_map(params_from_iter(filter_params.iter()), |row| {
        Ok((row.get(0)?, row.get(1)?))
      })?
      .collect::<Result<_, _>>()?;

    let records = rows
      .into_iter()
      .filter_map(|(id, data)| match StoreRecord::from_data(category, &data) {
        Ok(record) => Some(record),
        Err(e) => {
          warn!(%category, %id, error = %e, "skipping undecodable record");
          None
        }
      })
      .filter(|record| range.as_ref().map_or(true, |r| record.in_range(r)))
      .collect();

    Ok(records)
  }

  /// Point lookup by full composite key.
  pub fn get_record(
    &self,
    category: Category,
    key: &str,
  ) -> Result<Option<StoreRecord>, StoreError> {
    let table = schema::table(category);
    let conn = self.conn.lock()?;
    let data: Option<String> = conn
      .query_row(
        &format!("SELECT data FROM {table} WHERE id = ?1"),
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    data
      .map(|d| StoreRecord::from_data(category, &d).map_err(StoreError::from))
      .transpose()
  }

  /// Whether the scope is registered as complete. Does not re-count records.
  pub fn has_scope(&self, coordinates: &Coordinates) -> Result<bool, StoreError> {
    Ok(
      self
        .get_meta(coordinates)?
        .map(|m| m.cached)
        .unwrap_or(false),
    )
  }

  pub fn get_meta(&self, coordinates: &Coordinates) -> Result<Option<ScopeMeta>, StoreError> {
    let conn = self.conn.lock()?;
    let row = conn
      .query_row(
        "SELECT scope_key, coordinates, cached, cached_at, count FROM scope_meta
         WHERE scope_key = ?1",
        params![coordinates.scope_key()],
        read_meta_row,
      )
      .optional()?;
    row.map(decode_meta).transpose()
  }

  /// Every registry entry.
  pub fn list_meta(&self) -> Result<Vec<ScopeMeta>, StoreError> {
    let conn = self.conn.lock()?;
    let mut stmt = conn.prepare(
      "SELECT scope_key, coordinates, cached, cached_at, count FROM scope_meta ORDER BY scope_key",
    )?;
    let rows: Vec<MetaRow> = stmt
      .query_map([], read_meta_row)?
      .collect::<Result<_, _>>()?;
    rows.into_iter().map(decode_meta).collect()
  }

  pub fn get_stats(&self) -> Result<StoreStats, StoreError> {
    Ok(StoreStats::from_meta(&self.list_meta()?))
  }

  /// Truncate every category table and the registry in one transaction.
  pub fn clear_all(&self) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;
    for category in Category::ALL {
      tx.execute(&format!("DELETE FROM {}", schema::table(category)), [])?;
    }
    tx.execute("DELETE FROM scope_meta", [])?;
    tx.commit()?;
    info!("structured store cleared");
    Ok(())
  }

  /// Truncate one category and its registry entries.
  pub fn clear_category(&self, category: Category) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;
    tx.execute(&format!("DELETE FROM {}", schema::table(category)), [])?;
    tx.execute(
      "DELETE FROM scope_meta WHERE category = ?1",
      params![category.as_str()],
    )?;
    tx.commit()?;
    info!(%category, "category cleared");
    Ok(())
  }

  pub fn get_preference(&self, key: &str) -> Result<Option<String>, StoreError> {
    let conn = self.conn.lock()?;
    Ok(
      conn
        .query_row(
          "SELECT value FROM preferences WHERE key = ?1",
          params![key],
          |row| row.get(0),
        )
        .optional()?,
    )
  }

  pub fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
      params![key, value],
    )?;
    Ok(())
  }
}

type MetaRow = (String, String, bool, String, i64);

fn read_meta_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetaRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

fn decode_meta((scope_key, coordinates, cached, cached_at, count): MetaRow) -> Result<ScopeMeta, StoreError> {
  let coordinates: Coordinates = serde_json::from_str(&coordinates)?;
  let cached_at = DateTime::parse_from_rfc3339(&cached_at)
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(|e| {
      warn!(%scope_key, error = %e, "unparseable scope timestamp");
      DateTime::<Utc>::UNIX_EPOCH
    });
  Ok(ScopeMeta {
    scope_key,
    category: coordinates.category(),
    coordinates,
    cached,
    cached_at,
    count: usize::try_from(count).unwrap_or(0),
  })
}

/// SQL predicate (and its parameters) selecting the rows of one scope.
fn scope_filter(coordinates: &Coordinates) -> (&'static str, Vec<SqlValue>) {
  let text = |s: &str| SqlValue::Text(s.to_string());
  let int = |n: u32| SqlValue::Integer(i64::from(n));

  match coordinates {
    Coordinates::Verses {
      translation,
      book,
      chapter,
    }
    | Coordinates::Alignments {
      translation,
      book,
      chapter,
    } => (
      "translation = ?1 AND book = ?2 AND chapter = ?3",
      vec![text(translation), text(book), int(*chapter)],
    ),
    Coordinates::Lexicon {
      strong_number: None,
    } => ("1 = 1", vec![]),
    Coordinates::Lexicon {
      strong_number: Some(n),
    } => ("id = ?1", vec![text(n)]),
    Coordinates::CrossRefs { book, chapter }
    | Coordinates::Interlinear { book, chapter }
    | Coordinates::Commentary {
      book,
      chapter,
      source: None,
    } => ("book = ?1 AND chapter = ?2", vec![text(book), int(*chapter)]),
    Coordinates::Commentary {
      book,
      chapter,
      source: Some(source),
    } => (
      "book = ?1 AND chapter = ?2 AND source = ?3",
      vec![text(book), int(*chapter), text(source)],
    ),
    Coordinates::Devotionals { date } => ("day = ?1", vec![text(date)]),
  }
}

/// Registry key prefix of scopes nested inside `coordinates`, if it has any.
fn child_scope_prefix(coordinates: &Coordinates) -> Option<String> {
  match coordinates {
    Coordinates::Lexicon {
      strong_number: None,
    }
    | Coordinates::Commentary { source: None, .. } => {
      Some(format!("{}:", coordinates.scope_key()))
    }
    _ => None,
  }
}

/// Registry keys of the nested scopes fully present in `records`, with their row counts.
fn covered_child_scopes(coordinates: &Coordinates, records: &[StoreRecord]) -> BTreeMap<String, usize> {
  let mut counts = BTreeMap::new();
  for record in records {
    let child = match (coordinates, record) {
      (
        Coordinates::Commentary {
          book,
          chapter,
          source: None,
        },
        StoreRecord::Commentary(entry),
      ) => Coordinates::commentary(book, *chapter, Some(&entry.source)),
      (
        Coordinates::Lexicon {
          strong_number: None,
        },
        StoreRecord::Lexicon(entry),
      ) => Coordinates::Lexicon {
        strong_number: Some(entry.strong_number.clone()),
      },
      _ => continue,
    };
    *counts.entry(child.scope_key()).or_insert(0) += 1;
  }
  counts
}

fn parent_scope(coordinates: &Coordinates) -> Option<Coordinates> {
  match coordinates {
    Coordinates::Commentary {
      book,
      chapter,
      source: Some(_),
    } => Some(Coordinates::commentary(book, *chapter, None)),
    Coordinates::Lexicon {
      strong_number: Some(_),
    } => Some(Coordinates::Lexicon {
      strong_number: None,
    }),
    _ => None,
  }
}
