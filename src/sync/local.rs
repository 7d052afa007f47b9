//! Device-local scratch storage for user entities.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::entities::{EntityKind, Identity, ProgressDay, UserEntity};
use super::remote::EntityBackend;
use crate::db;
use crate::error::{StoreError, SyncError};

const USERDATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_entities (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    UNIQUE (kind, id)
);
CREATE INDEX IF NOT EXISTS idx_user_entities_synced ON user_entities(kind, synced);
CREATE TABLE IF NOT EXISTS pending_deletes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    UNIQUE (kind, id)
);
"#;

/// SQLite-backed entity storage. Survives sign-out; it is the guest view of the device.
pub struct LocalBackend {
  conn: Mutex<Connection>,
}

impl LocalBackend {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    Self::from_connection(db::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(USERDATA_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Every stored entity of `kind`, in creation order.
  pub fn load(&self, kind: EntityKind) -> Result<Vec<UserEntity>, StoreError> {
    let conn = self.conn.lock()?;
    let mut stmt =
      conn.prepare("SELECT id, data FROM user_entities WHERE kind = ?1 ORDER BY seq")?;
    let rows: Vec<(String, String)> = stmt
      .query_map(params![kind.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<Result<_, _>>()?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(id, data)| {
          let parsed = serde_json::from_str(&data).and_then(|v| UserEntity::from_json(kind, v));
          match parsed {
            Ok(entity) => Some(entity),
            Err(e) => {
              warn!(%kind, %id, error = %e, "skipping undecodable local entity");
              None
            }
          }
        })
        .collect(),
    )
  }

  pub fn load_all(&self) -> Result<Vec<UserEntity>, StoreError> {
    let mut all = Vec::new();
    for kind in EntityKind::PUSH_ORDER {
      all.extend(self.load(kind)?);
    }
    Ok(all)
  }

  /// Insert or overwrite one entity.
  pub fn save(&self, entity: &UserEntity) -> Result<(), StoreError> {
    let conn = self.conn.lock()?;
    upsert(&conn, entity)
  }

  pub fn save_many(&self, entities: &[UserEntity]) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;
    for entity in entities {
      upsert(&tx, entity)?;
    }
    tx.commit()?;
    Ok(())
  }

  /// Remove an entity together with whatever references it.
  pub fn remove(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM user_entities WHERE kind = ?1 AND id = ?2",
      params![kind.as_str(), id],
    )?;
    for (dependant, field) in dependants(kind) {
      tx.execute(
        &format!(
          "DELETE FROM user_entities WHERE kind = ?1 AND json_extract(data, '$.{field}') = ?2"
        ),
        params![dependant.as_str(), id],
      )?;
    }
    tx.commit()?;
    Ok(())
  }

  /// Replace a local entity by its remote-accepted copy and rewrite references to it,
  /// in one transaction.
  pub fn commit_remote_id(&self, old_id: &str, accepted: &UserEntity) -> Result<(), StoreError> {
    let kind = accepted.kind();
    let new_id = accepted.id();

    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM user_entities WHERE kind = ?1 AND id = ?2",
      params![kind.as_str(), old_id],
    )?;
    upsert(&tx, accepted)?;

    let remapped = match kind {
      EntityKind::Note | EntityKind::Tag => {
        let field = if kind == EntityKind::Note { "note_id" } else { "tag_id" };
        tx.execute(
          &format!(
            "UPDATE user_entities SET data = json_set(data, '$.{field}', ?2)
             WHERE kind = 'note_tag' AND json_extract(data, '$.{field}') = ?1"
          ),
          params![old_id, new_id],
        )?
      }
      // Progress rows are keyed by their subscription id, so the key moves too.
      EntityKind::Subscription => tx.execute(
        "UPDATE user_entities
         SET data = json_set(data, '$.subscription_id', ?2),
             id = ?2 || ':' || json_extract(data, '$.day')
         WHERE kind = 'progress' AND json_extract(data, '$.subscription_id') = ?1",
        params![old_id, new_id],
      )?,
      EntityKind::NoteTag | EntityKind::Progress => 0,
    };

    tx.commit()?;
    debug!(%kind, old_id, %new_id, remapped, "local entity committed remote id");
    Ok(())
  }

  /// Remember that a synced entity was deleted here but not yet at the remote.
  pub fn record_pending_delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO pending_deletes (kind, id) VALUES (?1, ?2)",
      params![kind.as_str(), id],
    )?;
    Ok(())
  }

  /// Deletes still owed to the remote, oldest first.
  pub fn pending_deletes(&self) -> Result<Vec<(EntityKind, String)>, StoreError> {
    let conn = self.conn.lock()?;
    let mut stmt = conn.prepare("SELECT kind, id FROM pending_deletes ORDER BY seq")?;
    let rows: Vec<(String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<Result<_, _>>()?;
    Ok(
      rows
        .into_iter()
        .filter_map(|(kind, id)| match EntityKind::parse(&kind) {
          Some(kind) => Some((kind, id)),
          None => {
            warn!(%kind, %id, "skipping pending delete of unknown kind");
            None
          }
        })
        .collect(),
    )
  }

  pub fn clear_pending_delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock()?;
    conn.execute(
      "DELETE FROM pending_deletes WHERE kind = ?1 AND id = ?2",
      params![kind.as_str(), id],
    )?;
    Ok(())
  }

  /// Flag progress days as accepted by the remote.
  pub fn mark_days_synced(&self, days: &[ProgressDay]) -> Result<(), StoreError> {
    let synced: Vec<UserEntity> = days
      .iter()
      .map(|d| {
        UserEntity::Progress(ProgressDay {
          synced: true,
          ..d.clone()
        })
      })
      .collect();
    self.save_many(&synced)
  }
}

fn upsert(conn: &Connection, entity: &UserEntity) -> Result<(), StoreError> {
  conn.execute(
    "INSERT INTO user_entities (kind, id, synced, data) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (kind, id) DO UPDATE SET synced = excluded.synced, data = excluded.data",
    params![
      entity.kind().as_str(),
      entity.id(),
      entity.is_synced(),
      entity.to_json()?.to_string(),
    ],
  )?;
  Ok(())
}

/// Kinds holding a reference to `kind`, with the referencing field.
fn dependants(kind: EntityKind) -> &'static [(EntityKind, &'static str)] {
  match kind {
    EntityKind::Note => &[(EntityKind::NoteTag, "note_id")],
    EntityKind::Tag => &[(EntityKind::NoteTag, "tag_id")],
    EntityKind::Subscription => &[(EntityKind::Progress, "subscription_id")],
    EntityKind::NoteTag | EntityKind::Progress => &[],
  }
}

/// The local backend speaks the same interface as the remote one; it simply ignores
/// the identity and echoes entities back as stored.
impl EntityBackend for LocalBackend {
  async fn list(&self, kind: EntityKind, _owner: &Identity) -> Result<Vec<UserEntity>, SyncError> {
    Ok(self.load(kind)?)
  }

  async fn create(&self, entity: &UserEntity, _owner: &Identity) -> Result<UserEntity, SyncError> {
    self.save(entity)?;
    Ok(entity.clone())
  }

  async fn delete(&self, kind: EntityKind, id: &str, _owner: &Identity) -> Result<(), SyncError> {
    Ok(self.remove(kind, id)?)
  }

  async fn upsert_days(&self, days: &[ProgressDay], _owner: &Identity) -> Result<(), SyncError> {
    let entities: Vec<UserEntity> = days.iter().cloned().map(UserEntity::Progress).collect();
    Ok(self.save_many(&entities)?)
  }

  async fn delete_day(
    &self,
    subscription_id: &str,
    day: u32,
    _owner: &Identity,
  ) -> Result<(), SyncError> {
    Ok(self.remove(EntityKind::Progress, &ProgressDay::key(subscription_id, day))?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::entities::{NoteTag, PlanSubscription, Tag};
  use chrono::NaiveDate;

  fn subscription(id: &str) -> UserEntity {
    UserEntity::Subscription(PlanSubscription {
      id: id.into(),
      plan_id: "bible-in-a-year".into(),
      started_on: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
      synced: false,
    })
  }

  fn day(subscription_id: &str, day: u32) -> UserEntity {
    UserEntity::Progress(ProgressDay {
      subscription_id: subscription_id.into(),
      day,
      synced: false,
    })
  }

  #[test]
  fn save_is_idempotent_and_ordered() {
    let local = LocalBackend::open_in_memory().unwrap();
    local.save(&subscription("local-a")).unwrap();
    local.save(&subscription("local-b")).unwrap();
    local.save(&subscription("local-a")).unwrap();

    let ids: Vec<String> = local
      .load(EntityKind::Subscription)
      .unwrap()
      .iter()
      .map(UserEntity::id)
      .collect();
    assert_eq!(ids, vec!["local-a", "local-b"]);
  }

  #[test]
  fn commit_remote_id_rekeys_progress() {
    let local = LocalBackend::open_in_memory().unwrap();
    local
      .save_many(&[subscription("local-s"), day("local-s", 1), day("local-s", 2)])
      .unwrap();

    let accepted = UserEntity::Subscription(PlanSubscription {
      id: "88".into(),
      plan_id: "bible-in-a-year".into(),
      started_on: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
      synced: true,
    });
    local.commit_remote_id("local-s", &accepted).unwrap();

    let subs = local.load(EntityKind::Subscription).unwrap();
    assert_eq!(subs, vec![accepted]);
    let days: Vec<String> = local
      .load(EntityKind::Progress)
      .unwrap()
      .iter()
      .map(UserEntity::id)
      .collect();
    assert_eq!(days, vec!["88:1", "88:2"]);
  }

  #[test]
  fn commit_remote_id_rewrites_link_endpoints() {
    let local = LocalBackend::open_in_memory().unwrap();
    let tag = UserEntity::Tag(Tag {
      id: "local-t".into(),
      name: "prayer".into(),
      color: None,
      synced: false,
    });
    let link = UserEntity::NoteTag(NoteTag {
      id: "local-l".into(),
      note_id: "5".into(),
      tag_id: "local-t".into(),
      synced: false,
    });
    local.save_many(&[tag, link]).unwrap();

    let accepted = UserEntity::Tag(Tag {
      id: "9".into(),
      name: "prayer".into(),
      color: None,
      synced: true,
    });
    local.commit_remote_id("local-t", &accepted).unwrap();

    match &local.load(EntityKind::NoteTag).unwrap()[0] {
      UserEntity::NoteTag(l) => assert_eq!(l.tag_id, "9"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn removing_subscription_drops_its_days() {
    let local = LocalBackend::open_in_memory().unwrap();
    local
      .save_many(&[subscription("s"), day("s", 1), day("other", 1)])
      .unwrap();
    local.remove(EntityKind::Subscription, "s").unwrap();

    assert!(local.load(EntityKind::Subscription).unwrap().is_empty());
    assert_eq!(local.load(EntityKind::Progress).unwrap().len(), 1);
  }

  #[test]
  fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(db::USERDATA_DB);
    LocalBackend::open(&path)
      .unwrap()
      .save(&subscription("local-a"))
      .unwrap();

    let reopened = LocalBackend::open(&path).unwrap();
    assert_eq!(reopened.load_all().unwrap().len(), 1);
  }

  #[test]
  fn pending_deletes_survive_until_cleared() {
    let local = LocalBackend::open_in_memory().unwrap();
    local.record_pending_delete(EntityKind::Note, "9").unwrap();
    local.record_pending_delete(EntityKind::Progress, "4:2").unwrap();
    local.record_pending_delete(EntityKind::Note, "9").unwrap();

    assert_eq!(
      local.pending_deletes().unwrap(),
      vec![
        (EntityKind::Note, "9".to_string()),
        (EntityKind::Progress, "4:2".to_string())
      ]
    );

    local.clear_pending_delete(EntityKind::Note, "9").unwrap();
    assert_eq!(local.pending_deletes().unwrap().len(), 1);
  }
}
