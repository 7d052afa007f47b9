//! User-generated entities and their local/remote identity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of ids issued on the device before the remote has accepted an entity.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Fresh device-local id (`local-<uuid v7>`).
pub fn local_id() -> String {
  format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::now_v7())
}

pub fn is_local_id(id: &str) -> bool {
  id.starts_with(LOCAL_ID_PREFIX)
}

/// The signed-in user as seen by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub user_id: String,
  pub access_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Note,
  Tag,
  NoteTag,
  Subscription,
  Progress,
}

impl EntityKind {
  /// Push order: referenced entities before the entities that reference them.
  pub const PUSH_ORDER: [EntityKind; 5] = [
    EntityKind::Note,
    EntityKind::Tag,
    EntityKind::Subscription,
    EntityKind::NoteTag,
    EntityKind::Progress,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Note => "note",
      EntityKind::Tag => "tag",
      EntityKind::NoteTag => "note_tag",
      EntityKind::Subscription => "subscription",
      EntityKind::Progress => "progress",
    }
  }

  pub fn parse(name: &str) -> Option<Self> {
    Self::PUSH_ORDER.into_iter().find(|k| k.as_str() == name)
  }

  /// Remote table holding this kind.
  pub fn table(&self) -> &'static str {
    match self {
      EntityKind::Note => "user_notes",
      EntityKind::Tag => "user_tags",
      EntityKind::NoteTag => "user_note_tags",
      EntityKind::Subscription => "plan_subscriptions",
      EntityKind::Progress => "plan_progress",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub book: String,
  pub chapter: u32,
  pub start_verse: u32,
  pub end_verse: u32,
  pub content: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub synced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub color: Option<String>,
  #[serde(default)]
  pub synced: bool,
}

/// Assignment of a tag to a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteTag {
  pub id: String,
  pub note_id: String,
  pub tag_id: String,
  #[serde(default)]
  pub synced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSubscription {
  pub id: String,
  pub plan_id: String,
  pub started_on: NaiveDate,
  #[serde(default)]
  pub synced: bool,
}

/// One completed day of a subscription. Identified by (subscription_id, day).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDay {
  pub subscription_id: String,
  pub day: u32,
  #[serde(default)]
  pub synced: bool,
}

impl ProgressDay {
  pub fn key(subscription_id: &str, day: u32) -> String {
    format!("{subscription_id}:{day}")
  }

  /// Inverse of [`ProgressDay::key`].
  pub fn split_key(key: &str) -> Option<(&str, u32)> {
    let (subscription_id, day) = key.rsplit_once(':')?;
    Some((subscription_id, day.parse().ok()?))
  }
}

impl NoteTag {
  /// Unsynced link between two existing entities.
  pub fn draft(note_id: &str, tag_id: &str) -> UserEntity {
    UserEntity::NoteTag(NoteTag {
      id: local_id(),
      note_id: note_id.to_string(),
      tag_id: tag_id.to_string(),
      synced: false,
    })
  }
}

impl PlanSubscription {
  pub fn draft(plan_id: &str, started_on: NaiveDate) -> UserEntity {
    UserEntity::Subscription(PlanSubscription {
      id: local_id(),
      plan_id: plan_id.to_string(),
      started_on,
      synced: false,
    })
  }
}

/// Payload for a new note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDraft {
  pub book: String,
  pub chapter: u32,
  pub start_verse: u32,
  /// Defaults to `start_verse`
  pub end_verse: Option<u32>,
  pub content: String,
}

impl NoteDraft {
  pub fn into_entity(self) -> UserEntity {
    UserEntity::Note(Note {
      id: local_id(),
      end_verse: self.end_verse.unwrap_or(self.start_verse),
      book: self.book,
      chapter: self.chapter,
      start_verse: self.start_verse,
      content: self.content,
      created_at: Utc::now(),
      synced: false,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagDraft {
  pub name: String,
  pub color: Option<String>,
}

impl TagDraft {
  pub fn into_entity(self) -> UserEntity {
    UserEntity::Tag(Tag {
      id: local_id(),
      name: self.name,
      color: self.color,
      synced: false,
    })
  }
}

/// Any user entity, as handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEntity {
  Note(Note),
  Tag(Tag),
  NoteTag(NoteTag),
  Subscription(PlanSubscription),
  Progress(ProgressDay),
}

impl UserEntity {
  pub fn kind(&self) -> EntityKind {
    match self {
      UserEntity::Note(_) => EntityKind::Note,
      UserEntity::Tag(_) => EntityKind::Tag,
      UserEntity::NoteTag(_) => EntityKind::NoteTag,
      UserEntity::Subscription(_) => EntityKind::Subscription,
      UserEntity::Progress(_) => EntityKind::Progress,
    }
  }

  pub fn id(&self) -> String {
    match self {
      UserEntity::Note(n) => n.id.clone(),
      UserEntity::Tag(t) => t.id.clone(),
      UserEntity::NoteTag(l) => l.id.clone(),
      UserEntity::Subscription(s) => s.id.clone(),
      UserEntity::Progress(p) => ProgressDay::key(&p.subscription_id, p.day),
    }
  }

  pub fn is_synced(&self) -> bool {
    match self {
      UserEntity::Note(n) => n.synced,
      UserEntity::Tag(t) => t.synced,
      UserEntity::NoteTag(l) => l.synced,
      UserEntity::Subscription(s) => s.synced,
      UserEntity::Progress(p) => p.synced,
    }
  }

  /// Ids of the entities this one references, with their kinds.
  pub fn references(&self) -> Vec<(EntityKind, &str)> {
    match self {
      UserEntity::NoteTag(l) => vec![
        (EntityKind::Note, l.note_id.as_str()),
        (EntityKind::Tag, l.tag_id.as_str()),
      ],
      UserEntity::Progress(p) => vec![(EntityKind::Subscription, p.subscription_id.as_str())],
      _ => Vec::new(),
    }
  }

  pub(crate) fn to_json(&self) -> serde_json::Result<serde_json::Value> {
    match self {
      UserEntity::Note(n) => serde_json::to_value(n),
      UserEntity::Tag(t) => serde_json::to_value(t),
      UserEntity::NoteTag(l) => serde_json::to_value(l),
      UserEntity::Subscription(s) => serde_json::to_value(s),
      UserEntity::Progress(p) => serde_json::to_value(p),
    }
  }

  pub(crate) fn from_json(kind: EntityKind, value: serde_json::Value) -> serde_json::Result<Self> {
    Ok(match kind {
      EntityKind::Note => UserEntity::Note(serde_json::from_value(value)?),
      EntityKind::Tag => UserEntity::Tag(serde_json::from_value(value)?),
      EntityKind::NoteTag => UserEntity::NoteTag(serde_json::from_value(value)?),
      EntityKind::Subscription => UserEntity::Subscription(serde_json::from_value(value)?),
      EntityKind::Progress => UserEntity::Progress(serde_json::from_value(value)?),
    })
  }
}

/// In-memory view of every collection for the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collections {
  pub notes: Vec<Note>,
  pub tags: Vec<Tag>,
  pub note_tags: Vec<NoteTag>,
  pub subscriptions: Vec<PlanSubscription>,
  pub progress: Vec<ProgressDay>,
}

impl Collections {
  pub fn from_entities(entities: impl IntoIterator<Item = UserEntity>) -> Self {
    let mut collections = Self::default();
    for entity in entities {
      collections.insert(entity);
    }
    collections
  }

  pub fn insert(&mut self, entity: UserEntity) {
    match entity {
      UserEntity::Note(n) => self.notes.push(n),
      UserEntity::Tag(t) => self.tags.push(t),
      UserEntity::NoteTag(l) => self.note_tags.push(l),
      UserEntity::Subscription(s) => self.subscriptions.push(s),
      UserEntity::Progress(p) => {
        self
          .progress
          .retain(|d| !(d.subscription_id == p.subscription_id && d.day == p.day));
        self.progress.push(p);
      }
    }
  }

  /// Drop the collection of `kind` and install `entities` in its place.
  pub fn replace_kind(&mut self, kind: EntityKind, entities: Vec<UserEntity>) {
    match kind {
      EntityKind::Note => self.notes.clear(),
      EntityKind::Tag => self.tags.clear(),
      EntityKind::NoteTag => self.note_tags.clear(),
      EntityKind::Subscription => self.subscriptions.clear(),
      EntityKind::Progress => self.progress.clear(),
    }
    for entity in entities.into_iter().filter(|e| e.kind() == kind) {
      self.insert(entity);
    }
  }

  pub fn of_kind(&self, kind: EntityKind) -> Vec<UserEntity> {
    match kind {
      EntityKind::Note => self.notes.iter().cloned().map(UserEntity::Note).collect(),
      EntityKind::Tag => self.tags.iter().cloned().map(UserEntity::Tag).collect(),
      EntityKind::NoteTag => self.note_tags.iter().cloned().map(UserEntity::NoteTag).collect(),
      EntityKind::Subscription => self
        .subscriptions
        .iter()
        .cloned()
        .map(UserEntity::Subscription)
        .collect(),
      EntityKind::Progress => self.progress.iter().cloned().map(UserEntity::Progress).collect(),
    }
  }

  pub fn get(&self, kind: EntityKind, id: &str) -> Option<UserEntity> {
    self.of_kind(kind).into_iter().find(|e| e.id() == id)
  }

  /// Remove the entity and anything referencing it.
  pub fn remove(&mut self, kind: EntityKind, id: &str) {
    match kind {
      EntityKind::Note => {
        self.notes.retain(|n| n.id != id);
        self.note_tags.retain(|l| l.note_id != id);
      }
      EntityKind::Tag => {
        self.tags.retain(|t| t.id != id);
        self.note_tags.retain(|l| l.tag_id != id);
      }
      EntityKind::NoteTag => self.note_tags.retain(|l| l.id != id),
      EntityKind::Subscription => {
        self.subscriptions.retain(|s| s.id != id);
        self.progress.retain(|d| d.subscription_id != id);
      }
      EntityKind::Progress => self
        .progress
        .retain(|d| ProgressDay::key(&d.subscription_id, d.day) != id),
    }
  }

  /// Swap a local entity for its remote-accepted copy and rewrite references to it.
  pub fn replace(&mut self, old_id: &str, accepted: UserEntity) {
    let new_id = accepted.id();
    match accepted {
      UserEntity::Note(n) => {
        replace_by(&mut self.notes, |x| x.id == old_id, n);
        for link in self.note_tags.iter_mut().filter(|l| l.note_id == old_id) {
          link.note_id = new_id.clone();
        }
      }
      UserEntity::Tag(t) => {
        replace_by(&mut self.tags, |x| x.id == old_id, t);
        for link in self.note_tags.iter_mut().filter(|l| l.tag_id == old_id) {
          link.tag_id = new_id.clone();
        }
      }
      UserEntity::NoteTag(l) => replace_by(&mut self.note_tags, |x| x.id == old_id, l),
      UserEntity::Subscription(s) => {
        replace_by(&mut self.subscriptions, |x| x.id == old_id, s);
        for day in self.progress.iter_mut().filter(|d| d.subscription_id == old_id) {
          day.subscription_id = new_id.clone();
        }
      }
      UserEntity::Progress(p) => replace_by(
        &mut self.progress,
        |x| ProgressDay::key(&x.subscription_id, x.day) == old_id,
        p,
      ),
    }
  }

  pub fn completed_days(&self, subscription_id: &str) -> Vec<u32> {
    let mut days: Vec<u32> = self
      .progress
      .iter()
      .filter(|d| d.subscription_id == subscription_id)
      .map(|d| d.day)
      .collect();
    days.sort_unstable();
    days
  }

  pub fn unsynced(&self, kind: EntityKind) -> Vec<UserEntity> {
    self
      .of_kind(kind)
      .into_iter()
      .filter(|e| !e.is_synced())
      .collect()
  }
}

fn replace_by<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool, replacement: T) {
  match items.iter().position(matches) {
    Some(i) => items[i] = replacement,
    None => items.push(replacement),
  }
}
