//! Reconciliation of device-local user entities against the remote authority.

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entities::{
  is_local_id, Collections, EntityKind, Identity, PlanSubscription, ProgressDay, UserEntity,
};
use super::local::LocalBackend;
use super::remote::EntityBackend;
use crate::connectivity::Connectivity;
use crate::error::SyncError;

/// An entity the remote did not accept during a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushFailure {
  pub kind: EntityKind,
  pub id: String,
  pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
  pub synced_count: usize,
  /// Deletes made while offline that reached the remote in this push
  pub deleted_count: usize,
  pub failures: Vec<PushFailure>,
}

/// Outcome of a push-then-pull cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub pushed: PushReport,
  pub pulled: usize,
  /// The gate was closed; nothing was exchanged with the remote.
  pub deferred: bool,
}

/// Owns the in-memory collections for the session and keeps them consistent with the
/// local scratch backend and, when signed in, the remote one.
///
/// Conflict policy: remote wins on pull. A pull replaces every collection wholesale,
/// which is why sign-in always pushes first.
pub struct SyncEngine<R: EntityBackend> {
  local: LocalBackend,
  remote: R,
  connectivity: Arc<Connectivity>,
  session: Option<Identity>,
  collections: Collections,
}

impl<R: EntityBackend> SyncEngine<R> {
  /// Start a guest session over whatever the local backend holds.
  pub fn new(
    local: LocalBackend,
    remote: R,
    connectivity: Arc<Connectivity>,
  ) -> Result<Self, SyncError> {
    let collections = Collections::from_entities(local.load_all()?);
    Ok(Self {
      local,
      remote,
      connectivity,
      session: None,
      collections,
    })
  }

  pub fn collections(&self) -> &Collections {
    &self.collections
  }

  pub fn remote(&self) -> &R {
    &self.remote
  }

  pub fn is_signed_in(&self) -> bool {
    self.session.is_some()
  }

  /// The session identity, if signed in and the gate is open.
  fn online_session(&self) -> Option<Identity> {
    self
      .session
      .clone()
      .filter(|_| self.connectivity.can_use_network())
  }

  fn require_online_session(&self) -> Result<Identity, SyncError> {
    let identity = self.session.clone().ok_or(SyncError::NotAuthenticated)?;
    if !self.connectivity.can_use_network() {
      return Err(SyncError::Offline);
    }
    Ok(identity)
  }

  /// Record an entity on the device only; it stays unsynced until the next push.
  pub fn create_local(&mut self, entity: UserEntity) -> Result<UserEntity, SyncError> {
    self.local.save(&entity)?;
    self.collections.insert(entity.clone());
    debug!(kind = %entity.kind(), id = %entity.id(), "created local entity");
    Ok(entity)
  }

  /// Create the entity at the remote and adopt the returned copy.
  pub async fn create_remote(&mut self, entity: UserEntity) -> Result<UserEntity, SyncError> {
    let owner = self.require_online_session()?;
    let accepted = self.remote.create(&entity, &owner).await?;
    self.collections.insert(accepted.clone());
    debug!(kind = %accepted.kind(), id = %accepted.id(), "created remote entity");
    Ok(accepted)
  }

  /// Remote when signed in and online, otherwise (or when the remote refuses) local.
  pub async fn create(&mut self, entity: UserEntity) -> Result<UserEntity, SyncError> {
    if self.online_session().is_some() {
      match self.create_remote(entity.clone()).await {
        Ok(accepted) => return Ok(accepted),
        Err(e) => warn!(kind = %entity.kind(), error = %e, "remote create failed, keeping it local"),
      }
    }
    self.create_local(entity)
  }

  /// Send every unsynced entity to the remote, referenced kinds first.
  ///
  /// Failures are collected per entity and never abort the batch. An entity whose
  /// reference is still local is reported as a failure and left for the next push.
  pub async fn push_sync(&mut self) -> Result<PushReport, SyncError> {
    let owner = self.require_online_session()?;
    let mut report = PushReport::default();

    for (kind, id) in self.local.pending_deletes()? {
      match self.delete_remote(kind, &id, &owner).await {
        Ok(()) => {
          self.local.clear_pending_delete(kind, &id)?;
          report.deleted_count += 1;
        }
        Err(e) => {
          warn!(%kind, %id, error = %e, "pending delete failed");
          report.failures.push(PushFailure {
            kind,
            id,
            message: e.to_string(),
          });
        }
      }
    }

    for kind in EntityKind::PUSH_ORDER {
      if kind == EntityKind::Progress {
        continue;
      }
      for entity in self.collections.unsynced(kind) {
        let old_id = entity.id();
        let blocked = entity
          .references()
          .into_iter()
          .find(|(_, id)| is_local_id(id))
          .map(|(ref_kind, ref_id)| format!("{ref_kind} {ref_id} is not synced"));
        if let Some(message) = blocked {
          report.failures.push(PushFailure {
            kind,
            id: old_id,
            message,
          });
          continue;
        }

        match self.remote.create(&entity, &owner).await {
          Ok(accepted) => {
            self.local.commit_remote_id(&old_id, &accepted)?;
            debug!(%kind, %old_id, new_id = %accepted.id(), "pushed entity");
            self.collections.replace(&old_id, accepted);
            report.synced_count += 1;
          }
          Err(e) => {
            warn!(%kind, id = %old_id, error = %e, "push failed");
            report.failures.push(PushFailure {
              kind,
              id: old_id,
              message: e.to_string(),
            });
          }
        }
      }
    }

    let mut pending: BTreeMap<String, Vec<ProgressDay>> = BTreeMap::new();
    for day in self.collections.progress.iter().filter(|d| !d.synced) {
      pending
        .entry(day.subscription_id.clone())
        .or_default()
        .push(day.clone());
    }
    for (subscription_id, days) in pending {
      let failure = |message: String| {
        days.iter().map(move |d| PushFailure {
          kind: EntityKind::Progress,
          id: ProgressDay::key(&d.subscription_id, d.day),
          message: message.clone(),
        })
      };
      if is_local_id(&subscription_id) {
        let message = format!("subscription {subscription_id} is not synced");
        report.failures.extend(failure(message));
        continue;
      }
      match self.remote.upsert_days(&days, &owner).await {
        Ok(()) => {
          self.local.mark_days_synced(&days)?;
          self.mark_days_synced(&subscription_id, &days);
          report.synced_count += days.len();
        }
        Err(e) => {
          warn!(%subscription_id, error = %e, "progress push failed");
          report.failures.extend(failure(e.to_string()));
        }
      }
    }

    info!(
      synced = report.synced_count,
      deleted = report.deleted_count,
      failed = report.failures.len(),
      "push complete"
    );
    Ok(report)
  }

  /// Replace every in-memory collection with the remote's. Nothing is replaced unless
  /// every kind was fetched. Entities deleted here but not yet at the remote stay gone.
  pub async fn pull_sync(&mut self) -> Result<usize, SyncError> {
    let owner = self.require_online_session()?;
    let pending: BTreeSet<(EntityKind, String)> =
      self.local.pending_deletes()?.into_iter().collect();
    let mut pulled = Collections::default();
    let mut count = 0;
    for kind in EntityKind::PUSH_ORDER {
      let entities: Vec<UserEntity> = self
        .remote
        .list(kind, &owner)
        .await?
        .into_iter()
        .filter(|e| !pending.contains(&(kind, e.id())))
        .collect();
      count += entities.len();
      pulled.replace_kind(kind, entities);
    }
    self.collections = pulled;
    info!(count, "pull complete");
    Ok(count)
  }

  /// Push then pull, when the gate allows it.
  pub async fn sync(&mut self) -> Result<SyncReport, SyncError> {
    if self.session.is_none() {
      return Err(SyncError::NotAuthenticated);
    }
    if !self.connectivity.can_use_network() {
      info!("network unavailable, reconciliation deferred");
      return Ok(SyncReport {
        deferred: true,
        ..SyncReport::default()
      });
    }
    let pushed = self.push_sync().await?;
    let pulled = self.pull_sync().await?;
    Ok(SyncReport {
      pushed,
      pulled,
      deferred: false,
    })
  }

  pub async fn sign_in(&mut self, identity: Identity) -> Result<SyncReport, SyncError> {
    info!(user_id = %identity.user_id, "signing in");
    self.session = Some(identity);
    self.sync().await
  }

  /// Drop the session and fall back to the device's own collections. Remote data is
  /// not touched.
  pub fn sign_out(&mut self) -> Result<(), SyncError> {
    self.session = None;
    self.collections = Collections::from_entities(self.local.load_all()?);
    info!("signed out");
    Ok(())
  }

  /// Flip one day of a subscription. Returns whether the day is now complete.
  ///
  /// With an online session and a synced subscription the remote write happens first and
  /// a failure leaves local state untouched; otherwise only the local copy changes and the
  /// day is left for the next push.
  pub async fn toggle_day(&mut self, subscription_id: &str, day: u32) -> Result<bool, SyncError> {
    let subscription = self
      .collections
      .subscriptions
      .iter()
      .find(|s| s.id == subscription_id)
      .cloned()
      .ok_or_else(|| SyncError::NotFound {
        kind: EntityKind::Subscription.as_str(),
        id: subscription_id.to_string(),
      })?;
    let completed = self.collections.completed_days(subscription_id).contains(&day);

    let owner = self.online_session().filter(|_| subscription.synced);
    if let Some(owner) = &owner {
      if completed {
        self.remote.delete_day(subscription_id, day, owner).await?;
      } else {
        let entry = ProgressDay {
          subscription_id: subscription_id.to_string(),
          day,
          synced: true,
        };
        self.remote.upsert_days(&[entry], owner).await?;
      }
    }

    let key = ProgressDay::key(subscription_id, day);
    if completed {
      let was_synced = self
        .collections
        .get(EntityKind::Progress, &key)
        .is_some_and(|entry| entry.is_synced());
      if owner.is_none() && was_synced {
        self.local.record_pending_delete(EntityKind::Progress, &key)?;
      }
      self.local.remove(EntityKind::Progress, &key)?;
      self.collections.remove(EntityKind::Progress, &key);
    } else {
      self.local.clear_pending_delete(EntityKind::Progress, &key)?;
      let entry = UserEntity::Progress(ProgressDay {
        subscription_id: subscription_id.to_string(),
        day,
        synced: owner.is_some(),
      });
      self.local.save(&entry)?;
      self.collections.insert(entry);
    }
    debug!(subscription_id, day, complete = !completed, remote = owner.is_some(), "day toggled");
    Ok(!completed)
  }

  /// Subscribe to a plan that started `days_elapsed` days ago and mark days
  /// `1..=days_elapsed` complete, with a single batched remote upsert when possible.
  pub async fn confirm_start_plan_with_catch_up(
    &mut self,
    plan_id: &str,
    days_elapsed: u32,
  ) -> Result<PlanSubscription, SyncError> {
    let today = Utc::now().date_naive();
    let started_on = today
      .checked_sub_days(Days::new(u64::from(days_elapsed)))
      .unwrap_or(today);
    self.start_plan_on(plan_id, started_on, days_elapsed).await
  }

  async fn start_plan_on(
    &mut self,
    plan_id: &str,
    started_on: NaiveDate,
    days_elapsed: u32,
  ) -> Result<PlanSubscription, SyncError> {
    let draft = PlanSubscription::draft(plan_id, started_on);
    let entity = match self.online_session() {
      Some(owner) => match self.remote.create(&draft, &owner).await {
        Ok(accepted) => accepted,
        Err(e) => {
          warn!(plan_id, error = %e, "remote subscription failed, keeping it local");
          draft
        }
      },
      None => draft,
    };
    let UserEntity::Subscription(subscription) = entity.clone() else {
      return Err(SyncError::Decode {
        kind: EntityKind::Subscription.as_str(),
        message: "backend returned a different entity kind".into(),
      });
    };

    let days: Vec<ProgressDay> = (1..=days_elapsed)
      .map(|day| ProgressDay {
        subscription_id: subscription.id.clone(),
        day,
        synced: false,
      })
      .collect();
    let mut batch = vec![entity.clone()];
    batch.extend(days.iter().cloned().map(UserEntity::Progress));
    self.local.save_many(&batch)?;
    for item in batch {
      self.collections.insert(item);
    }

    if let Some(owner) = self.online_session().filter(|_| subscription.synced) {
      match self.remote.upsert_days(&days, &owner).await {
        Ok(()) => {
          self.local.mark_days_synced(&days)?;
          self.mark_days_synced(&subscription.id, &days);
        }
        Err(e) => warn!(plan_id, error = %e, "catch-up upsert failed, left for next push"),
      }
    }

    info!(plan_id, subscription_id = %subscription.id, days_elapsed, "plan started");
    Ok(subscription)
  }

  /// Delete locally, then remotely if the entity has a remote id.
  ///
  /// The local delete always stands. Without an online session the remote delete is
  /// queued and replayed by the next push; a remote failure is queued too and returned.
  pub async fn delete(&mut self, kind: EntityKind, id: &str) -> Result<(), SyncError> {
    let entity = self
      .collections
      .get(kind, id)
      .ok_or_else(|| SyncError::NotFound {
        kind: kind.as_str(),
        id: id.to_string(),
      })?;

    self.local.remove(kind, id)?;
    self.collections.remove(kind, id);

    if !entity.is_synced() || (kind != EntityKind::Progress && is_local_id(id)) {
      return Ok(());
    }
    let Some(owner) = self.online_session() else {
      self.local.record_pending_delete(kind, id)?;
      debug!(%kind, id, "remote delete queued");
      return Ok(());
    };
    if let Err(e) = self.delete_remote(kind, id, &owner).await {
      self.local.record_pending_delete(kind, id)?;
      return Err(e);
    }
    Ok(())
  }

  async fn delete_remote(
    &self,
    kind: EntityKind,
    id: &str,
    owner: &Identity,
  ) -> Result<(), SyncError> {
    if kind != EntityKind::Progress {
      return self.remote.delete(kind, id, owner).await;
    }
    let (subscription_id, day) = ProgressDay::split_key(id).ok_or_else(|| SyncError::Decode {
      kind: kind.as_str(),
      message: format!("malformed progress key {id}"),
    })?;
    self.remote.delete_day(subscription_id, day, owner).await
  }

  fn mark_days_synced(&mut self, subscription_id: &str, days: &[ProgressDay]) {
    for entry in self
      .collections
      .progress
      .iter_mut()
      .filter(|d| d.subscription_id == subscription_id)
    {
      if days.iter().any(|d| d.day == entry.day) {
        entry.synced = true;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::entities::{NoteDraft, NoteTag, TagDraft};
  use std::collections::BTreeSet;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  /// Remote that keeps rows in memory and counts calls.
  #[derive(Default)]
  struct FakeRemote {
    state: Mutex<FakeState>,
  }

  #[derive(Default)]
  struct FakeState {
    next_id: u64,
    rows: Vec<UserEntity>,
    days: BTreeSet<(String, u32)>,
    creates: usize,
    upserts: usize,
    deletes: usize,
    /// Note contents the remote refuses
    reject_content: Option<String>,
  }

  impl FakeRemote {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
      self.state.lock().unwrap()
    }
  }

  impl EntityBackend for FakeRemote {
    async fn list(&self, kind: EntityKind, _owner: &Identity) -> Result<Vec<UserEntity>, SyncError> {
      let state = self.state();
      if kind == EntityKind::Progress {
        return Ok(
          state
            .days
            .iter()
            .map(|(s, d)| {
              UserEntity::Progress(ProgressDay {
                subscription_id: s.clone(),
                day: *d,
                synced: true,
              })
            })
            .collect(),
        );
      }
      Ok(state.rows.iter().filter(|e| e.kind() == kind).cloned().collect())
    }

    async fn create(&self, entity: &UserEntity, _owner: &Identity) -> Result<UserEntity, SyncError> {
      let mut state = self.state();
      state.creates += 1;
      if let (UserEntity::Note(n), Some(bad)) = (entity, &state.reject_content) {
        if &n.content == bad {
          return Err(SyncError::Rejected {
            kind: "note",
            status: 400,
            message: "rejected".into(),
          });
        }
      }
      state.next_id += 1;
      let id = state.next_id.to_string();
      let accepted = match entity.clone() {
        UserEntity::Note(mut n) => {
          n.id = id;
          n.synced = true;
          UserEntity::Note(n)
        }
        UserEntity::Tag(mut t) => {
          t.id = id;
          t.synced = true;
          UserEntity::Tag(t)
        }
        UserEntity::NoteTag(mut l) => {
          l.id = id;
          l.synced = true;
          UserEntity::NoteTag(l)
        }
        UserEntity::Subscription(mut s) => {
          s.id = id;
          s.synced = true;
          UserEntity::Subscription(s)
        }
        UserEntity::Progress(p) => UserEntity::Progress(p),
      };
      state.rows.push(accepted.clone());
      Ok(accepted)
    }

    async fn delete(&self, kind: EntityKind, id: &str, _owner: &Identity) -> Result<(), SyncError> {
      let mut state = self.state();
      state.deletes += 1;
      state.rows.retain(|e| !(e.kind() == kind && e.id() == id));
      Ok(())
    }

    async fn upsert_days(&self, days: &[ProgressDay], _owner: &Identity) -> Result<(), SyncError> {
      let mut state = self.state();
      state.upserts += 1;
      for d in days {
        state.days.insert((d.subscription_id.clone(), d.day));
      }
      Ok(())
    }

    async fn delete_day(
      &self,
      subscription_id: &str,
      day: u32,
      _owner: &Identity,
    ) -> Result<(), SyncError> {
      let mut state = self.state();
      state.deletes += 1;
      state.days.remove(&(subscription_id.to_string(), day));
      Ok(())
    }
  }

  fn identity() -> Identity {
    Identity {
      user_id: "user-1".into(),
      access_token: "token".into(),
    }
  }

  fn engine(online: bool) -> (SyncEngine<FakeRemote>, Arc<AtomicBool>) {
    let flag = Arc::new(AtomicBool::new(online));
    let transport = {
      let flag = Arc::clone(&flag);
      move || flag.load(Ordering::SeqCst)
    };
    let connectivity = Arc::new(Connectivity::new(transport));
    let engine = SyncEngine::new(
      LocalBackend::open_in_memory().unwrap(),
      FakeRemote::default(),
      connectivity,
    )
    .unwrap();
    (engine, flag)
  }

  fn note(content: &str) -> UserEntity {
    NoteDraft {
      book: "John".into(),
      chapter: 3,
      start_verse: 16,
      end_verse: None,
      content: content.into(),
    }
    .into_entity()
  }

  #[tokio::test]
  async fn guest_creates_are_local_and_unsynced() {
    let (mut engine, _) = engine(true);
    let created = engine.create(note("for God so loved")).await.unwrap();

    assert!(!created.is_synced());
    assert!(is_local_id(&created.id()));
    assert_eq!(engine.remote().state().creates, 0);
    match &engine.collections().notes[..] {
      [n] => assert_eq!(n.end_verse, 16),
      other => panic!("unexpected notes {other:?}"),
    }
  }

  #[tokio::test]
  async fn push_only_touches_unsynced_and_remaps_links() {
    let (mut engine, _) = engine(true);
    let n = engine.create_local(note("a")).unwrap();
    let t = engine
      .create_local(
        TagDraft {
          name: "grace".into(),
          color: None,
        }
        .into_entity(),
      )
      .unwrap();
    engine
      .create_local(NoteTag::draft(&n.id(), &t.id()))
      .unwrap();

    engine.sign_in(identity()).await.unwrap();
    assert_eq!(engine.remote().state().creates, 3);

    let c = engine.collections();
    assert!(c.notes.iter().all(|n| n.synced && !is_local_id(&n.id)));
    assert_eq!(c.note_tags.len(), 1);
    assert_eq!(c.note_tags[0].note_id, c.notes[0].id);
    assert_eq!(c.note_tags[0].tag_id, c.tags[0].id);

    // A second push has nothing to do.
    let report = engine.push_sync().await.unwrap();
    assert_eq!(report, PushReport::default());
    assert_eq!(engine.remote().state().creates, 3);
  }

  #[tokio::test]
  async fn push_failure_is_per_entity() {
    let (mut engine, _) = engine(true);
    engine.remote().state().reject_content = Some("bad".into());
    engine.create_local(note("good")).unwrap();
    let bad = engine.create_local(note("bad")).unwrap();
    engine
      .create_local(NoteTag::draft(&bad.id(), "7"))
      .unwrap();

    engine.session = Some(identity());
    let report = engine.push_sync().await.unwrap();
    assert_eq!(report.synced_count, 1);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].id, bad.id());
    assert_eq!(report.failures[1].kind, EntityKind::NoteTag);

    let unsynced = engine.collections().unsynced(EntityKind::Note);
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id(), bad.id());
  }

  #[tokio::test]
  async fn pull_replaces_collections_wholesale() {
    let (mut engine, _) = engine(true);
    engine.remote().state().rows.push(UserEntity::Tag(crate::sync::entities::Tag {
      id: "50".into(),
      name: "remote".into(),
      color: None,
      synced: true,
    }));

    engine.session = Some(identity());
    let pulled = engine.pull_sync().await.unwrap();
    assert_eq!(pulled, 1);
    assert_eq!(engine.collections().tags[0].name, "remote");
    assert!(engine.collections().notes.is_empty());
  }

  #[tokio::test]
  async fn catch_up_marks_days_locally_and_remotely_in_one_batch() {
    let (mut engine, _) = engine(true);
    engine.sign_in(identity()).await.unwrap();

    let sub = engine
      .confirm_start_plan_with_catch_up("chronological", 5)
      .await
      .unwrap();
    assert!(sub.synced);
    assert_eq!(engine.collections().completed_days(&sub.id), vec![1, 2, 3, 4, 5]);
    assert!(engine.collections().progress.iter().all(|d| d.synced));

    let state = engine.remote().state();
    assert_eq!(state.upserts, 1);
    let remote_days: Vec<u32> = state
      .days
      .iter()
      .filter(|(s, _)| *s == sub.id)
      .map(|(_, d)| *d)
      .collect();
    assert_eq!(remote_days, vec![1, 2, 3, 4, 5]);
  }

  #[tokio::test]
  async fn offline_catch_up_defers_reconciliation() {
    let (mut engine, _) = engine(false);
    let sub = engine
      .confirm_start_plan_with_catch_up("chronological", 3)
      .await
      .unwrap();
    assert!(is_local_id(&sub.id));
    assert_eq!(engine.remote().state().upserts, 0);

    // Deferred while the gate is closed.
    let report = engine.sign_in(identity()).await.unwrap();
    assert!(report.deferred);
  }

  #[tokio::test]
  async fn sign_in_pushes_local_plan_then_days() {
    let (mut engine, flag) = engine(false);
    engine
      .confirm_start_plan_with_catch_up("chronological", 3)
      .await
      .unwrap();

    flag.store(true, Ordering::SeqCst);
    engine.connectivity.on_transport_signal(true);
    let report = engine.sign_in(identity()).await.unwrap();
    assert_eq!(report.pushed.synced_count, 4);
    assert!(report.pushed.failures.is_empty());
    assert_eq!(report.pulled, 4);
    // Subscription create plus one batched upsert for all three days.
    assert_eq!(engine.remote().state().creates, 1);
    assert_eq!(engine.remote().state().upserts, 1);

    let sub_id = engine.collections().subscriptions[0].id.clone();
    assert!(!is_local_id(&sub_id));
    assert_eq!(engine.collections().completed_days(&sub_id), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn toggle_day_writes_remote_when_online() {
    let (mut engine, _) = engine(true);
    engine.sign_in(identity()).await.unwrap();
    let sub = engine
      .confirm_start_plan_with_catch_up("gospels", 0)
      .await
      .unwrap();

    assert!(engine.toggle_day(&sub.id, 4).await.unwrap());
    assert!(engine.remote().state().days.contains(&(sub.id.clone(), 4)));

    assert!(!engine.toggle_day(&sub.id, 4).await.unwrap());
    assert!(engine.remote().state().days.is_empty());
    assert!(engine.collections().completed_days(&sub.id).is_empty());
  }

  #[tokio::test]
  async fn toggle_day_offline_is_local_only() {
    let (mut engine, _) = engine(true);
    engine.sign_in(identity()).await.unwrap();
    let sub = engine
      .confirm_start_plan_with_catch_up("gospels", 0)
      .await
      .unwrap();

    engine.connectivity.set_forced_offline(true).unwrap();
    assert!(engine.toggle_day(&sub.id, 2).await.unwrap());
    assert!(engine.remote().state().days.is_empty());
    assert_eq!(engine.collections().unsynced(EntityKind::Progress).len(), 1);

    engine.connectivity.set_forced_offline(false).unwrap();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.pushed.synced_count, 1);
    assert!(engine.remote().state().days.contains(&(sub.id.clone(), 2)));
  }

  #[tokio::test]
  async fn toggle_unknown_subscription_fails() {
    let (mut engine, _) = engine(true);
    let err = engine.toggle_day("nope", 1).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
  }

  #[tokio::test]
  async fn delete_removes_remote_copy_of_synced_entity() {
    let (mut engine, _) = engine(true);
    let local_only = engine.create_local(note("draft")).unwrap();
    engine.sign_in(identity()).await.unwrap();
    let remote = engine.create(note("kept")).await.unwrap();
    assert!(remote.is_synced());

    let pushed_id = engine.collections().notes[0].id.clone();
    assert_ne!(pushed_id, local_only.id());

    engine.delete(EntityKind::Note, &remote.id()).await.unwrap();
    assert_eq!(engine.remote().state().deletes, 1);
    assert!(engine.collections().get(EntityKind::Note, &remote.id()).is_none());
  }

  #[tokio::test]
  async fn sign_out_restores_device_view() {
    let (mut engine, _) = engine(true);
    engine.create_local(note("mine")).unwrap();
    engine.sign_in(identity()).await.unwrap();
    engine.create(note("remote only")).await.unwrap();
    assert_eq!(engine.collections().notes.len(), 2);

    engine.sign_out().unwrap();
    assert!(!engine.is_signed_in());
    let notes = &engine.collections().notes;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "mine");
    assert!(notes[0].synced);
  }

  #[tokio::test]
  async fn remote_operations_require_a_session() {
    let (mut engine, _) = engine(true);
    assert!(matches!(
      engine.push_sync().await,
      Err(SyncError::NotAuthenticated)
    ));
    assert!(matches!(
      engine.create_remote(note("x")).await,
      Err(SyncError::NotAuthenticated)
    ));
  }

  #[tokio::test]
  async fn forced_offline_delete_is_queued_until_next_push() {
    let (mut engine, _) = engine(true);
    engine.sign_in(identity()).await.unwrap();
    let synced = engine.create(note("gone soon")).await.unwrap();
    assert!(synced.is_synced());

    engine.connectivity.set_forced_offline(true).unwrap();
    engine.delete(EntityKind::Note, &synced.id()).await.unwrap();
    assert_eq!(engine.remote().state().deletes, 0);
    assert!(engine.collections().get(EntityKind::Note, &synced.id()).is_none());

    engine.connectivity.set_forced_offline(false).unwrap();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.pushed.deleted_count, 1);
    assert_eq!(engine.remote().state().deletes, 1);
    assert!(engine.collections().notes.is_empty());
    assert!(engine.local.pending_deletes().unwrap().is_empty());
  }

  #[tokio::test]
  async fn pull_does_not_resurrect_queued_deletes() {
    let (mut engine, _) = engine(true);
    engine.sign_in(identity()).await.unwrap();
    let synced = engine.create(note("gone")).await.unwrap();

    engine.connectivity.set_forced_offline(true).unwrap();
    engine.delete(EntityKind::Note, &synced.id()).await.unwrap();
    engine.connectivity.set_forced_offline(false).unwrap();

    engine.pull_sync().await.unwrap();
    assert!(engine.collections().notes.is_empty());
    assert_eq!(engine.remote().state().deletes, 0);
  }

  #[tokio::test]
  async fn offline_untoggle_of_synced_day_reaches_remote() {
    let (mut engine, _) = engine(true);
    engine.sign_in(identity()).await.unwrap();
    let sub = engine
      .confirm_start_plan_with_catch_up("gospels", 2)
      .await
      .unwrap();

    engine.connectivity.set_forced_offline(true).unwrap();
    assert!(!engine.toggle_day(&sub.id, 2).await.unwrap());
    assert!(engine.remote().state().days.contains(&(sub.id.clone(), 2)));

    engine.connectivity.set_forced_offline(false).unwrap();
    engine.sync().await.unwrap();
    assert!(!engine.remote().state().days.contains(&(sub.id.clone(), 2)));
    assert_eq!(engine.collections().completed_days(&sub.id), vec![1]);
  }
}
