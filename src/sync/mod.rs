//! User entity reconciliation: notes, tags, note-tag links, plan subscriptions and
//! plan progress days.
//!
//! Entities are created on the device with a `local-` id and pushed to the remote on
//! sign-in, where they receive their durable id.

mod engine;
mod entities;
mod local;
mod remote;

pub use engine::{PushFailure, PushReport, SyncEngine, SyncReport};
pub use entities::{
  is_local_id, local_id, Collections, EntityKind, Identity, Note, NoteDraft, NoteTag,
  PlanSubscription, ProgressDay, Tag, TagDraft, UserEntity, LOCAL_ID_PREFIX,
};
pub use local::LocalBackend;
pub use remote::{EntityBackend, RestRemote};
