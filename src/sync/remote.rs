//! Entity storage interface and the remote REST implementation.

use serde_json::{Map, Value};
use std::future::Future;
use tracing::debug;
use url::Url;

use super::entities::{EntityKind, Identity, ProgressDay, UserEntity};
use crate::error::SyncError;

/// Storage for user entities, either the device scratch space or the remote authority.
pub trait EntityBackend: Send + Sync {
  /// Every entity of `kind` owned by `owner`.
  fn list(
    &self,
    kind: EntityKind,
    owner: &Identity,
  ) -> impl Future<Output = Result<Vec<UserEntity>, SyncError>> + Send;

  /// Store a new entity; the returned copy carries the id issued by the backend.
  fn create(
    &self,
    entity: &UserEntity,
    owner: &Identity,
  ) -> impl Future<Output = Result<UserEntity, SyncError>> + Send;

  fn delete(
    &self,
    kind: EntityKind,
    id: &str,
    owner: &Identity,
  ) -> impl Future<Output = Result<(), SyncError>> + Send;

  /// Upsert completed days keyed by (subscription_id, day), in one round trip.
  fn upsert_days(
    &self,
    days: &[ProgressDay],
    owner: &Identity,
  ) -> impl Future<Output = Result<(), SyncError>> + Send;

  fn delete_day(
    &self,
    subscription_id: &str,
    day: u32,
    owner: &Identity,
  ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Fields holding ids issued by the remote, which may arrive as numbers.
const ID_FIELDS: &[&str] = &["id", "note_id", "tag_id", "subscription_id"];

/// PostgREST-style remote store under `<url>/rest/v1/`.
#[derive(Clone)]
pub struct RestRemote {
  client: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestRemote {
  pub fn new(url: &str, api_key: String) -> color_eyre::Result<Self> {
    let mut base = Url::parse(url)?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    let base = base.join("rest/v1/")?;
    let client = reqwest::Client::builder()
      .user_agent(concat!("versecache/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      client,
      base,
      api_key,
    })
  }

  fn table_url(&self, kind: EntityKind, query: &[(&str, String)]) -> Result<Url, SyncError> {
    let mut url = self
      .base
      .join(kind.table())
      .map_err(|e| SyncError::Transport(e.to_string()))?;
    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
  }

  fn request(&self, method: reqwest::Method, url: Url, owner: &Identity) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .header("apikey", &self.api_key)
      .bearer_auth(&owner.access_token)
  }

  async fn send(
    &self,
    kind: EntityKind,
    builder: reqwest::RequestBuilder,
  ) -> Result<reqwest::Response, SyncError> {
    let response = builder
      .send()
      .await
      .map_err(|e| SyncError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(SyncError::Rejected {
        kind: kind.as_str(),
        status: status.as_u16(),
        message,
      });
    }
    Ok(response)
  }

  async fn rows(kind: EntityKind, response: reqwest::Response) -> Result<Vec<Value>, SyncError> {
    response.json().await.map_err(|e| SyncError::Decode {
      kind: kind.as_str(),
      message: e.to_string(),
    })
  }
}

impl EntityBackend for RestRemote {
  async fn list(&self, kind: EntityKind, owner: &Identity) -> Result<Vec<UserEntity>, SyncError> {
    let mut query = vec![
      ("select", "*".to_string()),
      ("user_id", format!("eq.{}", owner.user_id)),
    ];
    if kind == EntityKind::Note {
      query.push(("order", "created_at.desc".to_string()));
    }
    let url = self.table_url(kind, &query)?;
    let response = self
      .send(kind, self.request(reqwest::Method::GET, url, owner))
      .await?;

    let rows = Self::rows(kind, response).await?;
    debug!(%kind, count = rows.len(), "pulled remote rows");
    rows.into_iter().map(|row| from_row(kind, row)).collect()
  }

  async fn create(&self, entity: &UserEntity, owner: &Identity) -> Result<UserEntity, SyncError> {
    let kind = entity.kind();
    let url = self.table_url(kind, &[])?;
    let builder = self
      .request(reqwest::Method::POST, url, owner)
      .header("Prefer", "return=representation")
      .json(&to_row(entity, owner)?);
    let response = self.send(kind, builder).await?;

    let row = Self::rows(kind, response)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| SyncError::Decode {
        kind: kind.as_str(),
        message: "empty insert response".into(),
      })?;
    from_row(kind, row)
  }

  async fn delete(&self, kind: EntityKind, id: &str, owner: &Identity) -> Result<(), SyncError> {
    let url = self.table_url(
      kind,
      &[
        ("id", format!("eq.{id}")),
        ("user_id", format!("eq.{}", owner.user_id)),
      ],
    )?;
    self
      .send(kind, self.request(reqwest::Method::DELETE, url, owner))
      .await?;
    Ok(())
  }

  async fn upsert_days(&self, days: &[ProgressDay], owner: &Identity) -> Result<(), SyncError> {
    if days.is_empty() {
      return Ok(());
    }
    let kind = EntityKind::Progress;
    let body: Vec<Value> = days
      .iter()
      .map(|d| {
        serde_json::json!({
          "subscription_id": d.subscription_id,
          "day": d.day,
          "user_id": owner.user_id,
        })
      })
      .collect();
    let url = self.table_url(kind, &[("on_conflict", "subscription_id,day".to_string())])?;
    let builder = self
      .request(reqwest::Method::POST, url, owner)
      .header("Prefer", "resolution=merge-duplicates,return=minimal")
      .json(&body);
    self.send(kind, builder).await?;
    Ok(())
  }

  async fn delete_day(
    &self,
    subscription_id: &str,
    day: u32,
    owner: &Identity,
  ) -> Result<(), SyncError> {
    let kind = EntityKind::Progress;
    let url = self.table_url(
      kind,
      &[
        ("subscription_id", format!("eq.{subscription_id}")),
        ("day", format!("eq.{day}")),
        ("user_id", format!("eq.{}", owner.user_id)),
      ],
    )?;
    self
      .send(kind, self.request(reqwest::Method::DELETE, url, owner))
      .await?;
    Ok(())
  }
}

/// Insert payload: entity fields minus the local id and flag, plus the owner.
fn to_row(entity: &UserEntity, owner: &Identity) -> Result<Value, SyncError> {
  let kind = entity.kind();
  let mut row = match entity.to_json() {
    Ok(Value::Object(map)) => map,
    Ok(_) | Err(_) => {
      return Err(SyncError::Decode {
        kind: kind.as_str(),
        message: "entity does not serialize to an object".into(),
      })
    }
  };
  row.remove("id");
  row.remove("synced");
  row.insert("user_id".into(), Value::String(owner.user_id.clone()));
  Ok(Value::Object(row))
}

/// Decode a remote row into an entity flagged as synced.
fn from_row(kind: EntityKind, row: Value) -> Result<UserEntity, SyncError> {
  let decode = |message: String| SyncError::Decode {
    kind: kind.as_str(),
    message,
  };
  let Value::Object(mut map) = row else {
    return Err(decode("row is not an object".into()));
  };
  normalize_ids(&mut map);
  map.insert("synced".into(), Value::Bool(true));
  UserEntity::from_json(kind, Value::Object(map)).map_err(|e| decode(e.to_string()))
}

fn normalize_ids(map: &mut Map<String, Value>) {
  for field in ID_FIELDS {
    if let Some(Value::Number(n)) = map.get(*field) {
      let id = n.to_string();
      map.insert(field.to_string(), Value::String(id));
    }
  }
}

/// A missing remote refuses everything, leaving the engine in guest mode.
impl<B: EntityBackend> EntityBackend for Option<B> {
  async fn list(&self, kind: EntityKind, owner: &Identity) -> Result<Vec<UserEntity>, SyncError> {
    match self {
      Some(backend) => backend.list(kind, owner).await,
      None => Err(SyncError::NotAuthenticated),
    }
  }

  async fn create(&self, entity: &UserEntity, owner: &Identity) -> Result<UserEntity, SyncError> {
    match self {
      Some(backend) => backend.create(entity, owner).await,
      None => Err(SyncError::NotAuthenticated),
    }
  }

  async fn delete(&self, kind: EntityKind, id: &str, owner: &Identity) -> Result<(), SyncError> {
    match self {
      Some(backend) => backend.delete(kind, id, owner).await,
      None => Err(SyncError::NotAuthenticated),
    }
  }

  async fn upsert_days(&self, days: &[ProgressDay], owner: &Identity) -> Result<(), SyncError> {
    match self {
      Some(backend) => backend.upsert_days(days, owner).await,
      None => Err(SyncError::NotAuthenticated),
    }
  }

  async fn delete_day(
    &self,
    subscription_id: &str,
    day: u32,
    owner: &Identity,
  ) -> Result<(), SyncError> {
    match self {
      Some(backend) => backend.delete_day(subscription_id, day, owner).await,
      None => Err(SyncError::NotAuthenticated),
    }
  }
}
