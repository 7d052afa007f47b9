//! Core types shared by the response cache and the interceptor.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::error::FetchError;

/// Header set on responses served from cache after a network failure.
pub const OFFLINE_CACHE_HEADER: &str = "x-offline-cache";

/// Path prefixes of API endpoints whose responses are cached and bridged.
pub const CACHEABLE_API_PREFIXES: &[&str] = &[
  "/api/passage/",
  "/api/interlinear/",
  "/api/verse/",
  "/api/word/",
  "/api/word-alignment",
  "/api/offline/",
];

/// How a request is handled, decided purely by URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Cache-first: app shell, scripts, icons
  StaticAsset,
  /// Network-first, falls back to a stale cached copy
  CacheableDynamic,
  /// Network-only, never cached
  NonCacheable,
}

impl RequestClass {
  pub fn classify(path: &str) -> Self {
    if !path.starts_with("/api/") {
      return Self::StaticAsset;
    }
    if CACHEABLE_API_PREFIXES.iter().any(|p| path.starts_with(p)) {
      Self::CacheableDynamic
    } else {
      Self::NonCacheable
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
  /// Fresh from the network
  Network,
  /// Cache hit served without touching the network
  Cache,
  /// Network failed, cached copy served with the staleness marker
  StaleCache,
  /// Network failed, the offline fallback document was served instead
  OfflineFallback,
  /// Network failed and nothing was cached; a 503 was synthesized
  Offline,
}

/// A response as handed back to the caller.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub origin: ResponseOrigin,
  pub url: String,
}

impl InterceptedResponse {
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Served from cache because the network failed.
  pub fn is_stale(&self) -> bool {
    self.origin == ResponseOrigin::StaleCache
  }

  pub fn is_offline(&self) -> bool {
    self.origin == ResponseOrigin::Offline
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }

  /// Turn a synthesized offline response or a non-ok status into an error.
  pub fn error_for_status(self) -> Result<Self, FetchError> {
    if self.is_offline() {
      return Err(FetchError::Offline { url: self.url });
    }
    if !self.is_ok() {
      return Err(FetchError::Http {
        status: self.status,
        url: self.url,
      });
    }
    Ok(self)
  }

  /// The 503 returned when neither network nor cache can serve `url`.
  pub fn offline_error(url: &str, detail: &str) -> Self {
    let body = serde_json::json!({
      "error": "offline",
      "detail": detail,
      "offline": true,
    });
    Self {
      status: 503,
      headers: BTreeMap::from([(
        "content-type".to_string(),
        "application/json".to_string(),
      )]),
      body: body.to_string().into_bytes(),
      origin: ResponseOrigin::Offline,
      url: url.to_string(),
    }
  }
}
