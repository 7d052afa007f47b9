//! Request interceptor that orchestrates caching strategy with network fetching.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::bridge;
use super::responses::{request_key, CachedResponse, ResponseStorage};
use super::traits::{InterceptedResponse, RequestClass, ResponseOrigin, OFFLINE_CACHE_HEADER};
use crate::error::FetchError;
use crate::store::StructuredStore;
use crate::transport::{RawResponse, Transport};

/// Cache statistics for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResponseCacheStats {
  pub count: usize,
  /// Oldest cached URLs, at most 20
  pub urls: Vec<String>,
}

/// Sits in front of every outbound GET.
///
/// Owns both cache tiers: raw responses go to the response cache, and decodable
/// payloads of cacheable API endpoints are written straight into the structured store.
pub struct CacheCoordinator<T: Transport> {
  transport: T,
  responses: Arc<dyn ResponseStorage>,
  store: Arc<StructuredStore>,
  base_url: Url,
  max_responses: usize,
}

impl<T: Transport> CacheCoordinator<T> {
  pub fn new(
    transport: T,
    responses: Arc<dyn ResponseStorage>,
    store: Arc<StructuredStore>,
    base_url: Url,
    max_responses: usize,
  ) -> Self {
    Self {
      transport,
      responses,
      store,
      base_url,
      max_responses,
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn store(&self) -> &Arc<StructuredStore> {
    &self.store
  }

  /// Resolve a path (or absolute URL) against the service origin.
  pub fn resolve(&self, path: &str) -> Result<Url, FetchError> {
    self.base_url.join(path).map_err(|e| FetchError::Network {
      url: path.to_string(),
      message: format!("invalid URL: {e}"),
    })
  }

  /// Percent-encoded absolute path built from raw segments.
  pub fn api_path(&self, segments: &[&str]) -> String {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.clear().extend(segments);
    }
    url.path().to_string()
  }

  /// Serve a GET for `path` according to its request class.
  ///
  /// Transport failures never surface as errors here; they turn into a cached copy,
  /// the offline fallback document, or a synthesized 503.
  pub async fn request(&self, path: &str) -> Result<InterceptedResponse, FetchError> {
    let url = self.resolve(path)?;
    let class = RequestClass::classify(url.path());
    debug!(url = %url, ?class, "intercepting request");

    let response = match class {
      RequestClass::StaticAsset => self.cache_first(&url).await,
      RequestClass::CacheableDynamic => self.network_first(&url).await,
      RequestClass::NonCacheable => self.network_only(&url).await,
    };
    Ok(response)
  }

  /// Cache-first strategy for static assets.
  async fn cache_first(&self, url: &Url) -> InterceptedResponse {
    let key = request_key(url);
    if let Some(cached) = self.lookup(&key) {
      return from_cache(cached, ResponseOrigin::Cache);
    }

    match self.transport.get(url).await {
      Ok(raw) => {
        if raw.is_ok() {
          self.remember(url, &key, &raw);
        }
        from_network(url, raw)
      }
      Err(e) => {
        warn!(url = %url, error = %e, "static asset fetch failed");
        self.offline_fallback(url)
      }
    }
  }

  /// Network-first strategy with bridging into the structured store.
  async fn network_first(&self, url: &Url) -> InterceptedResponse {
    let key = request_key(url);
    match self.transport.get(url).await {
      Ok(raw) => {
        if raw.is_ok() {
          self.remember(url, &key, &raw);
          self.bridge(url, &raw.body);
        }
        from_network(url, raw)
      }
      Err(e) => {
        info!(url = %url, error = %e, "network failed, trying response cache");
        match self.lookup(&key) {
          Some(cached) => {
            let mut response = from_cache(cached, ResponseOrigin::StaleCache);
            response
              .headers
              .insert(OFFLINE_CACHE_HEADER.to_string(), "true".to_string());
            response
          }
          None => InterceptedResponse::offline_error(
            url.as_str(),
            "You are offline and this content is not cached.",
          ),
        }
      }
    }
  }

  /// Network-only strategy, no caching in either direction.
  async fn network_only(&self, url: &Url) -> InterceptedResponse {
    match self.transport.get(url).await {
      Ok(raw) => from_network(url, raw),
      Err(e) => {
        info!(url = %url, error = %e, "network-only request failed");
        InterceptedResponse::offline_error(
          url.as_str(),
          "You are offline and this content is not available.",
        )
      }
    }
  }

  fn offline_fallback(&self, url: &Url) -> InterceptedResponse {
    let shell = match self.base_url.join("/") {
      Ok(shell) => shell,
      Err(_) => return InterceptedResponse::offline_error(url.as_str(), "offline"),
    };
    match self.lookup(&request_key(&shell)) {
      Some(cached) => {
        let mut response = from_cache(cached, ResponseOrigin::OfflineFallback);
        response.url = url.to_string();
        response
      }
      None => InterceptedResponse::offline_error(
        url.as_str(),
        "You are offline and this content is not available.",
      ),
    }
  }

  fn lookup(&self, key: &str) -> Option<CachedResponse> {
    match self.responses.get(key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(error = %e, "response cache lookup failed");
        None
      }
    }
  }

  fn remember(&self, url: &Url, key: &str, raw: &RawResponse) {
    let entry = CachedResponse {
      request_key: key.to_string(),
      url: url.to_string(),
      status: raw.status,
      headers: raw.headers.clone(),
      body: raw.body.clone(),
      cached_at: Utc::now(),
    };
    match self.responses.insert(&entry, self.max_responses) {
      Ok(0) => {}
      Ok(evicted) => debug!(evicted, "response cache trimmed"),
      Err(e) => warn!(url = %url, error = %e, "failed to cache response"),
    }
  }

  fn bridge(&self, url: &Url, body: &[u8]) {
    let Some(message) = bridge::decode(url, body) else {
      return;
    };
    match message.apply(&self.store) {
      Ok(meta) => debug!(scope = %meta.scope_key, count = meta.count, "bridged into store"),
      Err(e) => warn!(url = %url, error = %e, "failed to bridge response into store"),
    }
  }

  /// Fetch the chapter's passage, interlinear and commentary through the interceptor.
  /// Failures are logged and skipped. Returns how many requests succeeded.
  pub async fn prefetch_chapter(&self, book: &str, chapter: u32, translation: &str) -> usize {
    let passage = self.api_path(&["api", "passage", &format!("{book} {chapter}")]);
    let urls = [
      format!("{passage}?translation={translation}"),
      format!("{passage}/interlinear?translation={translation}"),
      format!("{passage}/commentary"),
    ];

    let mut fetched = 0;
    for path in urls {
      match self.request(&path).await {
        Ok(resp) if resp.origin == ResponseOrigin::Network && resp.is_ok() => fetched += 1,
        Ok(resp) => warn!(path = %path, status = resp.status, origin = ?resp.origin, "prefetch skipped"),
        Err(e) => warn!(path = %path, error = %e, "prefetch failed"),
      }
    }
    fetched
  }

  pub fn response_stats(&self) -> ResponseCacheStats {
    ResponseCacheStats {
      count: self.responses.len().unwrap_or_else(|e| {
        warn!(error = %e, "failed to count cached responses");
        0
      }),
      urls: self.responses.urls(20).unwrap_or_default(),
    }
  }

  pub fn clear_responses(&self) -> Result<(), crate::error::StoreError> {
    self.responses.clear()
  }
}

fn from_network(url: &Url, raw: RawResponse) -> InterceptedResponse {
  InterceptedResponse {
    status: raw.status,
    headers: raw.headers,
    body: raw.body,
    origin: ResponseOrigin::Network,
    url: url.to_string(),
  }
}

fn from_cache(cached: CachedResponse, origin: ResponseOrigin) -> InterceptedResponse {
  InterceptedResponse {
    status: cached.status,
    headers: cached.headers,
    body: cached.body,
    origin,
    url: cached.url,
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::cache::responses::SqliteResponseCache;
  use crate::store::Coordinates;
  use std::collections::{BTreeMap, HashMap};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  /// Transport that serves canned bodies and can be switched offline.
  #[derive(Default)]
  pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, (u16, String)>>,
    pub offline: AtomicBool,
    pub calls: Mutex<Vec<String>>,
  }

  impl ScriptedTransport {
    pub fn route(&self, path_and_query: &str, status: u16, body: &str) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(path_and_query.to_string(), (status, body.to_string()));
    }

    pub fn call_count(&self) -> usize {
      self.calls.lock().unwrap().len()
    }
  }

  impl Transport for Arc<ScriptedTransport> {
    async fn get(&self, url: &Url) -> Result<RawResponse, FetchError> {
      let mut key = url.path().to_string();
      if let Some(q) = url.query() {
        key.push('?');
        key.push_str(q);
      }
      self.calls.lock().unwrap().push(key.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(FetchError::Network {
          url: url.to_string(),
          message: "connection refused".into(),
        });
      }
      let (status, body) = self
        .routes
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or((404, r#"{"detail":"not found"}"#.to_string()));
      Ok(RawResponse {
        status,
        headers: BTreeMap::from([("content-type".into(), "application/json".into())]),
        body: body.into_bytes(),
      })
    }
  }

  pub(crate) fn coordinator(
    transport: Arc<ScriptedTransport>,
    max_responses: usize,
  ) -> CacheCoordinator<Arc<ScriptedTransport>> {
    CacheCoordinator::new(
      transport,
      Arc::new(SqliteResponseCache::open_in_memory().unwrap()),
      Arc::new(StructuredStore::open_in_memory().unwrap()),
      Url::parse("http://bible.test").unwrap(),
      max_responses,
    )
  }

  const PASSAGE: &str = r#"{"reference":"John 3","translation":"BSB","verses":[
    {"book":"John","chapter":3,"verse":1,"text":"Now there was a man"},
    {"book":"John","chapter":3,"verse":2,"text":"He came by night"}]}"#;

  #[tokio::test]
  async fn cache_first_never_refetches_a_cached_asset() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/static/js/app.js", 200, "console.log(1)");
    let coord = coordinator(Arc::clone(&transport), 10);

    let first = coord.request("/static/js/app.js").await.unwrap();
    assert_eq!(first.origin, ResponseOrigin::Network);

    for _ in 0..3 {
      let again = coord.request("/static/js/app.js").await.unwrap();
      assert_eq!(again.origin, ResponseOrigin::Cache);
      assert_eq!(again.body_text(), "console.log(1)");
    }
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn static_asset_offline_serves_app_shell() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/", 200, "<html>shell</html>");
    let coord = coordinator(Arc::clone(&transport), 10);
    coord.request("/").await.unwrap();

    transport.offline.store(true, Ordering::SeqCst);
    let resp = coord.request("/static/css/style.css").await.unwrap();
    assert_eq!(resp.origin, ResponseOrigin::OfflineFallback);
    assert_eq!(resp.body_text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn static_asset_http_error_is_not_cached() {
    let transport = Arc::new(ScriptedTransport::default());
    let coord = coordinator(Arc::clone(&transport), 10);

    let resp = coord.request("/static/missing.png").await.unwrap();
    assert_eq!(resp.status, 404);
    coord.request("/static/missing.png").await.unwrap();
    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn network_first_online_returns_fresh_payload_and_bridges() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/api/passage/John%203", 200, PASSAGE);
    let coord = coordinator(Arc::clone(&transport), 10);

    let resp = coord.request("/api/passage/John%203").await.unwrap();
    assert_eq!(resp.origin, ResponseOrigin::Network);
    assert!(!resp.is_stale());

    let scope = Coordinates::verses("BSB", "John", 3);
    assert!(coord.store().has_scope(&scope).unwrap());
    assert_eq!(coord.store().get_scope(&scope, None).unwrap().len(), 2);

    // Online requests always go to the network, even with a cached copy.
    transport.route(
      "/api/passage/John%203",
      200,
      r#"{"translation":"BSB","verses":[{"book":"John","chapter":3,"verse":1,"text":"updated"}]}"#,
    );
    let fresh = coord.request("/api/passage/John%203").await.unwrap();
    assert!(fresh.body_text().contains("updated"));
    assert_eq!(coord.store().get_scope(&scope, None).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn network_first_offline_with_cache_is_stale() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/api/passage/John%203", 200, PASSAGE);
    let coord = coordinator(Arc::clone(&transport), 10);
    coord.request("/api/passage/John%203").await.unwrap();

    transport.offline.store(true, Ordering::SeqCst);
    let resp = coord.request("/api/passage/John%203").await.unwrap();
    assert!(resp.is_stale());
    assert_eq!(resp.headers[OFFLINE_CACHE_HEADER], "true");
    assert_eq!(resp.body_text(), PASSAGE);
  }

  #[tokio::test]
  async fn network_first_offline_without_cache_is_503() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.offline.store(true, Ordering::SeqCst);
    let coord = coordinator(Arc::clone(&transport), 10);

    let resp = coord.request("/api/passage/Mark%201").await.unwrap();
    assert_eq!(resp.status, 503);
    assert!(resp.is_offline());
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["offline"], true);
  }

  #[tokio::test]
  async fn http_errors_are_returned_not_cached() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/api/passage/Nope%201", 404, r#"{"detail":"Passage not found"}"#);
    let coord = coordinator(Arc::clone(&transport), 10);

    let resp = coord.request("/api/passage/Nope%201").await.unwrap();
    assert_eq!(resp.status, 404);
    assert_eq!(resp.origin, ResponseOrigin::Network);

    transport.offline.store(true, Ordering::SeqCst);
    let resp = coord.request("/api/passage/Nope%201").await.unwrap();
    assert!(resp.is_offline());
  }

  #[tokio::test]
  async fn non_cacheable_is_network_only() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/api/search?q=love", 200, r#"{"results":[]}"#);
    let coord = coordinator(Arc::clone(&transport), 10);

    assert!(coord.request("/api/search?q=love").await.unwrap().is_ok());
    assert_eq!(coord.response_stats().count, 0);

    transport.offline.store(true, Ordering::SeqCst);
    let resp = coord.request("/api/search?q=love").await.unwrap();
    assert!(resp.is_offline());
  }

  #[tokio::test]
  async fn response_cache_stays_within_bound() {
    let transport = Arc::new(ScriptedTransport::default());
    for i in 0..12 {
      transport.route(&format!("/static/{i}.js"), 200, "x");
    }
    let coord = coordinator(Arc::clone(&transport), 5);
    for i in 0..12 {
      coord.request(&format!("/static/{i}.js")).await.unwrap();
      assert!(coord.response_stats().count <= 5);
    }
  }

  #[tokio::test]
  async fn prefetch_fetches_three_chapter_urls() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.route("/api/passage/John%203?translation=BSB", 200, PASSAGE);
    transport.route(
      "/api/passage/John%203/interlinear?translation=BSB",
      200,
      r#"{"book":"John","chapter":3,"verses":{}}"#,
    );
    let coord = coordinator(Arc::clone(&transport), 10);

    // Commentary is unrouted (404) and counted as a skip.
    assert_eq!(coord.prefetch_chapter("John", 3, "BSB").await, 2);
    assert_eq!(transport.call_count(), 3);
    assert!(coord
      .store()
      .has_scope(&Coordinates::interlinear("John", 3))
      .unwrap());
  }
}
