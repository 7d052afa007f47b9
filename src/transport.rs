//! Outbound HTTP seam used by the interceptor.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::future::Future;
use url::Url;

use crate::error::FetchError;

/// A response as received from the wire, before any caching decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl RawResponse {
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Issues GET requests. Only transport failures are errors; any received status is `Ok`.
pub trait Transport: Send + Sync {
  fn get(&self, url: &Url) -> impl Future<Output = Result<RawResponse, FetchError>> + Send;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("versecache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

impl Transport for HttpTransport {
  async fn get(&self, url: &Url) -> Result<RawResponse, FetchError> {
    let network = |e: reqwest::Error| FetchError::Network {
      url: url.to_string(),
      message: e.to_string(),
    };

    let response = self.client.get(url.clone()).send().await.map_err(network)?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(network)?.to_vec();

    Ok(RawResponse {
      status,
      headers,
      body,
    })
  }
}
