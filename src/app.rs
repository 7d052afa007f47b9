use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use versecache::cache::{CacheCoordinator, NoopStorage, ResponseStorage, SqliteResponseCache};
use versecache::config::Config;
use versecache::connectivity::{Connectivity, ConnectivityState, HostReachability};
use versecache::db::{self, RESPONSES_DB, STORE_DB, USERDATA_DB};
use versecache::download::{DownloadOrchestrator, DownloadSelection, DownloadSummary};
use versecache::store::StructuredStore;
use versecache::sync::{
  EntityBackend, Identity, LocalBackend, RestRemote, SyncEngine, SyncReport,
};
use versecache::transport::HttpTransport;

/// Everything a command needs, opened once per invocation.
pub struct App {
  config: Config,
  data_dir: PathBuf,
  store: Arc<StructuredStore>,
  connectivity: Arc<Connectivity>,
  reachability: Option<HostReachability>,
  coordinator: Arc<CacheCoordinator<HttpTransport>>,
}

impl App {
  pub async fn new(config: Config, data_dir: PathBuf) -> Result<Self> {
    std::fs::create_dir_all(&data_dir)
      .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

    let base_url = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", config.api.base_url, e))?;

    let store = Arc::new(StructuredStore::open(&db::path_in(&data_dir, STORE_DB))?);

    let reachability = HostReachability::for_url(&base_url);
    let connectivity = match &reachability {
      Some(reachability) => Connectivity::with_preferences(store.clone(), reachability.clone())?,
      None => Connectivity::with_preferences(store.clone(), || true)?,
    };
    // No reachability check while the user keeps the app offline.
    if let (false, Some(reachability)) = (connectivity.is_forced_offline(), &reachability) {
      connectivity.on_transport_signal(reachability.refresh().await);
    }

    let responses: Arc<dyn ResponseStorage> = if config.cache.enabled {
      Arc::new(SqliteResponseCache::open(&db::path_in(&data_dir, RESPONSES_DB))?)
    } else {
      Arc::new(NoopStorage)
    };

    let coordinator = CacheCoordinator::new(
      HttpTransport::new()?,
      responses,
      store.clone(),
      base_url,
      config.cache.max_responses,
    );

    Ok(Self {
      config,
      data_dir,
      store,
      connectivity: Arc::new(connectivity),
      reachability,
      coordinator: Arc::new(coordinator),
    })
  }

  pub fn store(&self) -> &StructuredStore {
    &self.store
  }

  pub fn coordinator(&self) -> &CacheCoordinator<HttpTransport> {
    &self.coordinator
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub async fn download(&self, selection: &DownloadSelection) -> Result<DownloadSummary> {
    let orchestrator = DownloadOrchestrator::new(
      self.coordinator.clone(),
      self.connectivity.clone(),
      self.config.download.clone(),
    );

    let mut progress = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
      while progress.changed().await.is_ok() {
        let snapshot = progress.borrow_and_update().clone();
        eprint!(
          "\r{:>5.1}% {:<24} fetched {} skipped {} failed {}",
          snapshot.fraction * 100.0,
          snapshot.task.unwrap_or_default(),
          snapshot.fetched,
          snapshot.skipped,
          snapshot.failed
        );
      }
      eprintln!();
    });

    let summary = orchestrator.run(selection).await;
    drop(orchestrator);
    if let Err(e) = reporter.await {
      warn!(error = %e, "progress reporter stopped");
    }
    Ok(summary?)
  }

  /// Releasing forced-offline mode samples the host first.
  pub async fn set_offline(&self, forced: bool) -> Result<ConnectivityState> {
    if let (false, Some(reachability)) = (forced, &self.reachability) {
      reachability.refresh().await;
    }
    Ok(self.connectivity.set_forced_offline(forced)?)
  }

  /// Engine over the device's scratch storage, with the configured remote attached when
  /// there is one. The session starts in guest mode.
  pub fn sync_engine(&self) -> Result<SyncEngine<Option<RestRemote>>> {
    let local = LocalBackend::open(&db::path_in(&self.data_dir, USERDATA_DB))?;
    let remote = match &self.config.remote {
      Some(remote) => Some(RestRemote::new(&remote.url, Config::get_remote_api_key()?)?),
      None => None,
    };
    Ok(SyncEngine::new(local, remote, self.connectivity.clone())?)
  }

  /// Sign in with the configured identity, if any. A failed initial sync is logged and
  /// the session kept, so local edits still work.
  pub async fn sign_in<R: EntityBackend>(
    &self,
    engine: &mut SyncEngine<R>,
  ) -> Option<SyncReport> {
    let identity = self.identity()?;
    match engine.sign_in(identity).await {
      Ok(report) => {
        if report.deferred {
          info!("working offline, changes stay on this device until the next sync");
        }
        Some(report)
      }
      Err(e) => {
        warn!(error = %e, "initial sync failed");
        None
      }
    }
  }

  /// The configured user with a token from the environment, if both are present.
  pub fn identity(&self) -> Option<Identity> {
    let remote = self.config.remote.as_ref()?;
    match Config::get_remote_token() {
      Ok(access_token) => Some(Identity {
        user_id: remote.user_id.clone(),
        access_token,
      }),
      Err(e) => {
        warn!("{e}");
        None
      }
    }
  }
}

/// Print a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let text = serde_json::to_string_pretty(value)?;
  println!("{text}");
  Ok(())
}
