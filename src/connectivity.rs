//! Connectivity state machine gating opportunistic network use.
//!
//! Transport signals only move the state while the user has not forced offline mode.
//! Forcing is persisted as a preference; releasing it re-samples the transport.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::StructuredStore;

const FORCED_OFFLINE_PREF: &str = "forced_offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
  Online,
  OfflineDetected,
  OfflineForced,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  TransportUp,
  TransportDown,
  Force,
  /// Carries a fresh sample of the transport.
  Release { transport_online: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Machine {
  forced: bool,
  transport_online: bool,
}

impl Machine {
  fn state(&self) -> ConnectivityState {
    match (self.forced, self.transport_online) {
      (true, _) => ConnectivityState::OfflineForced,
      (false, true) => ConnectivityState::Online,
      (false, false) => ConnectivityState::OfflineDetected,
    }
  }

  fn apply(self, event: ConnectivityEvent) -> Self {
    match event {
      // The transport flag is tracked while forced, but the state stays forced.
      ConnectivityEvent::TransportUp => Self {
        transport_online: true,
        ..self
      },
      ConnectivityEvent::TransportDown => Self {
        transport_online: false,
        ..self
      },
      ConnectivityEvent::Force => Self {
        forced: true,
        ..self
      },
      ConnectivityEvent::Release { transport_online } => Self {
        forced: false,
        transport_online,
      },
    }
  }
}

/// Samples whether the transport is currently usable.
pub trait TransportStatus: Send + Sync {
  fn is_online(&self) -> bool;
}

impl<F> TransportStatus for F
where
  F: Fn() -> bool + Send + Sync,
{
  fn is_online(&self) -> bool {
    self()
  }
}

/// Reachability of the service host, sampled asynchronously.
///
/// `refresh` makes a TCP connection attempt on the runtime; the gate only reads the
/// last outcome, so sampling never blocks.
#[derive(Debug, Clone)]
pub struct HostReachability {
  host: String,
  port: u16,
  timeout: Duration,
  reachable: Arc<AtomicBool>,
}

impl HostReachability {
  pub fn for_url(url: &url::Url) -> Option<Self> {
    Some(Self {
      host: url.host_str()?.to_string(),
      port: url.port_or_known_default()?,
      timeout: Duration::from_millis(750),
      reachable: Arc::new(AtomicBool::new(true)),
    })
  }

  /// Try to connect to the host and remember whether it worked.
  pub async fn refresh(&self) -> bool {
    let connect = TcpStream::connect((self.host.as_str(), self.port));
    let online = matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)));
    self.reachable.store(online, Ordering::SeqCst);
    debug!(host = %self.host, port = self.port, online, "reachability sampled");
    online
  }
}

impl TransportStatus for HostReachability {
  fn is_online(&self) -> bool {
    self.reachable.load(Ordering::SeqCst)
  }
}

/// Shared connectivity gate.
pub struct Connectivity {
  machine: Mutex<Machine>,
  reachability: Box<dyn TransportStatus>,
  prefs: Option<Arc<StructuredStore>>,
  tx: watch::Sender<ConnectivityState>,
}

impl Connectivity {
  /// Gate without persisted preferences, starting unforced.
  pub fn new(reachability: impl TransportStatus + 'static) -> Self {
    Self::build(false, reachability, None)
  }

  /// Gate whose forced-offline flag is loaded from and saved to `prefs`.
  pub fn with_preferences(
    prefs: Arc<StructuredStore>,
    reachability: impl TransportStatus + 'static,
  ) -> Result<Self, StoreError> {
    let forced = prefs.get_preference(FORCED_OFFLINE_PREF)?.as_deref() == Some("true");
    Ok(Self::build(forced, reachability, Some(prefs)))
  }

  fn build(
    forced: bool,
    reachability: impl TransportStatus + 'static,
    prefs: Option<Arc<StructuredStore>>,
  ) -> Self {
    let machine = Machine {
      forced,
      transport_online: reachability.is_online(),
    };
    let (tx, _) = watch::channel(machine.state());
    Self {
      machine: Mutex::new(machine),
      reachability: Box::new(reachability),
      prefs,
      tx,
    }
  }

  pub fn state(&self) -> ConnectivityState {
    self.lock().state()
  }

  pub fn is_forced_offline(&self) -> bool {
    self.lock().forced
  }

  /// `!forced && transport_online`.
  pub fn can_use_network(&self) -> bool {
    self.state() == ConnectivityState::Online
  }

  /// Feed a network-level online/offline signal.
  pub fn on_transport_signal(&self, online: bool) -> ConnectivityState {
    let event = if online {
      ConnectivityEvent::TransportUp
    } else {
      ConnectivityEvent::TransportDown
    };
    self.dispatch(event)
  }

  /// Toggle forced-offline mode and persist the preference.
  pub fn set_forced_offline(&self, forced: bool) -> Result<ConnectivityState, StoreError> {
    if let Some(prefs) = &self.prefs {
      prefs.set_preference(FORCED_OFFLINE_PREF, if forced { "true" } else { "false" })?;
    }
    let event = if forced {
      ConnectivityEvent::Force
    } else {
      ConnectivityEvent::Release {
        transport_online: self.reachability.is_online(),
      }
    };
    let state = self.dispatch(event);
    info!(forced, ?state, "forced-offline preference changed");
    Ok(state)
  }

  /// Observe state changes.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.tx.subscribe()
  }

  fn dispatch(&self, event: ConnectivityEvent) -> ConnectivityState {
    let state = {
      let mut machine = self.lock();
      *machine = machine.apply(event);
      machine.state()
    };
    debug!(?event, ?state, "connectivity event");
    self.tx.send_if_modified(|current| {
      let changed = *current != state;
      *current = state;
      changed
    });
    state
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Machine> {
    // The machine is plain data; a panic mid-update cannot leave it torn.
    self.machine.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;

  fn switchable(initial: bool) -> (Arc<AtomicBool>, impl TransportStatus) {
    let flag = Arc::new(AtomicBool::new(initial));
    let shared = Arc::clone(&flag);
    (flag, move || shared.load(Ordering::SeqCst))
  }

  #[test]
  fn transport_signals_move_between_online_and_detected() {
    let gate = Connectivity::new(|| true);
    assert_eq!(gate.state(), ConnectivityState::Online);

    assert_eq!(
      gate.on_transport_signal(false),
      ConnectivityState::OfflineDetected
    );
    assert!(!gate.can_use_network());
    assert_eq!(gate.on_transport_signal(true), ConnectivityState::Online);
    assert!(gate.can_use_network());
  }

  #[test]
  fn forcing_suppresses_transport_signals() {
    let gate = Connectivity::new(|| true);
    gate.set_forced_offline(true).unwrap();

    assert_eq!(
      gate.on_transport_signal(true),
      ConnectivityState::OfflineForced
    );
    assert_eq!(
      gate.on_transport_signal(false),
      ConnectivityState::OfflineForced
    );
    assert!(!gate.can_use_network());
  }

  #[test]
  fn releasing_resamples_the_transport() {
    let (flag, reachability) = switchable(true);
    let gate = Connectivity::new(reachability);
    gate.set_forced_offline(true).unwrap();

    flag.store(false, Ordering::SeqCst);
    assert_eq!(
      gate.set_forced_offline(false).unwrap(),
      ConnectivityState::OfflineDetected
    );

    gate.set_forced_offline(true).unwrap();
    flag.store(true, Ordering::SeqCst);
    assert_eq!(
      gate.set_forced_offline(false).unwrap(),
      ConnectivityState::Online
    );
  }

  #[test]
  fn forced_preference_is_persisted() {
    let store = Arc::new(StructuredStore::open_in_memory().unwrap());
    let gate = Connectivity::with_preferences(Arc::clone(&store), || true).unwrap();
    gate.set_forced_offline(true).unwrap();

    let reloaded = Connectivity::with_preferences(store, || true).unwrap();
    assert_eq!(reloaded.state(), ConnectivityState::OfflineForced);
    assert!(reloaded.is_forced_offline());
  }

  #[test]
  fn subscribers_see_changes() {
    let gate = Connectivity::new(|| true);
    let mut rx = gate.subscribe();
    gate.on_transport_signal(false);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), ConnectivityState::OfflineDetected);

    // Same state again is not a change.
    gate.on_transport_signal(false);
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn reachability_follows_refresh() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = url::Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let reachability = HostReachability::for_url(&url).unwrap();

    assert!(reachability.refresh().await);
    assert!(reachability.is_online());

    drop(listener);
    assert!(!reachability.refresh().await);
    let gate = Connectivity::new(reachability.clone());
    assert_eq!(gate.state(), ConnectivityState::OfflineDetected);
  }
}
