//! Online/offline detection that does not trust the platform's word.
//!
//! A link that reports "up" only proves an interface is configured, not that
//! the backend is reachable. [`ConnectivityProbe::check_now`] confirms with a
//! HEAD request to an always-served static resource.

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::observable::{Listeners, Observable, Subscription};

/// Timeout for the reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Read side of connectivity, shared by every component that needs it.
#[async_trait]
pub trait Connectivity: Send + Sync {
  /// Last known state. Never blocks.
  fn is_online_cached(&self) -> bool;

  /// Authoritative check. May suspend for up to the probe timeout.
  async fn check_now(&self) -> bool;
}

/// Transition reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
  Up,
  Down,
}

/// The platform's own view of whether a network link exists.
pub trait LinkStatus: Send + Sync {
  fn link_up(&self) -> bool;
}

/// Platform link state plus a stream of transition events.
pub struct PlatformLink {
  up: AtomicBool,
  events: mpsc::UnboundedSender<LinkEvent>,
}

impl PlatformLink {
  pub fn new(initially_up: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<LinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let link = Arc::new(Self {
      up: AtomicBool::new(initially_up),
      events: tx,
    });
    (link, rx)
  }

  /// Update the link state, emitting an event if it changed.
  pub fn set_up(&self, up: bool) {
    let previous = self.up.swap(up, Ordering::SeqCst);
    if previous != up {
      let event = if up { LinkEvent::Up } else { LinkEvent::Down };
      // Nobody listening just means nothing to wake up
      let _ = self.events.send(event);
    }
  }
}

impl LinkStatus for PlatformLink {
  fn link_up(&self) -> bool {
    self.up.load(Ordering::SeqCst)
  }
}

/// Authoritative connectivity detector and sole writer of the shared
/// online/offline state.
pub struct ConnectivityProbe {
  client: reqwest::Client,
  target: Url,
  timeout: Duration,
  link: Arc<dyn LinkStatus>,
  state: Observable<bool>,
  online: Listeners<()>,
}

impl ConnectivityProbe {
  pub fn new(target: Url, link: Arc<dyn LinkStatus>) -> Self {
    let initial = link.link_up();
    Self {
      client: reqwest::Client::new(),
      target,
      timeout: PROBE_TIMEOUT,
      link,
      state: Observable::new(initial),
      online: Listeners::new(),
    }
  }

  #[cfg(test)]
  pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Subscribe to the shared state. Called immediately with the current
  /// value, then on every change.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&bool) + Send + Sync + 'static,
  {
    self.state.subscribe(listener)
  }

  /// Subscribe to confirmed transitions to online.
  pub fn on_online<F>(&self, listener: F) -> Subscription
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.online.subscribe(move |_| listener())
  }

  /// React to a platform transition.
  ///
  /// Going down is taken at face value. Coming up is confirmed with a probe
  /// before online listeners hear about it.
  pub async fn handle_link_event(&self, event: LinkEvent) {
    match event {
      LinkEvent::Down => {
        self.state.set(false);
        info!("network offline, using cached data");
      }
      LinkEvent::Up => {
        if self.check_now().await {
          info!("network online");
          self.online.emit(&());
        } else {
          debug!("link up but probe failed, staying offline");
        }
      }
    }
  }

  /// Consume platform events until the sender goes away.
  pub fn watch(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LinkEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        self.handle_link_event(event).await;
      }
      debug!("link event stream closed");
    })
  }

  async fn probe(&self) -> bool {
    let request = self
      .client
      .head(self.target.clone())
      .header(CACHE_CONTROL, "no-cache")
      .timeout(self.timeout);

    match request.send().await {
      Ok(response) => {
        let ok = response.status().is_success();
        if !ok {
          debug!(status = %response.status(), "probe target answered with error");
        }
        ok
      }
      Err(e) => {
        debug!(error = %e, "probe request failed");
        false
      }
    }
  }
}

#[async_trait]
impl Connectivity for ConnectivityProbe {
  fn is_online_cached(&self) -> bool {
    self.state.get()
  }

  async fn check_now(&self) -> bool {
    // Cheap fast path: no link, no point probing
    if !self.link.link_up() {
      self.state.set(false);
      return false;
    }

    let online = self.probe().await;
    self.state.set(online);
    online
  }
}
