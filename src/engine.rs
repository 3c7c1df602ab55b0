//! Startup and shutdown wiring of the sync engine.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::{FreshnessStore, RecordCache, SyncOrchestrator};
use crate::config::Config;
use crate::db::Database;
use crate::dms::{CachedDmsClient, DmsApi, HttpDmsApi, Policies};
use crate::net::{Connectivity, ConnectivityProbe, LinkEvent, LinkStatus, PlatformLink};
use crate::observable::Subscription;
use crate::sync::{
  attach_auto_sync, HttpExecutor, LogNotifier, MutationQueue, OperationExecutor, SyncNotifier,
};

/// Collaborators the engine is assembled from.
pub struct EngineParts {
  pub db: Database,
  pub api: Arc<dyn DmsApi>,
  pub executor: Arc<dyn OperationExecutor>,
  pub notifier: Arc<dyn SyncNotifier>,
  pub probe_url: Url,
  pub policies: Policies,
  pub max_retries: u32,
}

/// A running engine: database, connectivity probe, mutation queue and the
/// cached client on top of them.
pub struct SyncEngine {
  db: Database,
  link: Arc<PlatformLink>,
  probe: Arc<ConnectivityProbe>,
  queue: Arc<MutationQueue>,
  client: CachedDmsClient,
  watcher: JoinHandle<()>,
  auto_sync: Subscription,
}

impl SyncEngine {
  /// Build the engine from configuration.
  pub fn start(config: &Config) -> Result<Self> {
    let db = Database::open(config.cache.path.as_deref())
      .map_err(|e| eyre!("Failed to open cache database: {}", e))?;
    let token = Config::api_token();
    let base_url = config.api.base_url.clone();

    let parts = EngineParts {
      db,
      api: Arc::new(HttpDmsApi::new(base_url.clone(), token.clone())),
      executor: Arc::new(HttpExecutor::new(base_url, token)),
      notifier: Arc::new(LogNotifier),
      probe_url: config.probe_url()?,
      policies: Policies::from_config(&config.cache.ttl),
      max_retries: config.queue.max_retries,
    };

    // A command-line process has no platform link feed; assume a link and
    // let the probe decide.
    let (link, events) = PlatformLink::new(true);
    Ok(Self::assemble(parts, link, events))
  }

  /// Wire the components together and start watching link events.
  pub fn assemble(
    parts: EngineParts,
    link: Arc<PlatformLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
  ) -> Self {
    let probe = Arc::new(ConnectivityProbe::new(
      parts.probe_url,
      Arc::clone(&link) as Arc<dyn LinkStatus>,
    ));
    let connectivity = Arc::clone(&probe) as Arc<dyn Connectivity>;

    let queue = Arc::new(
      MutationQueue::new(
        parts.db.clone(),
        Arc::clone(&connectivity),
        parts.executor,
        parts.notifier,
      )
      .with_max_retries(parts.max_retries),
    );

    let sync = SyncOrchestrator::new(
      RecordCache::new(parts.db.clone()),
      FreshnessStore::new(parts.db.clone()),
      connectivity,
    );
    let client = CachedDmsClient::new(parts.api, sync, Arc::clone(&queue), parts.policies);

    let auto_sync = attach_auto_sync(&probe, Arc::clone(&queue));
    let watcher = Arc::clone(&probe).watch(events);
    debug!("sync engine started");

    Self {
      db: parts.db,
      link,
      probe,
      queue,
      client,
      watcher,
      auto_sync,
    }
  }

  pub fn client(&self) -> &CachedDmsClient {
    &self.client
  }

  pub fn queue(&self) -> &Arc<MutationQueue> {
    &self.queue
  }

  pub fn probe(&self) -> &Arc<ConnectivityProbe> {
    &self.probe
  }

  pub fn link(&self) -> &Arc<PlatformLink> {
    &self.link
  }

  /// Stop reacting to connectivity, let any queue pass finish, then close
  /// the database.
  pub async fn shutdown(self) -> Result<()> {
    let Self {
      db,
      link,
      probe,
      queue,
      client,
      watcher,
      auto_sync,
    } = self;

    auto_sync.unsubscribe();
    watcher.abort();
    queue.wait_idle().await;

    drop(client);
    drop(queue);
    drop(probe);
    drop(link);

    db.close()
      .map_err(|e| eyre!("Failed to close cache database: {}", e))?;
    info!("sync engine stopped");
    Ok(())
  }
}
