//! Cached DMS client that wraps a [`DmsApi`] with transparent caching and
//! offline writes.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheResult, Cacheable, Scope, SyncOrchestrator, WorkingSet};
use crate::error::{PersistenceError, PersistenceResult, QueueResult, SyncResult};
use crate::sync::{EntityType, MutationQueue, OperationKind, QueuedOperation};

use super::cache::{keys, Policies};
use super::client::DmsApi;
use super::types::{DashboardStats, Outlet, Sale};

/// Record counts and last successful fetch per cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
  pub outlets: usize,
  pub sales: usize,
  pub dashboard_stats: usize,
  pub last_written: BTreeMap<&'static str, Option<DateTime<Utc>>>,
}

/// DMS client with transparent caching support.
///
/// Reads go through the cache-first protocol of [`SyncOrchestrator`] and
/// keep an in-memory working set per entity kind. Writes are applied locally
/// right away and queued for replay against the remote.
pub struct CachedDmsClient {
  api: Arc<dyn DmsApi>,
  sync: SyncOrchestrator,
  queue: Arc<MutationQueue>,
  policies: Policies,
  outlets: WorkingSet<Outlet>,
  sales: WorkingSet<Sale>,
  dashboard: WorkingSet<DashboardStats>,
}

impl CachedDmsClient {
  pub fn new(
    api: Arc<dyn DmsApi>,
    sync: SyncOrchestrator,
    queue: Arc<MutationQueue>,
    policies: Policies,
  ) -> Self {
    Self {
      api,
      sync,
      queue,
      policies,
      outlets: WorkingSet::new(),
      sales: WorkingSet::new(),
      dashboard: WorkingSet::new(),
    }
  }

  pub fn queue(&self) -> &Arc<MutationQueue> {
    &self.queue
  }

  /// All outlets.
  pub async fn get_outlets(&self, force_refresh: bool) -> SyncResult<CacheResult<Vec<Outlet>>> {
    self
      .sync
      .fetch(
        &self.policies.outlets,
        &self.outlets,
        &Scope::All,
        force_refresh,
        || {
          let api = Arc::clone(&self.api);
          async move { api.get_outlets().await }
        },
      )
      .await
  }

  /// A single outlet by id.
  pub async fn get_outlet(&self, id: &str, force_refresh: bool) -> SyncResult<CacheResult<Outlet>> {
    self
      .sync
      .fetch_one(&self.policies.outlets, &self.outlets, id, force_refresh, || {
        let api = Arc::clone(&self.api);
        let id = id.to_string();
        async move { api.get_outlet(&id).await }
      })
      .await
  }

  /// Sales of one outlet. Sales of other outlets already cached are kept.
  pub async fn get_sales_by_outlet(
    &self,
    outlet_id: &str,
    force_refresh: bool,
  ) -> SyncResult<CacheResult<Vec<Sale>>> {
    self
      .sync
      .fetch(
        &self.policies.sales,
        &self.sales,
        &Scope::index("outlet_id", outlet_id),
        force_refresh,
        || {
          let api = Arc::clone(&self.api);
          let outlet_id = outlet_id.to_string();
          async move { api.get_sales_by_outlet(&outlet_id).await }
        },
      )
      .await
  }

  /// Every sale of every outlet.
  pub async fn get_all_sales(&self, force_refresh: bool) -> SyncResult<CacheResult<Vec<Sale>>> {
    self
      .sync
      .fetch(
        &self.policies.sales,
        &self.sales,
        &Scope::All,
        force_refresh,
        || {
          let api = Arc::clone(&self.api);
          async move { api.get_all_sales().await }
        },
      )
      .await
  }

  /// Current dashboard statistics.
  pub async fn get_dashboard_stats(
    &self,
    force_refresh: bool,
  ) -> SyncResult<CacheResult<DashboardStats>> {
    self
      .sync
      .fetch_one(
        &self.policies.dashboard_stats,
        &self.dashboard,
        DashboardStats::CURRENT,
        force_refresh,
        || {
          let api = Arc::clone(&self.api);
          async move { api.get_dashboard_stats().await }
        },
      )
      .await
  }

  pub async fn create_sale(&self, sale: Sale) -> QueueResult<QueuedOperation> {
    self
      .write_local(&self.sales, OperationKind::Create, EntityType::Sale, sale)
      .await
  }

  pub async fn update_sale(&self, sale: Sale) -> QueueResult<QueuedOperation> {
    self
      .write_local(&self.sales, OperationKind::Update, EntityType::Sale, sale)
      .await
  }

  pub async fn delete_sale(&self, id: &str) -> QueueResult<QueuedOperation> {
    self.delete_local(&self.sales, EntityType::Sale, id).await
  }

  pub async fn create_outlet(&self, outlet: Outlet) -> QueueResult<QueuedOperation> {
    self
      .write_local(&self.outlets, OperationKind::Create, EntityType::Outlet, outlet)
      .await
  }

  pub async fn update_outlet(&self, outlet: Outlet) -> QueueResult<QueuedOperation> {
    self
      .write_local(&self.outlets, OperationKind::Update, EntityType::Outlet, outlet)
      .await
  }

  pub async fn delete_outlet(&self, id: &str) -> QueueResult<QueuedOperation> {
    self.delete_local(&self.outlets, EntityType::Outlet, id).await
  }

  /// Drop every cached record and all freshness metadata. Pending writes in
  /// the queue are left alone.
  pub async fn clear_cache(&self) -> PersistenceResult<()> {
    self.outlets.clear();
    self.sales.clear();
    self.dashboard.clear();

    let records = self.sync.records();
    futures::try_join!(
      records.clear::<Outlet>(),
      records.clear::<Sale>(),
      records.clear::<DashboardStats>(),
      self.sync.freshness().clear(),
    )?;

    info!("cache cleared");
    Ok(())
  }

  pub async fn cache_stats(&self) -> PersistenceResult<CacheStats> {
    let records = self.sync.records();
    let (outlets, sales, dashboard_stats) = futures::try_join!(
      records.count::<Outlet>(),
      records.count::<Sale>(),
      records.count::<DashboardStats>(),
    )?;

    let mut last_written = BTreeMap::new();
    for key in keys::ALL {
      let entry = self.sync.freshness().entry(key).await?;
      last_written.insert(key, entry.map(|e| e.written_at));
    }

    Ok(CacheStats {
      outlets,
      sales,
      dashboard_stats,
      last_written,
    })
  }

  /// Apply a create or update locally, then queue it for the remote.
  async fn write_local<T: Cacheable>(
    &self,
    working: &WorkingSet<T>,
    kind: OperationKind,
    entity_type: EntityType,
    entity: T,
  ) -> QueueResult<QueuedOperation> {
    let payload = serde_json::to_value(&entity).map_err(PersistenceError::from)?;

    working.merge(std::slice::from_ref(&entity));
    if let Err(e) = self.sync.records().put(&entity).await {
      warn!(table = T::table(), id = %entity.cache_key(), error = %e, "failed to cache local write");
    }

    self.queue.enqueue(kind, entity_type, payload).await
  }

  async fn delete_local<T: Cacheable>(
    &self,
    working: &WorkingSet<T>,
    entity_type: EntityType,
    id: &str,
  ) -> QueueResult<QueuedOperation> {
    working.remove(id);
    if let Err(e) = self.sync.records().delete::<T>(id).await {
      warn!(table = T::table(), id, error = %e, "failed to remove deleted record from cache");
    }

    self
      .queue
      .enqueue(OperationKind::Delete, entity_type, json!({ "id": id }))
      .await
  }
}
