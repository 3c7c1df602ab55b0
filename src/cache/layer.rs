//! Cache-first fetch protocol.
//!
//! The orchestrator answers "get this data" by combining the in-memory
//! working set, the persistent [`RecordCache`], the [`FreshnessStore`] and the
//! connectivity probe, and only then the remote collaborator.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::freshness::FreshnessStore;
use super::storage::RecordCache;
use super::traits::{CacheResult, Cacheable};
use crate::error::{PersistenceResult, RemoteFetchError, SyncError, SyncResult};
use crate::net::Connectivity;

/// Subset of an entity kind being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
  /// The whole collection
  All,
  /// A single record by id
  Id(String),
  /// Records whose index column `field` equals `value`
  Index { field: &'static str, value: String },
}

impl Scope {
  pub fn index(field: &'static str, value: impl Into<String>) -> Self {
    Scope::Index {
      field,
      value: value.into(),
    }
  }

  pub fn matches<T: Cacheable>(&self, entity: &T) -> bool {
    match self {
      Scope::All => true,
      Scope::Id(id) => entity.cache_key() == *id,
      Scope::Index { field, value } => {
        entity.index_value(field).as_deref() == Some(value.as_str())
      }
    }
  }

  /// Whether a fetch for this scope covers the whole table.
  pub fn is_whole_collection(&self) -> bool {
    matches!(self, Scope::All)
  }
}

impl std::fmt::Display for Scope {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Scope::All => write!(f, "all"),
      Scope::Id(id) => write!(f, "id={}", id),
      Scope::Index { field, value } => write!(f, "{}={}", field, value),
    }
  }
}

/// Freshness settings of one entity kind.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
  /// Cache key tracked by the freshness store
  pub key: &'static str,
  /// How long a successful fetch stays fresh
  pub ttl: Option<Duration>,
}

impl FreshnessPolicy {
  pub fn new(key: &'static str, ttl: Option<Duration>) -> Self {
    Self { key, ttl }
  }
}

/// In-memory copy of the entities a caller is currently working with.
///
/// The set is `complete` once it holds the whole collection, either from a
/// whole-collection fetch or from hydrating every cached record. Until then
/// reads also consult the record cache.
pub struct WorkingSet<T> {
  items: Mutex<Vec<T>>,
  complete: AtomicBool,
}

impl<T: Cacheable> WorkingSet<T> {
  pub fn new() -> Self {
    Self {
      items: Mutex::new(Vec::new()),
      complete: AtomicBool::new(false),
    }
  }

  pub fn is_complete(&self) -> bool {
    self.complete.load(Ordering::SeqCst)
  }

  pub fn mark_complete(&self) {
    self.complete.store(true, Ordering::SeqCst);
  }

  pub fn snapshot(&self) -> Vec<T> {
    self.lock().clone()
  }

  pub fn select(&self, scope: &Scope) -> Vec<T> {
    self
      .lock()
      .iter()
      .filter(|item| scope.matches(*item))
      .cloned()
      .collect()
  }

  /// Replace the contents with the whole collection.
  pub fn replace(&self, items: Vec<T>) {
    *self.lock() = items;
    self.mark_complete();
  }

  /// Add entities whose id is not in the set yet. Entries already held are
  /// kept, they are at least as recent as the cached copy.
  pub fn fill(&self, cached: &[T]) {
    let mut items = self.lock();
    for entity in cached {
      let key = entity.cache_key();
      if !items.iter().any(|existing| existing.cache_key() == key) {
        items.push(entity.clone());
      }
    }
  }

  /// Union `incoming` into the set by id. Existing entries are updated in
  /// place, new ones appended.
  pub fn merge(&self, incoming: &[T]) {
    let mut items = self.lock();
    for entity in incoming {
      let key = entity.cache_key();
      match items.iter_mut().find(|existing| existing.cache_key() == key) {
        Some(existing) => *existing = entity.clone(),
        None => items.push(entity.clone()),
      }
    }
  }

  pub fn remove(&self, id: &str) {
    self.lock().retain(|item| item.cache_key() != id);
  }

  pub fn clear(&self) {
    self.lock().clear();
    self.complete.store(false, Ordering::SeqCst);
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> MutexGuard<'_, Vec<T>> {
    self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl<T: Cacheable> Default for WorkingSet<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Cache-first fetch orchestrator.
///
/// Storage failures never abort a fetch: they are logged and the tier is
/// treated as empty.
#[derive(Clone)]
pub struct SyncOrchestrator {
  records: RecordCache,
  freshness: FreshnessStore,
  connectivity: Arc<dyn Connectivity>,
}

impl SyncOrchestrator {
  pub fn new(
    records: RecordCache,
    freshness: FreshnessStore,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      records,
      freshness,
      connectivity,
    }
  }

  pub fn records(&self) -> &RecordCache {
    &self.records
  }

  pub fn freshness(&self) -> &FreshnessStore {
    &self.freshness
  }

  /// Fetch `scope` with the cache-first strategy.
  ///
  /// 1. Unless the working set already holds the whole collection, fill it
  ///    with the record cache contents for `scope`
  /// 2. If there is data and the freshness window holds, return it without
  ///    touching the network
  /// 3. Otherwise probe connectivity; online fetches remotely and writes
  ///    back, falling back to cache on failure
  /// 4. Offline serves the record cache or fails with `NoCachedData`
  pub async fn fetch<T, F, Fut>(
    &self,
    policy: &FreshnessPolicy,
    working: &WorkingSet<T>,
    scope: &Scope,
    force_refresh: bool,
    fetcher: F,
  ) -> SyncResult<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, RemoteFetchError>>,
  {
    let mut local = Vec::new();
    if !force_refresh {
      if !working.is_complete() {
        self.hydrate(working, scope).await;
      }
      local = working.select(scope);
    }

    let fresh = !self.is_expired(policy.key).await;

    if !local.is_empty() && fresh {
      debug!(key = policy.key, %scope, "serving cached data");
      return Ok(CacheResult::cached(local));
    }

    if !self.connectivity.check_now().await {
      debug!(key = policy.key, %scope, "offline");
      let cached = self.read_fallback(working, scope).await;
      if cached.is_empty() {
        return Err(SyncError::NoCachedData(format!("{} ({})", policy.key, scope)));
      }
      return Ok(CacheResult::offline(cached));
    }

    match fetcher().await {
      Ok(items) => {
        self.write_back(policy, working, scope, &items).await;
        Ok(CacheResult::fresh(items))
      }
      Err(e) => {
        warn!(key = policy.key, %scope, error = %e, "remote fetch failed");
        let cached = self.read_fallback(working, scope).await;
        if cached.is_empty() {
          return Err(SyncError::RemoteFetch(e));
        }
        Ok(CacheResult::degraded(
          cached,
          format!("Showing cached data: {}", e),
        ))
      }
    }
  }

  /// Fetch a single record by id with the same protocol as [`Self::fetch`].
  pub async fn fetch_one<T, F, Fut>(
    &self,
    policy: &FreshnessPolicy,
    working: &WorkingSet<T>,
    id: &str,
    force_refresh: bool,
    fetcher: F,
  ) -> SyncResult<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, RemoteFetchError>>,
  {
    let scope = Scope::Id(id.to_string());
    let result = self
      .fetch(policy, working, &scope, force_refresh, || async move {
        fetcher().await.map(|item| vec![item])
      })
      .await?;

    let CacheResult {
      data,
      origin,
      message,
    } = result;
    match data.into_iter().next() {
      Some(item) => Ok(CacheResult {
        data: item,
        origin,
        message,
      }),
      None => Err(SyncError::RemoteFetch(RemoteFetchError::NotFound(format!(
        "{} {}",
        policy.key, id
      )))),
    }
  }

  /// Merge fetched items into the working set and the record cache, then
  /// mark the key fresh.
  ///
  /// Whole-collection fetches replace the table. Scoped fetches are unioned
  /// by id so other partitions already cached survive.
  async fn write_back<T: Cacheable>(
    &self,
    policy: &FreshnessPolicy,
    working: &WorkingSet<T>,
    scope: &Scope,
    items: &[T],
  ) {
    let stored = if scope.is_whole_collection() {
      working.replace(items.to_vec());
      self.records.replace_all(items).await
    } else {
      working.merge(items);
      self.records.bulk_put(items).await
    };
    log_persistence(policy.key, "write fetched records", stored);

    let marked = self.freshness.mark_fresh(policy.key, policy.ttl).await;
    log_persistence(policy.key, "mark fresh", marked);
  }

  async fn is_expired(&self, key: &str) -> bool {
    match self.freshness.is_expired(key).await {
      Ok(expired) => expired,
      Err(e) => {
        warn!(key, error = %e, "freshness lookup failed, treating as expired");
        true
      }
    }
  }

  /// Fill the working set from the record cache. A successful read of the
  /// whole table makes the set complete.
  async fn hydrate<T: Cacheable>(&self, working: &WorkingSet<T>, scope: &Scope) {
    match self.try_read_cache::<T>(scope).await {
      Ok(cached) => {
        working.fill(&cached);
        if scope.is_whole_collection() {
          working.mark_complete();
        }
      }
      Err(e) => {
        warn!(table = T::table(), %scope, error = %e, "cache read failed, treating as miss");
      }
    }
  }

  async fn try_read_cache<T: Cacheable>(&self, scope: &Scope) -> PersistenceResult<Vec<T>> {
    match scope {
      Scope::All => self.records.get_all::<T>().await,
      Scope::Id(id) => self.records.get::<T>(id).await.map(|found| found.into_iter().collect()),
      Scope::Index { field, value } => self.records.get_by_index::<T>(field, value).await,
    }
  }

  async fn read_cache<T: Cacheable>(&self, scope: &Scope) -> Vec<T> {
    match self.try_read_cache::<T>(scope).await {
      Ok(items) => items,
      Err(e) => {
        warn!(table = T::table(), %scope, error = %e, "cache read failed, treating as miss");
        Vec::new()
      }
    }
  }

  /// Record cache contents for `scope`, or the working set when the cache
  /// has nothing (e.g. storage is failing).
  async fn read_fallback<T: Cacheable>(&self, working: &WorkingSet<T>, scope: &Scope) -> Vec<T> {
    let cached = self.read_cache(scope).await;
    if cached.is_empty() {
      working.select(scope)
    } else {
      cached
    }
  }
}

fn log_persistence(key: &str, action: &str, result: PersistenceResult<()>) {
  if let Err(e) = result {
    warn!(key, error = %e, "failed to {}", action);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::freshness::FreshnessEntry;
  use crate::cache::Origin;
  use crate::db::Database;
  use crate::dms::types::Sale;
  use crate::test_support::{sale, FakeConnectivity};
  use chrono::Utc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const SALES: FreshnessPolicy = FreshnessPolicy {
    key: "sales",
    ttl: Some(Duration::from_secs(3600)),
  };

  struct Harness {
    db: Database,
    sync: SyncOrchestrator,
    connectivity: Arc<FakeConnectivity>,
    working: WorkingSet<Sale>,
  }

  fn harness(online: bool) -> Harness {
    let db = Database::open_in_memory().unwrap();
    let connectivity = Arc::new(FakeConnectivity::new(online));
    let sync = SyncOrchestrator::new(
      RecordCache::new(db.clone()),
      FreshnessStore::new(db.clone()),
      Arc::clone(&connectivity) as Arc<dyn Connectivity>,
    );
    Harness {
      db,
      sync,
      connectivity,
      working: WorkingSet::new(),
    }
  }

  fn remote(items: Vec<Sale>) -> impl Future<Output = Result<Vec<Sale>, RemoteFetchError>> {
    async move { Ok(items) }
  }

  fn failing() -> impl Future<Output = Result<Vec<Sale>, RemoteFetchError>> {
    async { Err(RemoteFetchError::Rejected("boom".to_string())) }
  }

  async fn expire(h: &Harness, key: &str) {
    let now = Utc::now();
    h.sync
      .freshness()
      .set_entry(FreshnessEntry {
        key: key.to_string(),
        written_at: now - chrono::Duration::hours(3),
        expires_at: Some(now - chrono::Duration::hours(2)),
      })
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_empty_cache_online_fetches_fresh() {
    let h = harness(true);
    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, || {
        remote(vec![sale("s1", "1", 1)])
      })
      .await
      .unwrap();

    assert_eq!(result.origin, Origin::Fresh);
    assert_eq!(result.data.len(), 1);
    assert_eq!(h.sync.records().count::<Sale>().await.unwrap(), 1);
    assert!(h.sync.freshness().entry("sales").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_connectivity_and_network() {
    let h = harness(true);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();
    h.sync.freshness().mark_fresh("sales", SALES.ttl).await.unwrap();

    let calls = AtomicUsize::new(0);
    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, || {
        calls.fetch_add(1, Ordering::SeqCst);
        remote(Vec::new())
      })
      .await
      .unwrap();

    assert_eq!(result.origin, Origin::Cached);
    assert_eq!(result.data[0].id, "s1");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.connectivity.checks(), 0);
  }

  #[tokio::test]
  async fn test_missing_metadata_with_data_is_served_from_cache() {
    let h = harness(true);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::Cached);
    assert!(result.message.is_none());
  }

  #[tokio::test]
  async fn test_consecutive_reads_are_identical() {
    let h = harness(true);
    h.sync
      .fetch(&SALES, &h.working, &Scope::All, false, || {
        remote(vec![sale("s1", "1", 1), sale("s2", "2", 3)])
      })
      .await
      .unwrap();

    let first = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap();
    let second = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.origin, Origin::Cached);
  }

  #[tokio::test]
  async fn test_expired_cache_refetches_when_online() {
    let h = harness(true);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();
    expire(&h, "sales").await;

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, || {
        remote(vec![sale("s9", "1", 2)])
      })
      .await
      .unwrap();

    assert_eq!(result.origin, Origin::Fresh);
    assert!(!h.sync.freshness().is_expired("sales").await.unwrap());
    // Whole-collection fetch replaced the table
    let all: Vec<Sale> = h.sync.records().get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "s9");
    assert_eq!(h.working.snapshot().len(), 1);
  }

  #[tokio::test]
  async fn test_expired_cache_offline_is_offline_cached() {
    let h = harness(false);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();
    expire(&h, "sales").await;

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::OfflineCached);
    assert_eq!(result.data.len(), 1);
    assert_eq!(h.connectivity.checks(), 1);
  }

  #[tokio::test]
  async fn test_offline_with_empty_cache_fails() {
    let h = harness(false);
    let err = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap_err();
    assert!(err.is_no_cached_data());
  }

  #[tokio::test]
  async fn test_remote_failure_falls_back_to_cache() {
    let h = harness(true);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();
    expire(&h, "sales").await;

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::Cached);
    assert!(result.message.unwrap().contains("boom"));
  }

  #[tokio::test]
  async fn test_remote_failure_without_cache_propagates() {
    let h = harness(true);
    let err = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      SyncError::RemoteFetch(RemoteFetchError::Rejected(_))
    ));
  }

  #[tokio::test]
  async fn test_scoped_fetch_preserves_other_partitions() {
    let h = harness(true);
    let outlet_one = Scope::index("outlet_id", "1");
    let outlet_two = Scope::index("outlet_id", "2");

    h.sync
      .fetch(&SALES, &h.working, &outlet_one, false, || {
        remote(vec![sale("s1", "1", 1), sale("s2", "1", 2)])
      })
      .await
      .unwrap();
    h.sync
      .fetch(&SALES, &h.working, &outlet_two, false, || {
        remote(vec![sale("s5", "2", 7)])
      })
      .await
      .unwrap();

    let cached: Vec<Sale> = h.sync.records().get_by_index("outlet_id", "1").await.unwrap();
    assert_eq!(cached.len(), 2);

    let result = h
      .sync
      .fetch(&SALES, &h.working, &outlet_one, false, failing)
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::Cached);
    assert_eq!(result.data.len(), 2);
  }

  #[tokio::test]
  async fn test_whole_collection_read_after_scoped_read_sees_every_partition() {
    let h = harness(true);
    h.sync
      .records()
      .bulk_put(&[sale("s1", "1", 1), sale("s5", "2", 7)])
      .await
      .unwrap();
    h.sync.freshness().mark_fresh("sales", SALES.ttl).await.unwrap();

    let scoped = h
      .sync
      .fetch(&SALES, &h.working, &Scope::index("outlet_id", "1"), false, failing)
      .await
      .unwrap();
    assert_eq!(scoped.origin, Origin::Cached);
    assert_eq!(scoped.data.len(), 1);
    assert!(!h.working.is_complete());

    let all = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, failing)
      .await
      .unwrap();
    assert_eq!(all.origin, Origin::Cached);
    let ids: Vec<_> = all.data.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s5"]);
    assert!(h.working.is_complete());
  }

  #[tokio::test]
  async fn test_scoped_read_sees_cached_records_beside_local_ones() {
    let h = harness(false);
    h.sync
      .records()
      .bulk_put(&[sale("s1", "1", 1), sale("s2", "1", 2)])
      .await
      .unwrap();
    // A local write puts one record of the partition in memory
    h.working.merge(&[sale("s2", "1", 9)]);

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::index("outlet_id", "1"), false, failing)
      .await
      .unwrap();
    assert_eq!(result.data.len(), 2);
    let s2 = result.data.iter().find(|s| s.id == "s2").unwrap();
    assert_eq!(s2.quantity, 9);
  }

  #[tokio::test]
  async fn test_force_refresh_bypasses_fresh_cache() {
    let h = harness(true);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();
    h.sync.freshness().mark_fresh("sales", SALES.ttl).await.unwrap();

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, true, || {
        remote(vec![sale("s1", "1", 4)])
      })
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::Fresh);
    assert_eq!(result.data[0].quantity, 4);
  }

  #[tokio::test]
  async fn test_storage_failure_is_a_cache_miss() {
    let h = harness(true);
    h.db
      .call(|conn| {
        conn.execute_batch("DROP TABLE sales; DROP TABLE cache_metadata;")?;
        Ok(())
      })
      .await
      .unwrap();

    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, false, || {
        remote(vec![sale("s1", "1", 1)])
      })
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::Fresh);
    assert_eq!(h.working.len(), 1);

    // Cache is unusable, the working set still answers when the network fails
    let result = h
      .sync
      .fetch(&SALES, &h.working, &Scope::All, true, failing)
      .await
      .unwrap();
    assert_eq!(result.origin, Origin::Cached);
    assert_eq!(result.data.len(), 1);
  }

  #[tokio::test]
  async fn test_fetch_one_not_found_in_scope() {
    let h = harness(false);
    h.sync.records().put(&sale("s1", "1", 1)).await.unwrap();

    let found = h
      .sync
      .fetch_one(&SALES, &h.working, "s1", false, || async {
        Err(RemoteFetchError::Rejected("unused".to_string()))
      })
      .await
      .unwrap();
    assert_eq!(found.data.id, "s1");
    assert_eq!(found.origin, Origin::Cached);

    let missing = h
      .sync
      .fetch_one(&SALES, &h.working, "s2", false, || async {
        Err(RemoteFetchError::Rejected("unused".to_string()))
      })
      .await
      .unwrap_err();
    assert!(missing.is_no_cached_data());
  }

  #[test]
  fn test_working_set_merge_is_union_by_id() {
    let set = WorkingSet::new();
    set.replace(vec![sale("s1", "1", 1), sale("s2", "2", 1)]);
    set.merge(&[sale("s2", "2", 5), sale("s3", "3", 1)]);

    let items = set.snapshot();
    let ids: Vec<_> = items.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "s3"]);
    assert_eq!(items[1].quantity, 5);

    assert_eq!(set.select(&Scope::index("outlet_id", "3")).len(), 1);
    set.remove("s1");
    assert_eq!(set.len(), 2);

    assert!(set.is_complete());
    set.clear();
    assert!(!set.is_complete());
  }

  #[test]
  fn test_working_set_fill_keeps_held_entries() {
    let set = WorkingSet::new();
    set.merge(&[sale("s1", "1", 9)]);
    set.fill(&[sale("s1", "1", 1), sale("s2", "1", 1)]);

    let items = set.snapshot();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].quantity, 9);
    assert!(!set.is_complete());
  }
}
