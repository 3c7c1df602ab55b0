//! Durable queue of writes made while the remote could not be reached.
//!
//! Operations are persisted in insertion order and replayed FIFO against an
//! [`OperationExecutor`]. A failed operation is retried on later passes until
//! it reaches the retry cap, after which it is dropped and only logged.

use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::executor::OperationExecutor;
use super::notifier::SyncNotifier;
use super::operation::{EntityType, OperationKind, QueuedOperation};
use crate::db::Database;
use crate::error::{PersistenceResult, QueueError, QueueResult};
use crate::net::Connectivity;
use crate::observable::{Listeners, Subscription};

/// Attempts before a failing operation is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Outcome of one processing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
  /// Applied remotely and removed
  pub succeeded: usize,
  /// Dropped after reaching the retry cap
  pub failed: usize,
  /// Failed this pass, kept for a later one
  pub retrying: usize,
}

/// Durable FIFO of pending writes.
pub struct MutationQueue {
  db: Database,
  connectivity: Arc<dyn Connectivity>,
  executor: Arc<dyn OperationExecutor>,
  notifier: Arc<dyn SyncNotifier>,
  max_retries: u32,
  processing: AtomicBool,
  scheduled: AtomicUsize,
  idle: Notify,
  listeners: Listeners<usize>,
}

impl MutationQueue {
  pub fn new(
    db: Database,
    connectivity: Arc<dyn Connectivity>,
    executor: Arc<dyn OperationExecutor>,
    notifier: Arc<dyn SyncNotifier>,
  ) -> Self {
    Self {
      db,
      connectivity,
      executor,
      notifier,
      max_retries: DEFAULT_MAX_RETRIES,
      processing: AtomicBool::new(false),
      scheduled: AtomicUsize::new(0),
      idle: Notify::new(),
      listeners: Listeners::new(),
    }
  }

  /// Set the number of attempts before an operation is dropped.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }

  /// Persist a new operation, then start a processing pass in the
  /// background if the remote is reachable.
  pub async fn enqueue(
    self: &Arc<Self>,
    kind: OperationKind,
    entity_type: EntityType,
    payload: Value,
  ) -> QueueResult<QueuedOperation> {
    let operation = QueuedOperation::new(kind, entity_type, payload);

    let row = operation.clone();
    self
      .db
      .call(move |conn| insert_operation(conn, &row))
      .await
      .map_err(|e| {
        error!(error = %e, "failed to queue operation");
        QueueError::from(e)
      })?;

    info!(
      operation = %operation.id,
      kind = kind.as_str(),
      entity = entity_type.as_str(),
      "operation queued"
    );
    self.notify_listeners().await;

    if self.connectivity.check_now().await {
      self.schedule_processing();
    }

    Ok(operation)
  }

  /// Spawn a processing pass without waiting for it.
  pub fn schedule_processing(self: &Arc<Self>) {
    self.scheduled.fetch_add(1, Ordering::SeqCst);
    let queue = Arc::clone(self);
    tokio::spawn(async move {
      queue.process_queue().await;
      queue.scheduled.fetch_sub(1, Ordering::SeqCst);
      queue.idle.notify_waiters();
    });
  }

  /// Replay pending operations in insertion order.
  ///
  /// At most one pass runs at a time; a concurrent call returns immediately
  /// with an empty result. Nothing happens while offline.
  pub async fn process_queue(&self) -> DrainResult {
    if self
      .processing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("queue pass already in flight");
      return DrainResult::default();
    }
    let _guard = ProcessingGuard { queue: self };

    if !self.connectivity.check_now().await {
      debug!("skipping queue processing, offline");
      return DrainResult::default();
    }

    let operations = match self.pending_operations().await {
      Ok(operations) => operations,
      Err(e) => {
        error!(error = %e, "failed to load queued operations");
        return DrainResult::default();
      }
    };
    if operations.is_empty() {
      return DrainResult::default();
    }

    info!(count = operations.len(), "processing queued operations");
    let mut result = DrainResult::default();

    for mut operation in operations {
      match self.executor.execute(&operation).await {
        Ok(()) => {
          if let Err(e) = self.delete(&operation.id).await {
            warn!(operation = %operation.id, error = %e, "applied operation could not be removed");
          }
          debug!(operation = %operation.id, "operation processed");
          result.succeeded += 1;
        }
        Err(e) => {
          operation.retry_count += 1;
          if operation.retry_count >= self.max_retries {
            let exhausted = QueueError::Exhausted {
              id: operation.id.clone(),
              attempts: operation.retry_count,
              reason: e.to_string(),
            };
            error!(error = %exhausted, "dropping operation");
            if let Err(e) = self.delete(&operation.id).await {
              warn!(operation = %operation.id, error = %e, "dropped operation could not be removed");
            }
            result.failed += 1;
          } else {
            debug!(
              operation = %operation.id,
              retry_count = operation.retry_count,
              error = %e,
              "operation failed, will retry"
            );
            if let Err(e) = self.save_retry(&operation).await {
              warn!(operation = %operation.id, error = %e, "failed to record retry");
            }
            result.retrying += 1;
          }
        }
      }
    }

    if result.succeeded > 0 || result.failed > 0 {
      self.notifier.sync_completed(result.succeeded, result.failed);
    }
    self.notify_listeners().await;

    result
  }

  /// Wait until no pass is running or scheduled.
  pub async fn wait_idle(&self) {
    loop {
      let notified = self.idle.notified();
      if !self.processing.load(Ordering::SeqCst) && self.scheduled.load(Ordering::SeqCst) == 0 {
        return;
      }
      notified.await;
    }
  }

  /// All pending operations in insertion order.
  pub async fn pending_operations(&self) -> PersistenceResult<Vec<QueuedOperation>> {
    self.db.call(load_operations).await
  }

  /// Number of pending operations. Storage failures count as empty.
  pub async fn pending_count(&self) -> usize {
    let count = self
      .db
      .call(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM offline_queue", [], |r| r.get(0))?;
        Ok(count.max(0) as usize)
      })
      .await;

    count.unwrap_or_else(|e| {
      warn!(error = %e, "failed to count queued operations");
      0
    })
  }

  /// Drop every pending operation.
  pub async fn clear(&self) -> QueueResult<()> {
    self
      .db
      .call(|conn| {
        conn.execute("DELETE FROM offline_queue", [])?;
        Ok(())
      })
      .await?;
    self.notify_listeners().await;
    Ok(())
  }

  /// Subscribe to the pending count. The listener hears the current count
  /// right away and again after every enqueue, pass and clear.
  pub async fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&usize) + Send + Sync + 'static,
  {
    listener(&self.pending_count().await);
    self.listeners.subscribe(listener)
  }

  async fn notify_listeners(&self) {
    if self.listeners.is_empty() {
      return;
    }
    let count = self.pending_count().await;
    self.listeners.emit(&count);
  }

  async fn delete(&self, id: &str) -> PersistenceResult<()> {
    let id = id.to_string();
    self
      .db
      .call(move |conn| {
        conn.execute("DELETE FROM offline_queue WHERE id = ?", params![id])?;
        Ok(())
      })
      .await
  }

  async fn save_retry(&self, operation: &QueuedOperation) -> PersistenceResult<()> {
    let id = operation.id.clone();
    let retry_count = operation.retry_count;
    self
      .db
      .call(move |conn| {
        conn.execute(
          "UPDATE offline_queue SET retry_count = ? WHERE id = ?",
          params![retry_count, id],
        )?;
        Ok(())
      })
      .await
  }
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct ProcessingGuard<'a> {
  queue: &'a MutationQueue,
}

impl Drop for ProcessingGuard<'_> {
  fn drop(&mut self) {
    self.queue.processing.store(false, Ordering::SeqCst);
    self.queue.idle.notify_waiters();
  }
}

fn insert_operation(conn: &mut Connection, operation: &QueuedOperation) -> PersistenceResult<()> {
  conn.execute(
    "INSERT INTO offline_queue (id, kind, entity_type, payload, enqueued_at, retry_count)
     VALUES (?, ?, ?, ?, ?, ?)",
    params![
      operation.id,
      operation.kind.as_str(),
      operation.entity_type.as_str(),
      serde_json::to_string(&operation.payload)?,
      operation.enqueued_at.timestamp_millis(),
      operation.retry_count,
    ],
  )?;
  Ok(())
}

/// Load pending operations in insertion order. Rows that can no longer be
/// decoded are dead-lettered so they never block the rest of the queue.
fn load_operations(conn: &mut Connection) -> PersistenceResult<Vec<QueuedOperation>> {
  let rows = {
    let mut stmt = conn.prepare(
      "SELECT id, kind, entity_type, payload, enqueued_at, retry_count
       FROM offline_queue ORDER BY seq",
    )?;
    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, i64>(4)?,
          row.get::<_, u32>(5)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;
    rows
  };

  let mut operations = Vec::with_capacity(rows.len());
  let mut undecodable = Vec::new();
  for (id, kind, entity_type, payload, enqueued_at, retry_count) in rows {
    let (Some(op_kind), Some(op_entity)) =
      (OperationKind::parse(&kind), EntityType::parse(&entity_type))
    else {
      error!(operation = %id, %kind, %entity_type, "dropping operation of unknown type");
      undecodable.push(id);
      continue;
    };
    let payload = match serde_json::from_str::<Value>(&payload) {
      Ok(payload) => payload,
      Err(e) => {
        error!(operation = %id, error = %e, "dropping operation with unreadable payload");
        undecodable.push(id);
        continue;
      }
    };
    operations.push(QueuedOperation {
      id,
      kind: op_kind,
      entity_type: op_entity,
      payload,
      enqueued_at: chrono::DateTime::from_timestamp_millis(enqueued_at).unwrap_or_default(),
      retry_count,
    });
  }

  for id in &undecodable {
    conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
  }
  Ok(operations)
}
