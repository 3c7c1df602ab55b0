//! Error taxonomy for the sync engine.
//!
//! Only [`SyncError`] is meant to reach callers of read operations. Storage
//! failures are downgraded to cache misses by the orchestrator, and dead
//! lettered queue operations are only ever logged.

/// Storage layer failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("storage task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  #[error("database lock poisoned")]
  LockPoisoned,

  #[error("table {table} has no index on {field}")]
  UnknownIndex {
    table: &'static str,
    field: String,
  },

  #[error("could not determine data directory")]
  NoDataDir,
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// The remote collaborator failed or reported `success = false`.
#[derive(Debug, thiserror::Error)]
pub enum RemoteFetchError {
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("invalid request url: {0}")]
  Url(#[from] url::ParseError),

  #[error("server rejected request: {0}")]
  Rejected(String),

  #[error("{0} not found")]
  NotFound(String),
}

/// Caller-visible failure of a cache-first fetch. Produced only once every
/// tier has been tried.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error(transparent)]
  RemoteFetch(#[from] RemoteFetchError),

  #[error("offline and no cached {0} available")]
  NoCachedData(String),
}

impl SyncError {
  pub fn is_no_cached_data(&self) -> bool {
    matches!(self, SyncError::NoCachedData(_))
  }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Mutation queue failure.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error(transparent)]
  Persistence(#[from] PersistenceError),

  /// An operation dropped after reaching the retry cap.
  #[error("operation {id} dropped after {attempts} failed attempts: {reason}")]
  Exhausted {
    id: String,
    attempts: u32,
    reason: String,
  },
}

pub type QueueResult<T> = Result<T, QueueError>;
