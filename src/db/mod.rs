pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{PersistenceError, PersistenceResult};

/// Shared handle to the local replica.
///
/// Constructed once at startup and passed down to every component that
/// persists state. Cloning is cheap and all clones share one connection.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> PersistenceResult<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    debug!(path = %path.display(), "opening cache database");
    let conn = Connection::open(&path)?;
    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> PersistenceResult<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> PersistenceResult<Self> {
    conn.execute_batch(schema::SCHEMA)?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path
  pub fn default_path() -> PersistenceResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(PersistenceError::NoDataDir)?;

    Ok(data_dir.join("dms-sync").join("cache.db"))
  }

  /// Run `f` against the connection on the blocking pool.
  ///
  /// Only the calling task suspends while SQLite works.
  pub async fn call<F, R>(&self, f: F) -> PersistenceResult<R>
  where
    F: FnOnce(&mut Connection) -> PersistenceResult<R> + Send + 'static,
    R: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn.lock().map_err(|_| PersistenceError::LockPoisoned)?;
      f(&mut conn)
    })
    .await?
  }

  /// Close the connection. Other live clones keep it open until they drop.
  pub fn close(self) -> PersistenceResult<()> {
    match Arc::try_unwrap(self.conn) {
      Ok(mutex) => {
        let conn = mutex.into_inner().map_err(|_| PersistenceError::LockPoisoned)?;
        conn.close().map_err(|(_, e)| PersistenceError::Sqlite(e))
      }
      Err(_) => Ok(()),
    }
  }
}
