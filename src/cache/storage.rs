//! Typed record storage on top of the SQLite replica.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::warn;

use super::traits::Cacheable;
use crate::db::Database;
use crate::error::{PersistenceError, PersistenceResult};

/// A serialized entity ready to be written.
struct Row {
  id: String,
  data: Vec<u8>,
  indexes: Vec<Option<String>>,
}

impl Row {
  fn from_entity<T: Cacheable>(entity: &T) -> PersistenceResult<Self> {
    Ok(Self {
      id: entity.cache_key(),
      data: serde_json::to_vec(entity)?,
      indexes: T::indexes()
        .iter()
        .map(|field| entity.index_value(field))
        .collect(),
    })
  }

  fn into_params(self) -> Vec<Value> {
    let mut values = Vec::with_capacity(2 + self.indexes.len());
    values.push(Value::Text(self.id));
    values.push(Value::Blob(self.data));
    values.extend(
      self
        .indexes
        .into_iter()
        .map(|v| v.map(Value::Text).unwrap_or(Value::Null)),
    );
    values
  }
}

/// Persistent, indexed storage of domain entities.
///
/// Every write is an upsert keyed by [`Cacheable::cache_key`]. All operations
/// run on the blocking pool and may fail with a [`PersistenceError`]; callers
/// are expected to treat that as a cache miss.
#[derive(Clone)]
pub struct RecordCache {
  db: Database,
}

impl RecordCache {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Get a single entity by id.
  pub async fn get<T: Cacheable>(&self, id: &str) -> PersistenceResult<Option<T>> {
    let id = id.to_string();
    let data: Option<Vec<u8>> = self
      .db
      .call(move |conn| {
        let sql = format!("SELECT data FROM {} WHERE id = ?", T::table());
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
          Some(row) => Ok(Some(row.get(0)?)),
          None => Ok(None),
        }
      })
      .await?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  /// Get every entity in the table, in write order.
  pub async fn get_all<T: Cacheable>(&self) -> PersistenceResult<Vec<T>> {
    let blobs = self
      .db
      .call(|conn| {
        let sql = format!("SELECT data FROM {} ORDER BY rowid", T::table());
        query_blobs(conn, &sql, Vec::new())
      })
      .await?;
    Ok(decode_all(T::table(), blobs))
  }

  /// Get entities whose secondary index `field` equals `value`.
  pub async fn get_by_index<T: Cacheable>(
    &self,
    field: &str,
    value: &str,
  ) -> PersistenceResult<Vec<T>> {
    let field = checked_index::<T>(field)?;
    let value = value.to_string();
    let blobs = self
      .db
      .call(move |conn| {
        let sql = format!(
          "SELECT data FROM {} WHERE {} = ? ORDER BY rowid",
          T::table(),
          field
        );
        query_blobs(conn, &sql, vec![Value::Text(value)])
      })
      .await?;
    Ok(decode_all(T::table(), blobs))
  }

  /// Store a single entity.
  pub async fn put<T: Cacheable>(&self, record: &T) -> PersistenceResult<()> {
    self.bulk_put(std::slice::from_ref(record)).await
  }

  /// Store many entities in one transaction.
  pub async fn bulk_put<T: Cacheable>(&self, records: &[T]) -> PersistenceResult<()> {
    let rows = encode_all(records)?;
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        insert_rows::<T>(&tx, rows)?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  /// Replace the whole table with `records` atomically.
  pub async fn replace_all<T: Cacheable>(&self, records: &[T]) -> PersistenceResult<()> {
    let rows = encode_all(records)?;
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", T::table()), [])?;
        insert_rows::<T>(&tx, rows)?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  /// Remove a single entity. Missing ids are ignored.
  pub async fn delete<T: Cacheable>(&self, id: &str) -> PersistenceResult<()> {
    let id = id.to_string();
    self
      .db
      .call(move |conn| {
        conn.execute(
          &format!("DELETE FROM {} WHERE id = ?", T::table()),
          params![id],
        )?;
        Ok(())
      })
      .await
  }

  /// Remove every entity of the table.
  pub async fn clear<T: Cacheable>(&self) -> PersistenceResult<()> {
    self
      .db
      .call(|conn| {
        conn.execute(&format!("DELETE FROM {}", T::table()), [])?;
        Ok(())
      })
      .await
  }

  pub async fn count<T: Cacheable>(&self) -> PersistenceResult<usize> {
    self
      .db
      .call(|conn| {
        let count: i64 =
          conn.query_row(&format!("SELECT COUNT(*) FROM {}", T::table()), [], |row| {
            row.get(0)
          })?;
        Ok(count.max(0) as usize)
      })
      .await
  }
}

/// Resolve `field` to one of the table's declared index columns so it can be
/// interpolated into SQL.
fn checked_index<T: Cacheable>(field: &str) -> PersistenceResult<&'static str> {
  T::indexes()
    .iter()
    .copied()
    .find(|known| *known == field)
    .ok_or_else(|| PersistenceError::UnknownIndex {
      table: T::table(),
      field: field.to_string(),
    })
}

fn encode_all<T: Cacheable>(records: &[T]) -> PersistenceResult<Vec<Row>> {
  records.iter().map(Row::from_entity).collect()
}

fn insert_rows<T: Cacheable>(conn: &Connection, rows: Vec<Row>) -> PersistenceResult<()> {
  let mut columns = vec!["id", "data"];
  columns.extend_from_slice(T::indexes());
  let placeholders = vec!["?"; columns.len()].join(", ");
  let sql = format!(
    "INSERT OR REPLACE INTO {} ({}, cached_at) VALUES ({}, datetime('now'))",
    T::table(),
    columns.join(", "),
    placeholders
  );

  let mut stmt = conn.prepare(&sql)?;
  for row in rows {
    stmt.execute(params_from_iter(row.into_params()))?;
  }
  Ok(())
}

fn query_blobs(conn: &Connection, sql: &str, args: Vec<Value>) -> PersistenceResult<Vec<Vec<u8>>> {
  let mut stmt = conn.prepare(sql)?;
  let blobs = stmt
    .query_map(params_from_iter(args), |row| row.get(0))?
    .collect::<Result<Vec<Vec<u8>>, _>>()?;
  Ok(blobs)
}

/// Decode rows, skipping any that no longer match the entity shape.
fn decode_all<T: Cacheable>(table: &str, blobs: Vec<Vec<u8>>) -> Vec<T> {
  blobs
    .into_iter()
    .filter_map(|data| match serde_json::from_slice(&data) {
      Ok(entity) => Some(entity),
      Err(e) => {
        warn!(table, error = %e, "skipping undecodable cached record");
        None
      }
    })
    .collect()
}
