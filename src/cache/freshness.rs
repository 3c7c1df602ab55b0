//! Per-key freshness bookkeeping.

use chrono::{DateTime, Utc};
use rusqlite::params;
use std::time::Duration;

use crate::db::Database;
use crate::error::PersistenceResult;

/// Freshness metadata for one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessEntry {
  pub key: String,
  pub written_at: DateTime<Utc>,
  /// `None` means the entry never expires.
  pub expires_at: Option<DateTime<Utc>>,
}

impl FreshnessEntry {
  pub fn new(key: impl Into<String>, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
    let expires_at = ttl
      .filter(|ttl| !ttl.is_zero())
      .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
      .and_then(|ttl| now.checked_add_signed(ttl));

    Self {
      key: key.into(),
      written_at: now,
      expires_at,
    }
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    match self.expires_at {
      Some(expires_at) => now > expires_at,
      None => false,
    }
  }
}

/// Tracks when each cache key was last written and when it expires.
///
/// A key with no entry, or with no expiry, is never expired: whether a fetch
/// happens is decided by whether the cached table is empty.
#[derive(Clone)]
pub struct FreshnessStore {
  db: Database,
}

impl FreshnessStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  pub async fn entry(&self, key: &str) -> PersistenceResult<Option<FreshnessEntry>> {
    let key = key.to_string();
    self
      .db
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT written_at, expires_at FROM cache_metadata WHERE key = ?")?;
        let mut rows = stmt.query(params![key])?;
        let Some(row) = rows.next()? else {
          return Ok(None);
        };
        let written_at: i64 = row.get(0)?;
        let expires_at: Option<i64> = row.get(1)?;

        Ok(Some(FreshnessEntry {
          key,
          written_at: from_millis(written_at),
          expires_at: expires_at.map(from_millis),
        }))
      })
      .await
  }

  pub async fn is_expired(&self, key: &str) -> PersistenceResult<bool> {
    Ok(
      self
        .entry(key)
        .await?
        .is_some_and(|entry| entry.is_expired_at(Utc::now())),
    )
  }

  /// Record that `key` was just written. Without a TTL the key never expires.
  pub async fn mark_fresh(&self, key: &str, ttl: Option<Duration>) -> PersistenceResult<()> {
    self.set_entry(FreshnessEntry::new(key, Utc::now(), ttl)).await
  }

  pub async fn set_entry(&self, entry: FreshnessEntry) -> PersistenceResult<()> {
    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO cache_metadata (key, written_at, expires_at) VALUES (?, ?, ?)",
          params![
            entry.key,
            entry.written_at.timestamp_millis(),
            entry.expires_at.map(|t| t.timestamp_millis())
          ],
        )?;
        Ok(())
      })
      .await
  }

  /// Time since `key` was last written.
  pub async fn age(&self, key: &str) -> PersistenceResult<Option<chrono::Duration>> {
    Ok(
      self
        .entry(key)
        .await?
        .map(|entry| Utc::now() - entry.written_at),
    )
  }

  pub async fn clear(&self) -> PersistenceResult<()> {
    self
      .db
      .call(|conn| {
        conn.execute("DELETE FROM cache_metadata", [])?;
        Ok(())
      })
      .await
  }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> FreshnessStore {
    FreshnessStore::new(Database::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_missing_key_is_not_expired() {
    let store = store();
    assert!(!store.is_expired("outlets").await.unwrap());
    assert!(!store.is_expired("anything-else").await.unwrap());
  }

  #[tokio::test]
  async fn test_past_expiry_is_expired() {
    let store = store();
    let now = Utc::now();
    store
      .set_entry(FreshnessEntry {
        key: "sales".to_string(),
        written_at: now - chrono::Duration::hours(2),
        expires_at: Some(now - chrono::Duration::hours(1)),
      })
      .await
      .unwrap();

    assert!(store.is_expired("sales").await.unwrap());
  }

  #[tokio::test]
  async fn test_future_expiry_is_not_expired() {
    let store = store();
    store
      .mark_fresh("sales", Some(Duration::from_secs(3600)))
      .await
      .unwrap();
    assert!(!store.is_expired("sales").await.unwrap());
  }

  #[tokio::test]
  async fn test_no_ttl_never_expires() {
    let store = store();
    let long_ago = Utc::now() - chrono::Duration::days(365);
    store
      .set_entry(FreshnessEntry::new("outlets", long_ago, None))
      .await
      .unwrap();

    let entry = store.entry("outlets").await.unwrap().unwrap();
    assert!(entry.expires_at.is_none());
    assert!(!store.is_expired("outlets").await.unwrap());
  }

  #[tokio::test]
  async fn test_zero_ttl_means_no_expiry() {
    let store = store();
    store.mark_fresh("outlets", Some(Duration::ZERO)).await.unwrap();
    assert!(store.entry("outlets").await.unwrap().unwrap().expires_at.is_none());
  }

  #[tokio::test]
  async fn test_age_and_clear() {
    let store = store();
    assert!(store.age("outlets").await.unwrap().is_none());

    store.mark_fresh("outlets", None).await.unwrap();
    let age = store.age("outlets").await.unwrap().unwrap();
    assert!(age < chrono::Duration::seconds(5));

    store.clear().await.unwrap();
    assert!(store.entry("outlets").await.unwrap().is_none());
  }

  #[test]
  fn test_entry_expiry_boundary() {
    let now = Utc::now();
    let entry = FreshnessEntry::new("k", now, Some(Duration::from_secs(60)));
    assert!(!entry.is_expired_at(now + chrono::Duration::seconds(60)));
    assert!(entry.is_expired_at(now + chrono::Duration::seconds(61)));
  }
}
