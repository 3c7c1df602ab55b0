//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached.
///
/// Each implementor maps to one table of the local replica. Index fields are
/// duplicated into dedicated columns so scoped lookups do not need to
/// deserialize the whole table.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity within its table
  fn cache_key(&self) -> String;

  /// Table name for storage organization (e.g., "outlets", "sales")
  fn table() -> &'static str;

  /// Secondary index columns of the table.
  fn indexes() -> &'static [&'static str] {
    &[]
  }

  /// Value of the named index column for this entity.
  fn index_value(&self, _field: &str) -> Option<String> {
    None
  }
}

/// Result from a cache-first fetch, including data and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub origin: Origin,
  /// Set when the answer is degraded (e.g. the network failed)
  pub message: Option<String>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the remote collaborator.
  pub fn fresh(data: T) -> Self {
    Self {
      data,
      origin: Origin::Fresh,
      message: None,
    }
  }

  /// Data from cache while the freshness window holds.
  pub fn cached(data: T) -> Self {
    Self {
      data,
      origin: Origin::Cached,
      message: None,
    }
  }

  /// Data from cache because the network fetch failed.
  pub fn degraded(data: T, message: impl Into<String>) -> Self {
    Self {
      data,
      origin: Origin::Cached,
      message: Some(message.into()),
    }
  }

  /// Data from cache because connectivity is down.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      origin: Origin::OfflineCached,
      message: Some("Offline - showing cached data".to_string()),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      origin: self.origin,
      message: self.message,
    }
  }
}

/// Indicates where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// Fetched from the network just now
  Fresh,
  /// Served from cache (fresh window, or network failed)
  Cached,
  /// Network unavailable, serving cached data
  OfflineCached,
}

impl std::fmt::Display for Origin {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Origin::Fresh => write!(f, "fresh"),
      Origin::Cached => write!(f, "cached"),
      Origin::OfflineCached => write!(f, "offline-cached"),
    }
  }
}
