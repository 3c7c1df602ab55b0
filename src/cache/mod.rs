//! Generic caching layer for data persistence and offline support.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Stores entities in per-kind tables with secondary indices
//! - Tracks freshness per cache key with configurable expiry
//! - Answers reads cache-first, going to the network only when needed
//! - Serves cached data when the network is unavailable

mod freshness;
mod layer;
mod storage;
mod traits;

pub use freshness::{FreshnessEntry, FreshnessStore};
pub use layer::{FreshnessPolicy, Scope, SyncOrchestrator, WorkingSet};
pub use storage::RecordCache;
pub use traits::{CacheResult, Cacheable, Origin};
