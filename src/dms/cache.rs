//! Caching implementations for DMS types.

use std::time::Duration;

use crate::cache::{Cacheable, FreshnessPolicy};
use crate::config::TtlConfig;

use super::types::{DashboardStats, Outlet, Sale};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Outlet {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn table() -> &'static str {
    "outlets"
  }

  fn indexes() -> &'static [&'static str] {
    &["name", "region", "is_active"]
  }

  fn index_value(&self, field: &str) -> Option<String> {
    match field {
      "name" => Some(self.name.clone()),
      "region" => Some(self.region.clone()),
      "is_active" => Some(self.is_active.to_string()),
      _ => None,
    }
  }
}

impl Cacheable for Sale {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn table() -> &'static str {
    "sales"
  }

  fn indexes() -> &'static [&'static str] {
    &["outlet_id", "date"]
  }

  fn index_value(&self, field: &str) -> Option<String> {
    match field {
      "outlet_id" => Some(self.outlet_id.clone()),
      "date" => Some(self.date.clone()),
      _ => None,
    }
  }
}

impl Cacheable for DashboardStats {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn table() -> &'static str {
    "dashboard_stats"
  }
}

// ============================================================================
// Freshness keys
// ============================================================================

/// Cache keys tracked by the freshness store, one per entity kind.
pub mod keys {
  pub const OUTLETS: &str = "outlets";
  pub const SALES: &str = "sales";
  pub const DASHBOARD_STATS: &str = "dashboardStats";

  pub const ALL: [&str; 3] = [OUTLETS, SALES, DASHBOARD_STATS];
}

/// Freshness policies of every cached entity kind.
#[derive(Debug, Clone)]
pub struct Policies {
  pub outlets: FreshnessPolicy,
  pub sales: FreshnessPolicy,
  pub dashboard_stats: FreshnessPolicy,
}

impl Policies {
  pub fn from_config(ttl: &TtlConfig) -> Self {
    Self {
      outlets: FreshnessPolicy::new(keys::OUTLETS, minutes(ttl.outlets_minutes)),
      sales: FreshnessPolicy::new(keys::SALES, minutes(ttl.sales_minutes)),
      dashboard_stats: FreshnessPolicy::new(
        keys::DASHBOARD_STATS,
        minutes(ttl.dashboard_stats_minutes),
      ),
    }
  }
}

impl Default for Policies {
  fn default() -> Self {
    Self::from_config(&TtlConfig::default())
  }
}

/// `0` disables expiry.
fn minutes(value: u64) -> Option<Duration> {
  (value > 0).then(|| Duration::from_secs(value * 60))
}
