//! Serde-deserializable envelopes matching the DMS API responses.
//!
//! Every endpoint answers `{ success, <payload>, total?, message? }`. A
//! `success: false` answer is turned into [`RemoteFetchError::Rejected`] so
//! callers handle it exactly like a transport failure.

use serde::Deserialize;

use super::types::{DashboardStats, Outlet, RegionSalesStat, Sale};
use crate::error::RemoteFetchError;

fn rejected(message: Option<String>, what: &str) -> RemoteFetchError {
  RemoteFetchError::Rejected(message.unwrap_or_else(|| format!("failed to fetch {}", what)))
}

// ============================================================================
// Outlets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiOutletsResponse {
  pub success: bool,
  #[serde(default)]
  pub outlets: Vec<Outlet>,
  #[serde(default)]
  pub total: u64,
  pub message: Option<String>,
}

impl ApiOutletsResponse {
  pub fn into_result(self) -> Result<Vec<Outlet>, RemoteFetchError> {
    if self.success {
      Ok(self.outlets)
    } else {
      Err(rejected(self.message, "outlets"))
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiOutletResponse {
  pub success: bool,
  pub outlet: Option<Outlet>,
  pub message: Option<String>,
}

impl ApiOutletResponse {
  pub fn into_result(self, id: &str) -> Result<Outlet, RemoteFetchError> {
    match (self.success, self.outlet) {
      (true, Some(outlet)) => Ok(outlet),
      (true, None) => Err(RemoteFetchError::NotFound(format!("outlet {}", id))),
      (false, _) => Err(rejected(self.message, "outlet")),
    }
  }
}

// ============================================================================
// Sales
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSalesResponse {
  pub success: bool,
  #[serde(default)]
  pub sales: Vec<Sale>,
  #[serde(default)]
  pub total: u64,
  pub message: Option<String>,
}

impl ApiSalesResponse {
  pub fn into_result(self) -> Result<Vec<Sale>, RemoteFetchError> {
    if self.success {
      Ok(self.sales)
    } else {
      Err(rejected(self.message, "sales"))
    }
  }
}

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDashboardStatsResponse {
  pub success: bool,
  #[serde(default)]
  pub stats: Vec<RegionSalesStat>,
  #[serde(default)]
  pub total_sales: f64,
  #[serde(default)]
  pub total_outlets: u32,
  pub message: Option<String>,
}

impl ApiDashboardStatsResponse {
  pub fn into_result(self) -> Result<DashboardStats, RemoteFetchError> {
    if !self.success {
      return Err(rejected(self.message, "dashboard statistics"));
    }
    Ok(DashboardStats {
      id: DashboardStats::CURRENT.to_string(),
      stats: self.stats,
      total_sales: self.total_sales,
      total_outlets: self.total_outlets,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_unsuccessful_envelope_is_rejected() {
    let response: ApiOutletsResponse =
      serde_json::from_value(json!({"success": false, "message": "maintenance"})).unwrap();
    let err = response.into_result().unwrap_err();
    assert!(matches!(err, RemoteFetchError::Rejected(m) if m == "maintenance"));
  }

  #[test]
  fn test_missing_outlet_is_not_found() {
    let response: ApiOutletResponse =
      serde_json::from_value(json!({"success": true, "outlet": null})).unwrap();
    assert!(matches!(
      response.into_result("9"),
      Err(RemoteFetchError::NotFound(_))
    ));
  }

  #[test]
  fn test_dashboard_envelope_gets_snapshot_id() {
    let response: ApiDashboardStatsResponse = serde_json::from_value(json!({
      "success": true,
      "stats": [{"region": "Bali", "totalSales": 5700000, "outletCount": 1, "averageSales": 5700000}],
      "totalSales": 5700000,
      "totalOutlets": 1
    }))
    .unwrap();
    let stats = response.into_result().unwrap();
    assert_eq!(stats.id, DashboardStats::CURRENT);
    assert_eq!(stats.stats[0].region, "Bali");
  }
}
