use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point of sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outlet {
  pub id: String,
  pub name: String,
  pub region: String,
  pub total_order: u64,
  pub is_active: bool,
}

/// A single sales record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
  pub id: String,
  pub outlet_id: String,
  pub date: String, // YYYY-MM-DD
  pub product_name: String,
  pub quantity: u32,
  pub unit_price: f64,
  pub total_amount: f64,
  pub customer_name: String,
  pub payment_method: String,
}

/// Aggregated sales of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSalesStat {
  pub region: String,
  pub total_sales: f64,
  pub outlet_count: u32,
  pub average_sales: f64,
}

/// Dashboard statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
  pub id: String,
  pub stats: Vec<RegionSalesStat>,
  pub total_sales: f64,
  pub total_outlets: u32,
}

impl DashboardStats {
  /// Id of the single cached snapshot.
  pub const CURRENT: &'static str = "current";
}

/// Split outlets into `(active, inactive)`, keeping order.
pub fn partition_active(outlets: &[Outlet]) -> (Vec<Outlet>, Vec<Outlet>) {
  outlets.iter().cloned().partition(|o| o.is_active)
}

/// Total sales amount per outlet id.
pub fn total_sales_by_outlet(sales: &[Sale]) -> BTreeMap<String, f64> {
  let mut totals = BTreeMap::new();
  for sale in sales {
    *totals.entry(sale.outlet_id.clone()).or_insert(0.0) += sale.total_amount;
  }
  totals
}
