//! DMS domain: outlets, sales and dashboard statistics.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cache::{keys, Policies};
pub use cached_client::{CacheStats, CachedDmsClient};
pub use client::{DmsApi, HttpDmsApi};
pub use types::{partition_active, total_sales_by_outlet, DashboardStats, Outlet, RegionSalesStat, Sale};
