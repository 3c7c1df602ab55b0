use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::api_types::{
  ApiDashboardStatsResponse, ApiOutletResponse, ApiOutletsResponse, ApiSalesResponse,
};
use super::types::{DashboardStats, Outlet, Sale};
use crate::error::RemoteFetchError;
use crate::sync::join_url;

/// Remote collaborator for DMS data.
#[async_trait]
pub trait DmsApi: Send + Sync {
  async fn get_outlets(&self) -> Result<Vec<Outlet>, RemoteFetchError>;
  async fn get_outlet(&self, id: &str) -> Result<Outlet, RemoteFetchError>;
  async fn get_sales_by_outlet(&self, outlet_id: &str) -> Result<Vec<Sale>, RemoteFetchError>;
  async fn get_all_sales(&self) -> Result<Vec<Sale>, RemoteFetchError>;
  async fn get_dashboard_stats(&self) -> Result<DashboardStats, RemoteFetchError>;
}

/// DMS REST API client
#[derive(Clone)]
pub struct HttpDmsApi {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpDmsApi {
  pub fn new(base_url: Url, token: Option<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url,
      token,
    }
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteFetchError> {
    let url = join_url(&self.base_url, path)?;
    debug!(%url, "GET");

    let mut request = self.client.get(url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    // Error statuses still carry the envelope, parse it for the message
    let envelope = response.json::<T>().await?;
    Ok(envelope)
  }
}

#[async_trait]
impl DmsApi for HttpDmsApi {
  async fn get_outlets(&self) -> Result<Vec<Outlet>, RemoteFetchError> {
    self.get::<ApiOutletsResponse>("outlets").await?.into_result()
  }

  async fn get_outlet(&self, id: &str) -> Result<Outlet, RemoteFetchError> {
    self
      .get::<ApiOutletResponse>(&format!("outlets/{}", id))
      .await?
      .into_result(id)
  }

  async fn get_sales_by_outlet(&self, outlet_id: &str) -> Result<Vec<Sale>, RemoteFetchError> {
    self
      .get::<ApiSalesResponse>(&format!("outlets/{}/sales", outlet_id))
      .await?
      .into_result()
  }

  async fn get_all_sales(&self) -> Result<Vec<Sale>, RemoteFetchError> {
    self.get::<ApiSalesResponse>("sales").await?.into_result()
  }

  async fn get_dashboard_stats(&self) -> Result<DashboardStats, RemoteFetchError> {
    self
      .get::<ApiDashboardStatsResponse>("dashboard/stats")
      .await?
      .into_result()
  }
}
