//! Fixtures and fakes shared by unit tests.

use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::dms::types::{DashboardStats, Outlet, Sale};
use crate::dms::DmsApi;
use crate::error::RemoteFetchError;
use crate::net::Connectivity;
use crate::sync::{ExecuteError, OperationExecutor, QueuedOperation, SyncNotifier};

pub fn outlet(id: &str, region: &str, is_active: bool) -> Outlet {
  Outlet {
    id: id.to_string(),
    name: format!("Outlet {}", region),
    region: region.to_string(),
    total_order: 100,
    is_active,
  }
}

pub fn sale(id: &str, outlet_id: &str, quantity: u32) -> Sale {
  Sale {
    id: id.to_string(),
    outlet_id: outlet_id.to_string(),
    date: "2024-01-15".to_string(),
    product_name: "Product A".to_string(),
    quantity,
    unit_price: 50000.0,
    total_amount: 50000.0 * f64::from(quantity),
    customer_name: "PT ABC".to_string(),
    payment_method: "Cash".to_string(),
  }
}

/// Serve `app` on an ephemeral loopback port and return its base url.
pub async fn serve(app: Router) -> Url {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  Url::parse(&format!("http://{}/", addr)).unwrap()
}

/// Connectivity switched by hand, counting authoritative checks.
pub struct FakeConnectivity {
  online: AtomicBool,
  checks: AtomicUsize,
}

impl FakeConnectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
      checks: AtomicUsize::new(0),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn checks(&self) -> usize {
    self.checks.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Connectivity for FakeConnectivity {
  fn is_online_cached(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  async fn check_now(&self) -> bool {
    self.checks.fetch_add(1, Ordering::SeqCst);
    self.online.load(Ordering::SeqCst)
  }
}

/// In-memory remote with canned data.
#[derive(Default)]
pub struct FakeApi {
  outlets: Mutex<Vec<Outlet>>,
  sales: Mutex<Vec<Sale>>,
  stats: Mutex<Option<DashboardStats>>,
  calls: AtomicUsize,
}

impl FakeApi {
  pub fn set_outlets(&self, outlets: Vec<Outlet>) {
    *self.outlets.lock().unwrap() = outlets;
  }

  pub fn set_sales(&self, sales: Vec<Sale>) {
    *self.sales.lock().unwrap() = sales;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  fn called(&self) {
    self.calls.fetch_add(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl DmsApi for FakeApi {
  async fn get_outlets(&self) -> Result<Vec<Outlet>, RemoteFetchError> {
    self.called();
    Ok(self.outlets.lock().unwrap().clone())
  }

  async fn get_outlet(&self, id: &str) -> Result<Outlet, RemoteFetchError> {
    self.called();
    self
      .outlets
      .lock()
      .unwrap()
      .iter()
      .find(|o| o.id == id)
      .cloned()
      .ok_or_else(|| RemoteFetchError::NotFound(format!("outlet {}", id)))
  }

  async fn get_sales_by_outlet(&self, outlet_id: &str) -> Result<Vec<Sale>, RemoteFetchError> {
    self.called();
    Ok(
      self
        .sales
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.outlet_id == outlet_id)
        .cloned()
        .collect(),
    )
  }

  async fn get_all_sales(&self) -> Result<Vec<Sale>, RemoteFetchError> {
    self.called();
    Ok(self.sales.lock().unwrap().clone())
  }

  async fn get_dashboard_stats(&self) -> Result<DashboardStats, RemoteFetchError> {
    self.called();
    self
      .stats
      .lock()
      .unwrap()
      .clone()
      .ok_or_else(|| RemoteFetchError::Rejected("no statistics".to_string()))
  }
}

/// Notifier that remembers every report.
#[derive(Default)]
pub struct RecordingNotifier {
  reports: Mutex<Vec<(usize, usize)>>,
}

impl RecordingNotifier {
  pub fn reports(&self) -> Vec<(usize, usize)> {
    self.reports.lock().unwrap().clone()
  }
}

impl SyncNotifier for RecordingNotifier {
  fn sync_completed(&self, succeeded: usize, failed: usize) {
    self.reports.lock().unwrap().push((succeeded, failed));
  }
}

/// Executor that records entity ids and fails on demand.
pub struct ScriptedExecutor {
  executed: Mutex<Vec<String>>,
  fail_all: AtomicBool,
  failing: Mutex<Vec<String>>,
  delay: Mutex<Duration>,
}

impl ScriptedExecutor {
  pub fn new() -> Self {
    Self {
      executed: Mutex::new(Vec::new()),
      fail_all: AtomicBool::new(false),
      failing: Mutex::new(Vec::new()),
      delay: Mutex::new(Duration::ZERO),
    }
  }

  pub fn fail_always(&self) {
    self.fail_all.store(true, Ordering::SeqCst);
  }

  pub fn fail_for(&self, entity_id: &str) {
    self.failing.lock().unwrap().push(entity_id.to_string());
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn executed(&self) -> Vec<String> {
    self.executed.lock().unwrap().clone()
  }
}

#[async_trait]
impl OperationExecutor for ScriptedExecutor {
  async fn execute(&self, operation: &QueuedOperation) -> Result<(), ExecuteError> {
    let entity_id = operation.entity_id().unwrap_or_default().to_string();
    self.executed.lock().unwrap().push(entity_id.clone());

    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let fails = self.fail_all.load(Ordering::SeqCst)
      || self.failing.lock().unwrap().contains(&entity_id);
    if fails {
      return Err(ExecuteError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
    }
    Ok(())
  }
}
