//! Replay of queued operations against the remote API.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use super::operation::{OperationKind, QueuedOperation};

/// Failure to apply one queued operation remotely.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("invalid url: {0}")]
  Url(#[from] url::ParseError),

  #[error("{entity} payload has no id")]
  MissingId { entity: &'static str },

  #[error("server answered {0}")]
  Status(StatusCode),
}

/// Applies a queued operation to the remote.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
  async fn execute(&self, operation: &QueuedOperation) -> Result<(), ExecuteError>;
}

/// REST mapping of queued operations.
///
/// - `create` → `POST /<collection>` with an `Idempotency-Key` of the
///   operation id, so a replayed create cannot duplicate
/// - `update` → `PUT /<collection>/<id>`
/// - `delete` → `DELETE /<collection>/<id>`; a `404` means already gone
#[derive(Clone)]
pub struct HttpExecutor {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpExecutor {
  pub fn new(base_url: Url, token: Option<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url,
      token,
    }
  }

  fn endpoint(&self, operation: &QueuedOperation) -> Result<(Method, Url), ExecuteError> {
    let collection = operation.entity_type.collection();
    let entity_url = |op: &QueuedOperation| -> Result<Url, ExecuteError> {
      let id = op.entity_id().ok_or(ExecuteError::MissingId {
        entity: op.entity_type.as_str(),
      })?;
      Ok(join(&self.base_url, &format!("{}/{}", collection, id))?)
    };

    Ok(match operation.kind {
      OperationKind::Create => (Method::POST, join(&self.base_url, collection)?),
      OperationKind::Update => (Method::PUT, entity_url(operation)?),
      OperationKind::Delete => (Method::DELETE, entity_url(operation)?),
    })
  }
}

#[async_trait]
impl OperationExecutor for HttpExecutor {
  async fn execute(&self, operation: &QueuedOperation) -> Result<(), ExecuteError> {
    let (method, url) = self.endpoint(operation)?;
    debug!(operation = %operation.id, %method, %url, "replaying operation");

    let mut request = self
      .client
      .request(method, url)
      .header("Idempotency-Key", &operation.id);
    if operation.kind != OperationKind::Delete {
      request = request.json(&operation.payload);
    }
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let status = request.send().await?.status();
    if status.is_success() {
      return Ok(());
    }
    if operation.kind == OperationKind::Delete && status == StatusCode::NOT_FOUND {
      return Ok(());
    }
    Err(ExecuteError::Status(status))
  }
}

/// Join `path` onto `base` treating `base` as a directory.
pub(crate) fn join(base: &Url, path: &str) -> Result<Url, url::ParseError> {
  let mut base = base.clone();
  if !base.path().ends_with('/') {
    base.set_path(&format!("{}/", base.path()));
  }
  base.join(path)
}
