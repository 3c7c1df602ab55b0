use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of write recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::Create => "create",
      OperationKind::Update => "update",
      OperationKind::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "create" => Some(OperationKind::Create),
      "update" => Some(OperationKind::Update),
      "delete" => Some(OperationKind::Delete),
      _ => None,
    }
  }
}

/// Entity kinds that accept writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  Sale,
  Outlet,
}

impl EntityType {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityType::Sale => "sale",
      EntityType::Outlet => "outlet",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "sale" => Some(EntityType::Sale),
      "outlet" => Some(EntityType::Outlet),
      _ => None,
    }
  }

  /// Remote collection the entity lives in.
  pub fn collection(&self) -> &'static str {
    match self {
      EntityType::Sale => "sales",
      EntityType::Outlet => "outlets",
    }
  }
}

/// A write waiting to be replayed against the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
  pub id: String,
  pub kind: OperationKind,
  pub entity_type: EntityType,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

impl QueuedOperation {
  pub fn new(kind: OperationKind, entity_type: EntityType, payload: Value) -> Self {
    let enqueued_at = Utc::now();
    Self {
      id: operation_id(enqueued_at),
      kind,
      entity_type,
      payload,
      enqueued_at,
      retry_count: 0,
    }
  }

  /// Id of the affected entity, taken from the payload.
  pub fn entity_id(&self) -> Option<&str> {
    self.payload.get("id").and_then(Value::as_str)
  }
}

/// `q_<unix millis>_<random suffix>`: sortable by enqueue time, unique across
/// operations enqueued within the same millisecond.
fn operation_id(at: DateTime<Utc>) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("q_{}_{}", at.timestamp_millis(), &suffix[..9])
}
