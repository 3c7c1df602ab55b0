//! Offline write queue and its replay against the remote.

mod executor;
mod notifier;
mod operation;
mod queue;

pub use executor::{ExecuteError, HttpExecutor, OperationExecutor};
pub use notifier::{summary, LogNotifier, SyncNotifier};
pub use operation::{EntityType, OperationKind, QueuedOperation};
pub use queue::{DrainResult, MutationQueue, DEFAULT_MAX_RETRIES};

pub(crate) use executor::join as join_url;

use std::sync::Arc;
use tracing::debug;

use crate::net::ConnectivityProbe;
use crate::observable::Subscription;

/// Start a queue pass every time the probe confirms the remote came back.
pub fn attach_auto_sync(probe: &ConnectivityProbe, queue: Arc<MutationQueue>) -> Subscription {
  probe.on_online(move || {
    debug!("connectivity restored, replaying queue");
    queue.schedule_processing();
  })
}
