use tracing::{info, warn};

/// Receives the outcome of each queue processing pass.
///
/// Injected into the queue so it never depends on a presentation layer.
pub trait SyncNotifier: Send + Sync {
  fn sync_completed(&self, succeeded: usize, failed: usize);
}

/// Notifier that writes the sync summary to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SyncNotifier for LogNotifier {
  fn sync_completed(&self, succeeded: usize, failed: usize) {
    let Some(message) = summary(succeeded, failed) else {
      return;
    };
    if failed == 0 {
      info!("{}", message);
    } else {
      warn!("{}", message);
    }
  }
}

/// Human readable summary of a pass, or `None` when nothing happened.
pub fn summary(succeeded: usize, failed: usize) -> Option<String> {
  match (succeeded, failed) {
    (0, 0) => None,
    (s, 0) => Some(format!("Successfully synced {} {}", s, operations(s))),
    (0, f) => Some(format!("Failed to sync {} {}", f, operations(f))),
    (s, f) => Some(format!("Synced {} {}, {} failed", s, operations(s), f)),
  }
}

fn operations(n: usize) -> &'static str {
  if n == 1 {
    "operation"
  } else {
    "operations"
  }
}
