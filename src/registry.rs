//! Which handler is executing which trigger right now.

use crate::handler::JobHandler;
use crate::trigger::LogId;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

/// Maps in-flight log ids to the handler executing them.
///
/// Kill requests look up and invoke the handler under the registry lock, so a
/// kill can never reach a handler whose entry was already unregistered (the
/// handler is shared by every execution, and a late kill would land on the next
/// one). `JobHandler::kill` is therefore required not to block.
#[derive(Default)]
pub struct InFlightRegistry {
  entries: Mutex<HashMap<LogId, Arc<dyn JobHandler>>>,
}

impl InFlightRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, log_id: LogId, handler: Arc<dyn JobHandler>) {
    let mut entries = self.entries.lock();
    if !entries.is_empty() {
      warn!(log_id, in_flight = entries.len(), "Registering a trigger while another is still in flight.");
    }
    entries.insert(log_id, handler);
  }

  pub fn unregister(&self, log_id: LogId) -> bool {
    self.entries.lock().remove(&log_id).is_some()
  }

  #[cfg(test)]
  pub fn contains(&self, log_id: LogId) -> bool {
    self.entries.lock().contains_key(&log_id)
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Kills the handler executing `log_id`. Returns `false` if `log_id` is not in flight.
  pub fn kill(&self, log_id: LogId) -> bool {
    let entries = self.entries.lock();
    match entries.get(&log_id) {
      Some(handler) => {
        kill_quietly(handler.as_ref(), log_id);
        true
      }
      None => false,
    }
  }

  /// Kills every in-flight handler and detaches its logger. Returns the affected ids.
  pub fn kill_all(&self) -> Vec<LogId> {
    let entries = self.entries.lock();
    entries
      .iter()
      .map(|(log_id, handler)| {
        kill_quietly(handler.as_ref(), *log_id);
        handler.clear_logger();
        *log_id
      })
      .collect()
  }
}

/// Calls `handler.kill()`, logging and swallowing errors and panics.
pub(crate) fn kill_quietly(handler: &dyn JobHandler, log_id: LogId) {
  match catch_unwind(AssertUnwindSafe(|| handler.kill())) {
    Ok(Ok(())) => info!(log_id, "Kill signal delivered to handler."),
    Ok(Err(e)) => error!(log_id, error = %e, "Handler kill failed."),
    Err(_) => error!(log_id, "Handler panicked while being killed."),
  }
}
