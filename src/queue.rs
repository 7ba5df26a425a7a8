//! Unbounded FIFO of pending triggers with keyed removal and a bounded-wait pop.

use crate::trigger::{LogId, TriggerRequest};

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRejection {
  /// The log id is already queued or in flight.
  Duplicate,
  /// The queue was closed by the final drain.
  Closed,
}

#[derive(Debug, Default)]
struct QueueState {
  entries: VecDeque<TriggerRequest>,
  /// Dedup set: ids present in `entries`.
  queued: HashSet<LogId>,
  /// Ids handed out by a pop and not yet released.
  in_flight: HashSet<LogId>,
  closed: bool,
}

/// The trigger queue of one executor.
///
/// Every method takes the same lock, so a log id moves between "queued",
/// "in flight" and "gone" atomically with respect to concurrent `push`,
/// `remove_by_key` and the consumer's pop.
#[derive(Debug, Default)]
pub struct TriggerQueue {
  state: Mutex<QueueState>,
  available: Notify,
}

impl TriggerQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends `trigger` unless its log id is already queued or in flight. Never blocks.
  pub fn push(&self, trigger: TriggerRequest) -> Result<(), PushRejection> {
    {
      let mut state = self.state.lock();
      if state.closed {
        return Err(PushRejection::Closed);
      }
      let log_id = trigger.log_id;
      if state.queued.contains(&log_id) || state.in_flight.contains(&log_id) {
        return Err(PushRejection::Duplicate);
      }
      state.queued.insert(log_id);
      state.entries.push_back(trigger);
      trace!(log_id, queued = state.entries.len(), "Trigger queued.");
    }
    self.available.notify_one();
    Ok(())
  }

  /// Pops the oldest trigger without waiting. The popped id is marked in flight.
  pub fn try_pop(&self) -> Option<TriggerRequest> {
    let mut state = self.state.lock();
    let trigger = state.entries.pop_front()?;
    state.queued.remove(&trigger.log_id);
    state.in_flight.insert(trigger.log_id);
    Some(trigger)
  }

  /// Waits up to `timeout` for a trigger. `None` means the wait timed out.
  pub async fn pop_with_timeout(&self, timeout: Duration) -> Option<TriggerRequest> {
    let deadline = Instant::now() + timeout;
    loop {
      if let Some(trigger) = self.try_pop() {
        return Some(trigger);
      }
      // A push between `try_pop` and here leaves a stored permit, so this wakes immediately.
      let notified = self.available.notified();
      if tokio::time::timeout_at(deadline, notified).await.is_err() {
        return self.try_pop();
      }
    }
  }

  /// Marks a popped trigger as finished so its log id may be submitted again.
  pub fn release(&self, log_id: LogId) -> bool {
    self.state.lock().in_flight.remove(&log_id)
  }

  /// Removes a still-queued trigger. Returns `false` when it is not waiting here
  /// (already popped, or never queued).
  pub fn remove_by_key(&self, log_id: LogId) -> bool {
    let mut state = self.state.lock();
    if !state.queued.remove(&log_id) {
      return false;
    }
    state.entries.retain(|t| t.log_id != log_id);
    true
  }

  /// Whether `log_id` is waiting, or was popped and not yet released.
  pub fn is_tracked(&self, log_id: LogId) -> bool {
    let state = self.state.lock();
    state.queued.contains(&log_id) || state.in_flight.contains(&log_id)
  }

  #[cfg(test)]
  pub fn is_queued(&self, log_id: LogId) -> bool {
    self.state.lock().queued.contains(&log_id)
  }

  /// Number of triggers waiting to be popped.
  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Closes the queue to further pushes and returns everything still waiting, in order.
  pub fn close_and_drain(&self) -> Vec<TriggerRequest> {
    let mut state = self.state.lock();
    state.closed = true;
    state.queued.clear();
    state.entries.drain(..).collect()
  }

  #[cfg(test)]
  pub fn is_closed(&self) -> bool {
    self.state.lock().closed
  }
}
