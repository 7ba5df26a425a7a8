use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Atomic counters for one executor.
///
/// Cloning only clones the `Arc`s, so the worker loop, the reporter and the
/// public handle all update the same values.
#[derive(Debug, Clone, Default)]
pub struct ExecutorMetrics {
  // --- Counters ---
  /// Triggers accepted by `submit`.
  pub triggers_submitted: Arc<AtomicUsize>,
  /// Submissions rejected because the log id was queued or in flight.
  pub triggers_rejected_duplicate: Arc<AtomicUsize>,
  /// Submissions rejected because the executor was stopping.
  pub triggers_rejected_stopped: Arc<AtomicUsize>,
  pub executions_success: Arc<AtomicUsize>,
  /// Executions that returned a failed result, an error, or no result.
  pub executions_fail: Arc<AtomicUsize>,
  pub executions_panicked: Arc<AtomicUsize>,
  /// Retry requests accepted by the coordinator.
  pub retries_resubmitted: Arc<AtomicUsize>,
  /// Retry requests refused or lost in transport.
  pub retries_lost: Arc<AtomicUsize>,
  /// Queued triggers failed by the final drain after a stop.
  pub triggers_drained: Arc<AtomicUsize>,
  /// Queued triggers removed by `remove_queued_task`.
  pub triggers_removed: Arc<AtomicUsize>,
  pub kills_requested: Arc<AtomicUsize>,
  /// Status reports abandoned after exhausting their attempts.
  pub reports_failed: Arc<AtomicUsize>,

  // --- Histograms ---
  pub execution_duration: Arc<SimpleHistogram>,
}

impl ExecutorMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time copy of the counters.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      triggers_submitted: self.triggers_submitted.load(order),
      triggers_rejected_duplicate: self.triggers_rejected_duplicate.load(order),
      triggers_rejected_stopped: self.triggers_rejected_stopped.load(order),
      executions_success: self.executions_success.load(order),
      executions_fail: self.executions_fail.load(order),
      executions_panicked: self.executions_panicked.load(order),
      retries_resubmitted: self.retries_resubmitted.load(order),
      retries_lost: self.retries_lost.load(order),
      triggers_drained: self.triggers_drained.load(order),
      triggers_removed: self.triggers_removed.load(order),
      kills_requested: self.kills_requested.load(order),
      reports_failed: self.reports_failed.load(order),
      execution_duration_count: self.execution_duration.get_count(),
      execution_duration_sum_micros: self.execution_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the executor's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
  pub triggers_submitted: usize,
  pub triggers_rejected_duplicate: usize,
  pub triggers_rejected_stopped: usize,
  pub executions_success: usize,
  pub executions_fail: usize,
  pub executions_panicked: usize,
  pub retries_resubmitted: usize,
  pub retries_lost: usize,
  pub triggers_drained: usize,
  pub triggers_removed: usize,
  pub kills_requested: usize,
  pub reports_failed: usize,
  pub execution_duration_count: usize,
  pub execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Total executions regardless of outcome.
  pub fn executions_total(&self) -> usize {
    self.executions_success + self.executions_fail + self.executions_panicked
  }

  /// Mean execution duration, if any execution completed.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    if self.execution_duration_count == 0 {
      None
    } else {
      Some(Duration::from_micros(
        (self.execution_duration_sum_micros / self.execution_duration_count) as u64,
      ))
    }
  }
}
