//! # Executor configuration.
//!
//! [`ExecutorConfig`] holds the values the worker reads while it runs. They are
//! fixed at construction through [`ExecutorBuilder`](crate::ExecutorBuilder).

use crate::reporter::{DEFAULT_REPORT_BACKOFF, DEFAULT_REPORT_MAX_RETRIES};
use crate::retry::LimitSince;

use std::time::Duration;

/// Default bounded wait of one queue poll; also the worst-case stop latency.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Runtime configuration of one executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
  /// Address reported to the coordinator as the executor of each trigger.
  pub worker_address: String,
  /// How long one queue poll waits before the stop flag is re-checked.
  pub poll_timeout: Duration,
  /// Retries after the first failed status report.
  pub report_max_retries: u32,
  /// Pause between status report attempts.
  pub report_backoff: Duration,
  /// Window used when counting successful runs against `limit_times`.
  pub limit_since: LimitSince,
}

impl ExecutorConfig {
  /// Defaults for everything but the address:
  /// - `poll_timeout = 3s`
  /// - `report_max_retries = 3`
  /// - `report_backoff = 3s`
  /// - `limit_since = LimitSince::TriggerUpdateTime`
  pub fn new(worker_address: impl Into<String>) -> Self {
    Self {
      worker_address: worker_address.into(),
      poll_timeout: DEFAULT_POLL_TIMEOUT,
      report_max_retries: DEFAULT_REPORT_MAX_RETRIES,
      report_backoff: DEFAULT_REPORT_BACKOFF,
      limit_since: LimitSince::default(),
    }
  }
}
