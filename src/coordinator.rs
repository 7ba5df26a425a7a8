//! Boundary to the remote coordinator (the scheduling server).
//!
//! Only the calls the executor issues are modelled here; the transport behind
//! them belongs to the implementation.

use crate::error::CoordinatorError;
use crate::trigger::{ActorParams, ExecutionResult, JobId, LogId};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Client for the coordinator calls the executor makes.
///
/// Implementations are expected to enforce their own per-call transport timeout.
/// The executor wraps the two status calls in a bounded retry loop; every other
/// call is issued at most once per occasion.
#[async_trait]
pub trait CoordinatorClient: Send + Sync + 'static {
  /// Marks `log_id` as running on the executor reachable at `worker_address`.
  async fn update_status_executing(
    &self,
    log_id: LogId,
    worker_address: &str,
  ) -> Result<(), CoordinatorError>;

  /// Records the result of `log_id`. `is_terminal` is false when another attempt
  /// of the same chain is about to be requested.
  async fn update_status_finished(
    &self,
    log_id: LogId,
    result: &ExecutionResult,
    is_terminal: bool,
  ) -> Result<(), CoordinatorError>;

  /// Asks the coordinator to dispatch another attempt of `job_id` with `params`.
  async fn trigger_retry(&self, job_id: JobId, params: ActorParams)
    -> Result<bool, CoordinatorError>;

  /// Stops the schedule of `job_id`.
  async fn stop_job(&self, job_id: JobId) -> Result<bool, CoordinatorError>;

  /// Number of failed attempts already recorded for the retry chain `retry_log_id`.
  async fn count_failed_attempts(&self, retry_log_id: LogId) -> Result<u32, CoordinatorError>;

  /// Number of successful runs of `job_id` since `since`.
  async fn count_successful_runs(
    &self,
    job_id: JobId,
    since: DateTime<Utc>,
  ) -> Result<u64, CoordinatorError>;
}
