use crate::trigger::LogId;

use thiserror::Error;

/// Errors that can occur while building an executor with `ExecutorBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("A job handler must be provided")]
  MissingHandler,
  #[error("A coordinator client must be provided")]
  MissingCoordinator,
  #[error("The worker address (`worker_address`) must be specified and non-empty")]
  MissingWorkerAddress,
  #[error("The queue poll timeout must be greater than zero")]
  ZeroPollTimeout,
}

/// Reasons a trigger submission is rejected.
///
/// The `Display` text doubles as the rejection message returned to the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error("repeat trigger job, logId:{0}")]
  Duplicate(LogId),
  #[error("executor is stopping ({reason}), trigger rejected")]
  Stopped { reason: String },
}

/// Errors surfaced by a `CoordinatorClient` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
  #[error("coordinator transport failure: {0}")]
  Transport(String),
  #[error("coordinator rejected the call (code {code}): {message}")]
  Rejected { code: i32, message: String },
  #[error("coordinator unavailable")]
  Unavailable,
}

/// A status report that could not be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
  #[error("status report for logId {log_id} gave up after {attempts} attempts: {source}")]
  Exhausted {
    log_id: LogId,
    attempts: u32,
    #[source]
    source: CoordinatorError,
  },
}

// --- Shutdown Errors ---

/// Errors while waiting for the worker loop to finish (`join`, `shutdown`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out waiting for the worker loop to complete shutdown.")]
  Timeout,
  #[error("The worker loop panicked.")]
  TaskPanic,
  #[error("The worker loop was already joined.")]
  AlreadyJoined,
}
