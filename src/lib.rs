//! TriggerKeeper: a single-queue task executor for coordinator-dispatched jobs.
//!
//! A remote coordinator (the scheduling server) dispatches *triggers*, one
//! request per run of a job, to workers. Each [`JobExecutor`] owns the FIFO
//! queue of one job handler and runs its triggers strictly one at a time on a
//! dedicated Tokio task, reporting every execution back to the coordinator.
//!
//! # Features
//!
//! - Non-blocking submission with duplicate rejection by log id, covering both
//!   waiting and executing triggers.
//! - Exactly one "executing" and one "finished" status report per attempt, each
//!   delivered with a bounded fixed-backoff retry.
//! - Retry chains: a failed attempt with remaining budget is reported as
//!   non-final and handed back to the coordinator for another attempt, carrying
//!   the id of the chain's first attempt.
//! - Run limits: after enough successful runs the coordinator is asked to stop
//!   the job's schedule.
//! - Cooperative stop, per-trigger kill and queued-trigger removal. Triggers
//!   left in the queue when a stop is observed are reported as failed with the
//!   stop reason.
//! - Panicking or erroring handlers never take the worker loop down.
//! - Built-in metrics (queryable through [`MetricsSnapshot`]).
//! - Optional task-local execution context ([`TaskContext`], `task_context` feature).
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use triggerkeeper::{
//!     CoordinatorClient, ExecutionResult, FnHandler, JobExecutor, TriggerRequest,
//! };
//!
//! # async fn run(coordinator: Arc<dyn CoordinatorClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let handler = FnHandler::new(|params| {
//!     Box::pin(async move {
//!         tracing::info!(count = params.len(), "Running job.");
//!         Ok(Some(ExecutionResult::success()))
//!     })
//! });
//!
//! let executor = JobExecutor::builder()
//!     .handler(Arc::new(handler))
//!     .coordinator(coordinator)
//!     .worker_address("10.0.0.7:9999")
//!     .build()?;
//!
//! // Triggers normally arrive from the coordinator's dispatch call.
//! executor.submit(TriggerRequest::new(1001, 7).with_retry_times(2))?;
//!
//! // Later: stop, fail whatever is still queued, and wait for the loop.
//! executor
//!     .shutdown("job handler replaced", Some(Duration::from_secs(10)))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Use the [`ExecutorBuilder`]:
//! - `handler`, `coordinator`, `worker_address`: required.
//! - `task_log`: per-execution log destination ([`NoopTaskLog`] by default, or [`FileTaskLog`]).
//! - `poll_timeout`: bounded queue wait, the worst-case delay before a stop is noticed.
//! - `report_max_retries`, `report_backoff`: status report retry policy.
//! - `limit_since`: counting window for run limits. See [`LimitSince`].
//!
//! # Observability
//!
//! - Metrics through [`JobExecutor::metrics_snapshot`].
//! - Every execution runs inside a `trigger_exec` tracing span carrying the
//!   executor id, log id, job id and retry chain id.

// --- Feature-gated Documentation ---

#[cfg(all(doc, feature = "task_context"))]
pub mod task_context_docs {
  //! # Accessing the Task Context (`task_context` feature)
  //!
  //! While a handler runs, the worker installs a task-local [`TaskContext`](crate::TaskContext)
  //! describing the trigger being executed:
  //!
  //! 1.  **`try_get_current_task_context() -> Option<TaskContext>`**: returns `None`
  //!     outside a worker-managed execution.
  //! 2.  **`task_context!() -> TaskContext`**: panics outside a worker-managed execution.
  //!
  //! ```no_run
  //! # #[cfg(feature = "task_context")] {
  //! use triggerkeeper::{task_context, try_get_current_task_context, ExecutionResult, FnHandler};
  //!
  //! let handler = FnHandler::new(|_params| Box::pin(async {
  //!     if let Some((index, total)) = try_get_current_task_context().and_then(|ctx| ctx.shard()) {
  //!         println!("shard {}/{}", index, total);
  //!     }
  //!     let ctx = task_context!();
  //!     println!("log {} of job {}", ctx.log_id, ctx.job_id);
  //!     Ok(Some(ExecutionResult::success()))
  //! }));
  //! # }
  //! ```
}

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod handler;
pub mod metrics;
mod queue;
mod registry;
pub mod reporter;
pub mod retry;
pub mod task_log;
pub mod trigger;
mod worker;

// --- Public Re-exports ---

pub use config::ExecutorConfig;
pub use executor::{ExecutorBuilder, JobExecutor};
pub use worker::WorkerStatus;

pub use error::{BuildError, CoordinatorError, ReportError, ShutdownError, SubmitError};

pub use coordinator::CoordinatorClient;
pub use handler::{FnHandler, HandlerFuture, JobHandler, TaskLogger};
pub use retry::LimitSince;
pub use task_log::{FileTaskLog, NoopTaskLog, TaskLogManager};
pub use trigger::{ActorParams, ExecutionResult, JobId, LogId, ResultCode, TriggerRequest};

#[cfg(feature = "task_context")]
pub use trigger::context::{try_get_current_task_context, TaskContext};

pub use metrics::{ExecutorMetrics, MetricsSnapshot};

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`,
/// defaulting to `info`. Returns `false` if a global subscriber was already set.
#[cfg(feature = "tracing_subscriber")]
pub fn init_tracing() -> bool {
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .try_init()
    .is_ok()
}
