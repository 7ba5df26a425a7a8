use crate::config::ExecutorConfig;
use crate::coordinator::CoordinatorClient;
use crate::error::{BuildError, ShutdownError, SubmitError};
use crate::handler::JobHandler;
use crate::metrics::{ExecutorMetrics, MetricsSnapshot};
use crate::queue::PushRejection;
use crate::reporter::StatusReporter;
use crate::retry::{LimitSince, RetryPolicy};
use crate::task_log::{NoopTaskLog, TaskLogManager};
use crate::trigger::{ExecutionResult, LogId, TriggerRequest};
use crate::worker::{ExecutorShared, Worker, WorkerStatus};

use std::fmt;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stop reason recorded by [`JobExecutor::kill_task`].
pub const MANUAL_KILL_REASON: &str = "manual kill";

/// Builder for configuring and starting a [`JobExecutor`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use triggerkeeper::{CoordinatorClient, JobExecutor, JobHandler};
///
/// # async fn run(
/// #   handler: Arc<dyn JobHandler>,
/// #   coordinator: Arc<dyn CoordinatorClient>,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let executor = JobExecutor::builder()
///     .handler(handler)
///     .coordinator(coordinator)
///     .worker_address("10.0.0.7:9999")
///     .poll_timeout(Duration::from_secs(1))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ExecutorBuilder {
  handler: Option<Arc<dyn JobHandler>>,
  coordinator: Option<Arc<dyn CoordinatorClient>>,
  task_log: Arc<dyn TaskLogManager>,
  worker_address: Option<String>,
  poll_timeout: Duration,
  report_max_retries: u32,
  report_backoff: Duration,
  limit_since: LimitSince,
}

impl Default for ExecutorBuilder {
  fn default() -> Self {
    let defaults = ExecutorConfig::new("");
    Self {
      handler: None,
      coordinator: None,
      task_log: Arc::new(NoopTaskLog),
      worker_address: None,
      poll_timeout: defaults.poll_timeout,
      report_max_retries: defaults.report_max_retries,
      report_backoff: defaults.report_backoff,
      limit_since: defaults.limit_since,
    }
  }
}

impl fmt::Debug for ExecutorBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutorBuilder")
      .field("handler", &self.handler.as_ref().map(|_| format_args!("<JobHandler>")))
      .field("coordinator", &self.coordinator.as_ref().map(|_| format_args!("<CoordinatorClient>")))
      .field("worker_address", &self.worker_address)
      .field("poll_timeout", &self.poll_timeout)
      .field("report_max_retries", &self.report_max_retries)
      .field("report_backoff", &self.report_backoff)
      .field("limit_since", &self.limit_since)
      .finish()
  }
}

impl ExecutorBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the handler every trigger is executed with (required).
  pub fn handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
    self.handler = Some(handler);
    self
  }

  /// Sets the coordinator client used for status, retry and stop calls (required).
  pub fn coordinator(mut self, coordinator: Arc<dyn CoordinatorClient>) -> Self {
    self.coordinator = Some(coordinator);
    self
  }

  /// Sets the per-execution log manager. Defaults to [`NoopTaskLog`].
  pub fn task_log(mut self, task_log: Arc<dyn TaskLogManager>) -> Self {
    self.task_log = task_log;
    self
  }

  /// Sets the address reported to the coordinator (required).
  pub fn worker_address(mut self, address: impl Into<String>) -> Self {
    self.worker_address = Some(address.into());
    self
  }

  /// Sets the bounded wait of each queue poll. Stop requests are noticed within one poll.
  pub fn poll_timeout(mut self, timeout: Duration) -> Self {
    self.poll_timeout = timeout;
    self
  }

  /// Sets how many times a failed status report is retried.
  pub fn report_max_retries(mut self, retries: u32) -> Self {
    self.report_max_retries = retries;
    self
  }

  /// Sets the pause between status report attempts.
  pub fn report_backoff(mut self, backoff: Duration) -> Self {
    self.report_backoff = backoff;
    self
  }

  pub fn limit_since(mut self, limit_since: LimitSince) -> Self {
    self.limit_since = limit_since;
    self
  }

  /// Builds the executor and spawns its worker loop on the current Tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics if called outside a Tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns a [`BuildError`] when a required collaborator or the worker address
  /// is missing, or the poll timeout is zero.
  pub fn build(self) -> Result<JobExecutor, BuildError> {
    let handler = self.handler.ok_or(BuildError::MissingHandler)?;
    let coordinator = self.coordinator.ok_or(BuildError::MissingCoordinator)?;
    let worker_address = self
      .worker_address
      .filter(|address| !address.trim().is_empty())
      .ok_or(BuildError::MissingWorkerAddress)?;
    if self.poll_timeout.is_zero() {
      return Err(BuildError::ZeroPollTimeout);
    }

    let config = ExecutorConfig {
      worker_address,
      poll_timeout: self.poll_timeout,
      report_max_retries: self.report_max_retries,
      report_backoff: self.report_backoff,
      limit_since: self.limit_since,
    };

    let id = Uuid::new_v4();
    let metrics = ExecutorMetrics::new();
    let reporter = StatusReporter::new(
      coordinator.clone(),
      config.worker_address.clone(),
      config.report_max_retries,
      config.report_backoff,
      metrics.clone(),
    );
    let retry = RetryPolicy::new(coordinator, config.limit_since);
    let shared = Arc::new(ExecutorShared::new(
      id,
      config,
      handler,
      reporter,
      retry,
      self.task_log,
      metrics,
    ));

    let worker_shared = shared.clone();
    let loop_handle = Handle::current().spawn(async move {
      Worker::new(worker_shared).run().await;
    });
    info!(worker_id = %id, "Executor started.");

    Ok(JobExecutor {
      shared,
      loop_handle: Mutex::new(Some(loop_handle)),
    })
  }
}

/// A single-queue task executor for one job handler.
///
/// Triggers submitted here run strictly one at a time, in submission order, on a
/// dedicated worker task. Each execution is reported to the coordinator as
/// executing and then finished; failed attempts may be handed back to the
/// coordinator for another attempt according to the trigger's retry budget.
///
/// Failures inside the worker never surface as errors from these methods. They
/// become log records and a failed status report for the affected log id. The
/// only synchronous rejection is [`submit`](Self::submit) refusing a duplicate
/// or a trigger arriving after a stop.
///
/// Use [`JobExecutor::builder()`] to create one.
pub struct JobExecutor {
  shared: Arc<ExecutorShared>,
  loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for JobExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobExecutor")
      .field("id", &self.shared.id)
      .field("config", &self.shared.config)
      .field("status", &self.shared.status())
      .field("queued", &self.shared.queue.len())
      .field("in_flight", &self.shared.registry.len())
      .finish()
  }
}

impl JobExecutor {
  /// Returns a builder to configure and create a `JobExecutor`.
  pub fn builder() -> ExecutorBuilder {
    ExecutorBuilder::new()
  }

  /// Unique id of this executor, as it appears in logs.
  pub fn id(&self) -> Uuid {
    self.shared.id
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.shared.config
  }

  /// Queues `trigger` for execution. Never blocks.
  ///
  /// # Errors
  ///
  /// - [`SubmitError::Duplicate`]: the log id is already queued or executing here.
  /// - [`SubmitError::Stopped`]: a stop was requested; nothing more is accepted.
  pub fn submit(&self, trigger: TriggerRequest) -> Result<(), SubmitError> {
    let log_id = trigger.log_id;
    let metrics = &self.shared.metrics;

    if self.shared.is_stopping() {
      return Err(self.reject_stopped(log_id));
    }
    match self.shared.queue.push(trigger) {
      Ok(()) => {
        metrics.triggers_submitted.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(worker_id = %self.shared.id, log_id, queued = self.shared.queue.len(), "Trigger accepted.");
        Ok(())
      }
      Err(PushRejection::Duplicate) => {
        metrics
          .triggers_rejected_duplicate
          .fetch_add(1, AtomicOrdering::Relaxed);
        warn!(worker_id = %self.shared.id, log_id, "Duplicate trigger rejected.");
        Err(SubmitError::Duplicate(log_id))
      }
      Err(PushRejection::Closed) => Err(self.reject_stopped(log_id)),
    }
  }

  fn reject_stopped(&self, log_id: LogId) -> SubmitError {
    self
      .shared
      .metrics
      .triggers_rejected_stopped
      .fetch_add(1, AtomicOrdering::Relaxed);
    let reason = self
      .shared
      .stop_reason()
      .unwrap_or_else(|| "executor stopped".to_string());
    warn!(worker_id = %self.shared.id, log_id, %reason, "Trigger rejected, executor is stopping.");
    SubmitError::Stopped { reason }
  }

  /// Requests a cooperative stop.
  ///
  /// The in-flight handler, if any, is killed and its logger detached right away.
  /// The worker loop notices the stop within one poll timeout, exits, and reports
  /// every trigger still queued as failed with `reason` in its message.
  /// Only the first reason given to an executor is kept.
  pub fn stop(&self, reason: &str) {
    self.shared.request_stop(reason);
    info!(worker_id = %self.shared.id, reason, "Stop requested.");

    let killed = self.shared.registry.kill_all();
    if !killed.is_empty() {
      self
        .shared
        .metrics
        .kills_requested
        .fetch_add(killed.len(), AtomicOrdering::Relaxed);
      info!(worker_id = %self.shared.id, ?killed, "Killed in-flight execution on stop.");
    }
  }

  /// Kills the execution of `log_id` and stops the executor.
  ///
  /// A `log_id` the worker still owns (waiting, dequeued but not started, or
  /// finished but not yet reported) gets its one failed or final report from the
  /// worker. If `log_id` is unknown here (it already finished, or the process
  /// restarted since it was dispatched) the live handler is left alone and
  /// `log_id` is reported as failed instead.
  pub async fn kill_task(&self, log_id: LogId) {
    // The stop flag goes up before any lookup, so the worker cannot start `log_id` unseen.
    self.shared.request_stop(MANUAL_KILL_REASON);
    self
      .shared
      .metrics
      .kills_requested
      .fetch_add(1, AtomicOrdering::Relaxed);

    if self.shared.registry.kill(log_id) {
      info!(worker_id = %self.shared.id, log_id, "Kill delivered to executing trigger.");
      return;
    }
    if self.shared.queue.is_tracked(log_id) {
      info!(worker_id = %self.shared.id, log_id, "Kill requested for a trigger the worker still owns, left to the worker.");
      return;
    }

    warn!(worker_id = %self.shared.id, log_id, "Kill requested for a trigger that is not executing.");
    let result = ExecutionResult::fail(format!(
      "kill job fail, logId:{} not in current execution queue, possibly restarted",
      log_id
    ));
    self.shared.report_finished(log_id, &result, true).await;
  }

  /// Removes `log_id` from the queue before it runs and reports it as failed.
  ///
  /// Always returns `true`: an id that is not waiting here (already dequeued, or
  /// unknown after a restart) is still reported as failed so the coordinator stops
  /// treating it as pending.
  pub async fn remove_queued_task(&self, log_id: LogId) -> bool {
    let message = if self.shared.queue.remove_by_key(log_id) {
      self
        .shared
        .metrics
        .triggers_removed
        .fetch_add(1, AtomicOrdering::Relaxed);
      info!(worker_id = %self.shared.id, log_id, "Removed trigger while waiting in the queue.");
      format!("removed while waiting in the trigger queue, logId:{}", log_id)
    } else {
      warn!(worker_id = %self.shared.id, log_id, "Remove requested for a trigger that is not queued.");
      format!("not in wait queue, possibly restarted, logId:{}", log_id)
    };

    let result = ExecutionResult::fail(message);
    self.shared.report_finished(log_id, &result, true).await;
    true
  }

  /// `true` from the moment a trigger is dequeued until its outcome is reported,
  /// and while triggers are waiting.
  pub fn is_active(&self) -> bool {
    self.shared.is_running() || !self.shared.queue.is_empty()
  }

  /// Number of triggers waiting to be executed.
  pub fn queued_count(&self) -> usize {
    self.shared.queue.len()
  }

  pub fn status(&self) -> WorkerStatus {
    self.shared.status()
  }

  /// The reason recorded by the first stop or kill, if any.
  pub fn stop_reason(&self) -> Option<String> {
    self.shared.stop_reason()
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Waits for the worker loop to exit (after a stop) and finish draining.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::Timeout`]: the loop did not exit within `timeout`. It keeps running
  ///   and may be joined again.
  /// - [`ShutdownError::TaskPanic`]: the loop panicked.
  /// - [`ShutdownError::AlreadyJoined`]: a previous call already joined the loop.
  pub async fn join(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    let Some(mut handle) = self.loop_handle.lock().take() else {
      return Err(ShutdownError::AlreadyJoined);
    };

    let joined = match timeout {
      Some(timeout) => match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
          warn!(worker_id = %self.shared.id, ?timeout, "Timed out waiting for the worker loop.");
          *self.loop_handle.lock() = Some(handle);
          return Err(ShutdownError::Timeout);
        }
      },
      None => (&mut handle).await,
    };

    match joined {
      Ok(()) => {
        info!(worker_id = %self.shared.id, "Worker loop joined.");
        Ok(())
      }
      Err(e) => {
        error!(worker_id = %self.shared.id, "Worker loop panicked: {:?}", e);
        Err(ShutdownError::TaskPanic)
      }
    }
  }

  /// Stops the executor and waits for its loop to finish draining.
  pub async fn shutdown(&self, reason: &str, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    self.stop(reason);
    self.join(timeout).await
  }
}

impl Drop for JobExecutor {
  fn drop(&mut self) {
    // The loop holds its own reference to the shared state; let it wind down.
    if !self.shared.is_stopping() {
      self.shared.request_stop("executor handle dropped");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CoordinatorError;
  use crate::trigger::{ActorParams, JobId};

  use std::sync::atomic::AtomicUsize;

  use async_trait::async_trait;
  use chrono::{DateTime, Utc};

  #[derive(Default)]
  struct RecordingClient {
    finished: Mutex<Vec<(LogId, ExecutionResult, bool)>>,
  }

  #[async_trait]
  impl CoordinatorClient for RecordingClient {
    async fn update_status_executing(&self, _: LogId, _: &str) -> Result<(), CoordinatorError> {
      Ok(())
    }
    async fn update_status_finished(
      &self,
      log_id: LogId,
      result: &ExecutionResult,
      is_terminal: bool,
    ) -> Result<(), CoordinatorError> {
      self.finished.lock().push((log_id, result.clone(), is_terminal));
      Ok(())
    }
    async fn trigger_retry(&self, _: JobId, _: ActorParams) -> Result<bool, CoordinatorError> {
      Ok(true)
    }
    async fn stop_job(&self, _: JobId) -> Result<bool, CoordinatorError> {
      Ok(true)
    }
    async fn count_failed_attempts(&self, _: LogId) -> Result<u32, CoordinatorError> {
      Ok(0)
    }
    async fn count_successful_runs(&self, _: JobId, _: DateTime<Utc>) -> Result<u64, CoordinatorError> {
      Ok(0)
    }
  }

  #[derive(Default)]
  struct KillCounter {
    kills: AtomicUsize,
  }

  #[async_trait]
  impl JobHandler for KillCounter {
    async fn execute(&self, _params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
      Ok(Some(ExecutionResult::success()))
    }

    fn kill(&self) -> anyhow::Result<()> {
      self.kills.fetch_add(1, AtomicOrdering::SeqCst);
      Ok(())
    }
  }

  /// An executor without a worker loop; tests move triggers through the queue by hand.
  fn detached(client: Arc<RecordingClient>, handler: Arc<KillCounter>) -> JobExecutor {
    let config = ExecutorConfig::new("10.0.0.7:9999");
    let metrics = ExecutorMetrics::new();
    let reporter = StatusReporter::new(
      client.clone(),
      config.worker_address.clone(),
      0,
      Duration::ZERO,
      metrics.clone(),
    );
    let retry = RetryPolicy::new(client, config.limit_since);
    let shared = Arc::new(ExecutorShared::new(
      Uuid::new_v4(),
      config,
      handler,
      reporter,
      retry,
      Arc::new(NoopTaskLog),
      metrics,
    ));
    JobExecutor {
      shared,
      loop_handle: Mutex::new(None),
    }
  }

  #[tokio::test]
  async fn kill_between_dequeue_and_registration_is_left_to_worker() {
    let client = Arc::new(RecordingClient::default());
    let handler = Arc::new(KillCounter::default());
    let executor = detached(client.clone(), handler.clone());

    executor.submit(TriggerRequest::new(7, 1)).unwrap();
    let popped = executor.shared.queue.try_pop().unwrap();

    executor.kill_task(7).await;
    assert!(client.finished.lock().is_empty(), "the worker owns the report of a dequeued trigger");
    assert_eq!(handler.kills.load(AtomicOrdering::SeqCst), 0);
    assert!(executor.shared.is_stopping());

    // Once the worker has reported and released it, a kill is stale.
    executor.shared.queue.release(popped.log_id);
    executor.kill_task(7).await;
    let finished = client.finished.lock().clone();
    assert_eq!(finished.len(), 1);
    let (log_id, result, terminal) = &finished[0];
    assert_eq!(*log_id, 7);
    assert!(terminal);
    assert!(result
      .message
      .as_deref()
      .unwrap_or_default()
      .contains("not in current execution queue"));
  }

  #[tokio::test]
  async fn kill_of_waiting_trigger_is_left_to_drain() {
    let client = Arc::new(RecordingClient::default());
    let executor = detached(client.clone(), Arc::new(KillCounter::default()));

    executor.submit(TriggerRequest::new(8, 1)).unwrap();
    executor.kill_task(8).await;

    assert!(client.finished.lock().is_empty());
    assert_eq!(executor.queued_count(), 1, "drained by the worker on its way out");
  }
}
