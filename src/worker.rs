use crate::config::ExecutorConfig;
use crate::handler::{JobHandler, TaskLogger};
use crate::metrics::ExecutorMetrics;
use crate::queue::TriggerQueue;
use crate::registry::InFlightRegistry;
use crate::reporter::StatusReporter;
use crate::retry::{RetryAction, RetryPolicy};
use crate::task_log::TaskLogManager;
use crate::trigger::{ExecutionResult, LogId, TriggerRequest, WorkerId};

#[cfg(feature = "task_context")]
use crate::trigger::context::{TaskContext, CURRENT_TASK_CONTEXT};

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Lifecycle state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WorkerStatus {
  /// Waiting for a trigger.
  Idle,
  /// A handler execution is in progress.
  Executing,
  /// A stop was requested; the loop exits at its next check.
  Stopping,
  /// The loop exited and the queue was drained.
  Stopped,
}

/// State shared between the public `JobExecutor` handle and its worker loop.
pub(crate) struct ExecutorShared {
  pub id: WorkerId,
  pub config: ExecutorConfig,
  pub handler: Arc<dyn JobHandler>,
  pub queue: TriggerQueue,
  pub registry: InFlightRegistry,
  pub reporter: StatusReporter,
  pub retry: RetryPolicy,
  pub task_log: Arc<dyn TaskLogManager>,
  pub metrics: ExecutorMetrics,
  stopping: AtomicBool,
  stop_reason: Mutex<Option<String>>,
  running: AtomicBool,
  stopped: AtomicBool,
}

impl ExecutorShared {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    id: WorkerId,
    config: ExecutorConfig,
    handler: Arc<dyn JobHandler>,
    reporter: StatusReporter,
    retry: RetryPolicy,
    task_log: Arc<dyn TaskLogManager>,
    metrics: ExecutorMetrics,
  ) -> Self {
    Self {
      id,
      config,
      handler,
      queue: TriggerQueue::new(),
      registry: InFlightRegistry::new(),
      reporter,
      retry,
      task_log,
      metrics,
      stopping: AtomicBool::new(false),
      stop_reason: Mutex::new(None),
      running: AtomicBool::new(false),
      stopped: AtomicBool::new(false),
    }
  }

  /// Raises the stop flag. The first reason given is kept for good.
  pub fn request_stop(&self, reason: &str) {
    let mut stop_reason = self.stop_reason.lock();
    if stop_reason.is_none() {
      *stop_reason = Some(reason.to_string());
    }
    self.stopping.store(true, AtomicOrdering::SeqCst);
  }

  pub fn is_stopping(&self) -> bool {
    self.stopping.load(AtomicOrdering::SeqCst)
  }

  pub fn stop_reason(&self) -> Option<String> {
    self.stop_reason.lock().clone()
  }

  pub fn is_running(&self) -> bool {
    self.running.load(AtomicOrdering::SeqCst)
  }

  pub fn status(&self) -> WorkerStatus {
    if self.stopped.load(AtomicOrdering::SeqCst) {
      WorkerStatus::Stopped
    } else if self.is_stopping() {
      WorkerStatus::Stopping
    } else if self.is_running() {
      WorkerStatus::Executing
    } else {
      WorkerStatus::Idle
    }
  }

  /// Reports a finished attempt. Delivery failures are logged by the reporter.
  pub async fn report_finished(&self, log_id: LogId, result: &ExecutionResult, is_terminal: bool) {
    let _ = self
      .reporter
      .report_finished(log_id, result, is_terminal)
      .await;
  }
}

/// How an execution ended, before it is turned into a reported result.
enum ExecOutcome {
  /// The handler returned (possibly without a result).
  Returned(ExecutionResult),
  /// The handler returned an error, panicked, or its task was cancelled.
  Raised(ExecutionResult),
}

/// The task that owns one executor's queue and runs its triggers one at a time.
///
/// The loop pops with a bounded wait so that it re-checks the stop flag at
/// least once per `poll_timeout`, executes each trigger in its own spawned
/// task (a panicking handler cannot take the loop down), and reports every
/// outcome to the coordinator before taking the next trigger.
pub(crate) struct Worker {
  shared: Arc<ExecutorShared>,
}

impl Worker {
  pub fn new(shared: Arc<ExecutorShared>) -> Self {
    Self { shared }
  }

  /// Runs the loop until a stop is observed, then drains the queue.
  pub async fn run(&self) {
    let worker_id = self.shared.id;
    info!(%worker_id, "Worker started. Waiting for triggers...");

    loop {
      if self.shared.is_stopping() {
        info!(%worker_id, reason = ?self.shared.stop_reason(), "Worker observed stop request.");
        break;
      }

      let Some(trigger) = self
        .shared
        .queue
        .pop_with_timeout(self.shared.config.poll_timeout)
        .await
      else {
        trace!(%worker_id, "Queue poll timed out.");
        continue;
      };

      self.shared.running.store(true, AtomicOrdering::SeqCst);
      if self.shared.is_stopping() {
        // Stop raced with the pop: the trigger is failed with the drained ones.
        let log_id = trigger.log_id;
        self.fail_unexecuted(trigger).await;
        self.shared.queue.release(log_id);
        self.shared.running.store(false, AtomicOrdering::SeqCst);
        break;
      }

      let span = tracing::span!(
        tracing::Level::INFO,
        "trigger_exec",
        %worker_id,
        log_id = trigger.log_id,
        job_id = trigger.job_id,
        chain_id = trigger.chain_id()
      );
      self.process(trigger).instrument(span).await;
      self.shared.running.store(false, AtomicOrdering::SeqCst);
    }

    self.drain().await;
    self.shared.stopped.store(true, AtomicOrdering::SeqCst);
    info!(%worker_id, "Worker task shut down.");
  }

  /// Executes one trigger and reports its outcome.
  ///
  /// The log id stays in flight in the queue until the outcome is reported, so
  /// a kill arriving at any point before that is settled here and nowhere else.
  async fn process(&self, mut trigger: TriggerRequest) {
    let shared = &self.shared;
    let log_id = trigger.log_id;

    trigger.inject_standard_params();
    shared.registry.register(log_id, shared.handler.clone());

    // Failure already logged by the reporter; execution goes ahead regardless.
    let _ = shared.reporter.report_executing(log_id).await;

    // A stop or kill that landed before the handler started has nothing to interrupt.
    if shared.is_stopping() {
      shared.registry.unregister(log_id);
      self.fail_before_start(&trigger).await;
      shared.queue.release(log_id);
      return;
    }

    shared.task_log.prepare_log(trigger.trigger_time, log_id);
    shared.handler.set_logger(TaskLogger {
      log_id,
      path: shared.task_log.log_path(trigger.trigger_time, log_id),
    });

    info!("Starting trigger execution.");
    let started = Instant::now();
    let outcome = self.execute(&trigger).await;
    let duration = started.elapsed();
    shared.metrics.execution_duration.record(duration);

    let result = match outcome {
      ExecOutcome::Returned(result) => result,
      ExecOutcome::Raised(result) => {
        if shared.is_stopping() {
          shared.registry.kill(log_id);
        }
        result
      }
    };

    shared.registry.unregister(log_id);
    shared.handler.clear_logger();
    shared.task_log.end_log();

    info!(
      duration_ms = duration.as_millis(),
      outcome = %result.code,
      message = result.message.as_deref().unwrap_or(""),
      "Finished trigger execution."
    );

    self.settle(&trigger, result).await;
    shared.queue.release(log_id);
  }

  /// Runs the handler in its own task, mapping errors and panics to failed results.
  async fn execute(&self, trigger: &TriggerRequest) -> ExecOutcome {
    let handler = self.shared.handler.clone();
    let params = trigger.actor_params.clone();
    let future = async move { handler.execute(params).await };

    #[cfg(feature = "task_context")]
    let task = tokio::spawn(
      CURRENT_TASK_CONTEXT
        .scope(TaskContext::for_trigger(trigger), future)
        .in_current_span(),
    );
    #[cfg(not(feature = "task_context"))]
    let task = tokio::spawn(future.in_current_span());

    let metrics = &self.shared.metrics;
    match task.await {
      Ok(Ok(Some(result))) => {
        let counter = if result.is_success() {
          &metrics.executions_success
        } else {
          &metrics.executions_fail
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
        ExecOutcome::Returned(result)
      }
      Ok(Ok(None)) => {
        warn!("Handler returned no result, treating it as a failure.");
        metrics.executions_fail.fetch_add(1, AtomicOrdering::Relaxed);
        ExecOutcome::Returned(ExecutionResult::missing())
      }
      Ok(Err(e)) => {
        error!(error = %e, "Handler execution failed.");
        metrics.executions_fail.fetch_add(1, AtomicOrdering::Relaxed);
        ExecOutcome::Raised(ExecutionResult::fail(format!("{:#}", e)))
      }
      Err(join_error) if join_error.is_panic() => {
        let message = panic_message(join_error.into_panic());
        error!(panic = %message, "Handler panicked!");
        metrics.executions_panicked.fetch_add(1, AtomicOrdering::Relaxed);
        ExecOutcome::Raised(ExecutionResult::fail(format!("job handler panicked: {}", message)))
      }
      Err(_) => {
        warn!("Handler task was cancelled during execution.");
        metrics.executions_fail.fetch_add(1, AtomicOrdering::Relaxed);
        ExecOutcome::Raised(ExecutionResult::fail("job execution was cancelled"))
      }
    }
  }

  /// Applies the retry policy and reports the attempt. Exactly one finished report per attempt.
  async fn settle(&self, trigger: &TriggerRequest, result: ExecutionResult) {
    let shared = &self.shared;
    let log_id = trigger.log_id;

    match shared.retry.decide(trigger, &result).await {
      RetryAction::ReportFinal => {
        shared.report_finished(log_id, &result, true).await;
      }
      RetryAction::ReportNonFinalAndResubmit(params) => {
        shared.report_finished(log_id, &result, false).await;
        let counter = if shared.retry.resubmit(trigger, params).await {
          &shared.metrics.retries_resubmitted
        } else {
          &shared.metrics.retries_lost
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
      }
    }

    shared.retry.enforce_run_limit(trigger).await;
  }

  /// Fails every trigger still queued after the loop exits.
  async fn drain(&self) {
    let drained = self.shared.queue.close_and_drain();
    if drained.is_empty() {
      return;
    }
    info!(worker_id = %self.shared.id, count = drained.len(), "Failing triggers left in the queue.");
    for trigger in drained {
      self.fail_unexecuted(trigger).await;
    }
  }

  async fn fail_before_start(&self, trigger: &TriggerRequest) {
    let reason = self
      .shared
      .stop_reason()
      .unwrap_or_else(|| "executor stopped".to_string());
    warn!(%reason, "Stop requested before the handler started, trigger not executed.");
    let result = ExecutionResult::fail(format!(
      "{} [trigger not executed, stopped before the handler started. logId:{}]",
      reason, trigger.log_id
    ));
    self.shared.report_finished(trigger.log_id, &result, true).await;
  }

  async fn fail_unexecuted(&self, trigger: TriggerRequest) {
    let reason = self
      .shared
      .stop_reason()
      .unwrap_or_else(|| "executor stopped".to_string());
    let result = ExecutionResult::fail(format!(
      "{} [trigger not executed, still in the queue, killed. logId:{}]",
      reason, trigger.log_id
    ));
    debug!(log_id = trigger.log_id, %reason, "Reporting unexecuted trigger as failed.");
    self
      .shared
      .metrics
      .triggers_drained
      .fetch_add(1, AtomicOrdering::Relaxed);
    self.shared.report_finished(trigger.log_id, &result, true).await;
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
