//! tests/common.rs
//! Shared helpers for integration tests: a recording coordinator and scripted handlers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing_subscriber::fmt::TestWriter;
use triggerkeeper::{
  ActorParams, CoordinatorClient, CoordinatorError, ExecutionResult, JobExecutor, JobHandler, JobId,
  LogId,
};

pub const WORKER_ADDRESS: &str = "127.0.0.1:9999";

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds an executor with short poll and backoff intervals.
pub fn build_executor(
  handler: Arc<dyn JobHandler>,
  coordinator: Arc<FakeCoordinator>,
) -> JobExecutor {
  JobExecutor::builder()
    .handler(handler)
    .coordinator(coordinator)
    .worker_address(WORKER_ADDRESS)
    .poll_timeout(StdDuration::from_millis(50))
    .report_backoff(StdDuration::from_millis(10))
    .build()
    .expect("Failed to build executor")
}

// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: StdDuration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(StdDuration::from_millis(10)).await;
  }
}

// --- Fake Coordinator ---

/// One call received by the fake coordinator, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorCall {
  Executing { log_id: LogId, address: String },
  Finished { log_id: LogId, result: ExecutionResult, is_terminal: bool },
  Retry { job_id: JobId, params: ActorParams },
  StopJob { job_id: JobId },
}

/// Records every call and answers from configurable state.
///
/// Retry chains are tracked through `link`: failed finished reports count
/// against the chain their log id belongs to (a log id is its own chain by default).
#[derive(Default)]
pub struct FakeCoordinator {
  calls: Mutex<Vec<CoordinatorCall>>,
  chains: Mutex<HashMap<LogId, LogId>>,
  /// Number of status calls that fail before they start succeeding.
  status_failures: AtomicUsize,
  successful_runs: Mutex<Option<u64>>,
  retry_tx: Mutex<Option<mpsc::UnboundedSender<(JobId, ActorParams)>>>,
}

impl FakeCoordinator {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn fail_next_status_calls(&self, count: usize) {
    self.status_failures.store(count, Ordering::SeqCst);
  }

  pub fn set_successful_runs(&self, runs: u64) {
    *self.successful_runs.lock() = Some(runs);
  }

  /// Records `log_id` as an attempt of the chain started by `chain_id`.
  pub fn link(&self, log_id: LogId, chain_id: LogId) {
    self.chains.lock().insert(log_id, chain_id);
  }

  /// Routes every `trigger_retry` call to the returned receiver.
  pub fn retry_requests(&self) -> mpsc::UnboundedReceiver<(JobId, ActorParams)> {
    let (tx, rx) = mpsc::unbounded_channel();
    *self.retry_tx.lock() = Some(tx);
    rx
  }

  pub fn calls(&self) -> Vec<CoordinatorCall> {
    self.calls.lock().clone()
  }

  /// Finished reports as `(log_id, result, is_terminal)`.
  pub fn finished(&self) -> Vec<(LogId, ExecutionResult, bool)> {
    self
      .calls
      .lock()
      .iter()
      .filter_map(|call| match call {
        CoordinatorCall::Finished {
          log_id,
          result,
          is_terminal,
        } => Some((*log_id, result.clone(), *is_terminal)),
        _ => None,
      })
      .collect()
  }

  pub fn finished_for(&self, log_id: LogId) -> Vec<(ExecutionResult, bool)> {
    self
      .finished()
      .into_iter()
      .filter(|(id, _, _)| *id == log_id)
      .map(|(_, result, terminal)| (result, terminal))
      .collect()
  }

  pub fn executing(&self) -> Vec<LogId> {
    self
      .calls
      .lock()
      .iter()
      .filter_map(|call| match call {
        CoordinatorCall::Executing { log_id, .. } => Some(*log_id),
        _ => None,
      })
      .collect()
  }

  pub fn stop_job_calls(&self) -> Vec<JobId> {
    self
      .calls
      .lock()
      .iter()
      .filter_map(|call| match call {
        CoordinatorCall::StopJob { job_id } => Some(*job_id),
        _ => None,
      })
      .collect()
  }

  pub fn retry_calls(&self) -> usize {
    self
      .calls
      .lock()
      .iter()
      .filter(|call| matches!(call, CoordinatorCall::Retry { .. }))
      .count()
  }

  fn take_status_failure(&self) -> bool {
    self
      .status_failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  }
}

#[async_trait]
impl CoordinatorClient for FakeCoordinator {
  async fn update_status_executing(
    &self,
    log_id: LogId,
    worker_address: &str,
  ) -> Result<(), CoordinatorError> {
    if self.take_status_failure() {
      return Err(CoordinatorError::Transport("connection reset".into()));
    }
    self.calls.lock().push(CoordinatorCall::Executing {
      log_id,
      address: worker_address.to_string(),
    });
    Ok(())
  }

  async fn update_status_finished(
    &self,
    log_id: LogId,
    result: &ExecutionResult,
    is_terminal: bool,
  ) -> Result<(), CoordinatorError> {
    if self.take_status_failure() {
      return Err(CoordinatorError::Transport("connection reset".into()));
    }
    self.calls.lock().push(CoordinatorCall::Finished {
      log_id,
      result: result.clone(),
      is_terminal,
    });
    Ok(())
  }

  async fn trigger_retry(&self, job_id: JobId, params: ActorParams) -> Result<bool, CoordinatorError> {
    self.calls.lock().push(CoordinatorCall::Retry {
      job_id,
      params: params.clone(),
    });
    if let Some(tx) = self.retry_tx.lock().as_ref() {
      let _ = tx.send((job_id, params));
    }
    Ok(true)
  }

  async fn stop_job(&self, job_id: JobId) -> Result<bool, CoordinatorError> {
    self.calls.lock().push(CoordinatorCall::StopJob { job_id });
    Ok(true)
  }

  async fn count_failed_attempts(&self, retry_log_id: LogId) -> Result<u32, CoordinatorError> {
    let chains = self.chains.lock().clone();
    let count = self
      .finished()
      .into_iter()
      .filter(|(log_id, result, _)| {
        !result.is_success() && chains.get(log_id).copied().unwrap_or(*log_id) == retry_log_id
      })
      .count();
    Ok(count as u32)
  }

  async fn count_successful_runs(
    &self,
    _job_id: JobId,
    _since: DateTime<Utc>,
  ) -> Result<u64, CoordinatorError> {
    (*self.successful_runs.lock()).ok_or(CoordinatorError::Unavailable)
  }
}

// --- Scripted Handlers ---

/// Counts executions and returns a fixed outcome after an optional delay.
///
/// `kill` is only counted: there is nothing to interrupt outside `execute`.
pub struct CountingHandler {
  pub runs: AtomicUsize,
  pub kills: AtomicUsize,
  delay: StdDuration,
  succeeds: bool,
}

impl CountingHandler {
  pub fn new(delay: StdDuration, succeeds: bool) -> Arc<Self> {
    Arc::new(Self {
      runs: AtomicUsize::new(0),
      kills: AtomicUsize::new(0),
      delay,
      succeeds,
    })
  }

  pub fn runs(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }

  pub fn kills(&self) -> usize {
    self.kills.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl JobHandler for CountingHandler {
  async fn execute(&self, _params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
    let count = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::debug!("Counting handler executing (Count: {}, WillSucceed: {})", count, self.succeeds);
    if self.delay > StdDuration::ZERO {
      tokio::time::sleep(self.delay).await;
    }
    if self.succeeds {
      Ok(Some(ExecutionResult::success()))
    } else {
      Ok(Some(ExecutionResult::fail("scripted failure")))
    }
  }

  fn kill(&self) -> anyhow::Result<()> {
    self.kills.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Runs until killed, then returns an error.
#[derive(Default)]
pub struct BlockingHandler {
  pub started: AtomicUsize,
  pub kills: AtomicUsize,
  killed: AtomicBool,
  release: Notify,
}

impl BlockingHandler {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn started(&self) -> usize {
    self.started.load(Ordering::SeqCst)
  }

  pub fn kills(&self) -> usize {
    self.kills.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl JobHandler for BlockingHandler {
  async fn execute(&self, _params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
    self.started.fetch_add(1, Ordering::SeqCst);
    while !self.killed.load(Ordering::SeqCst) {
      let _ = tokio::time::timeout(StdDuration::from_millis(20), self.release.notified()).await;
    }
    anyhow::bail!("interrupted by kill")
  }

  fn kill(&self) -> anyhow::Result<()> {
    self.kills.fetch_add(1, Ordering::SeqCst);
    self.killed.store(true, Ordering::SeqCst);
    self.release.notify_waiters();
    Ok(())
  }
}

/// Tracks how many executions overlap.
#[derive(Default)]
pub struct ConcurrencyTracker {
  active: AtomicUsize,
  pub max_active: AtomicUsize,
  pub runs: AtomicUsize,
  delay: StdDuration,
}

impl ConcurrencyTracker {
  pub fn new(delay: StdDuration) -> Arc<Self> {
    Arc::new(Self {
      delay,
      ..Default::default()
    })
  }
}

#[async_trait]
impl JobHandler for ConcurrencyTracker {
  async fn execute(&self, _params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
    let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_active.fetch_max(current, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.active.fetch_sub(1, Ordering::SeqCst);
    self.runs.fetch_add(1, Ordering::SeqCst);
    Ok(Some(ExecutionResult::success()))
  }
}

/// Records the `__logId__` of each execution in order.
#[derive(Default)]
pub struct OrderRecorder {
  pub seen: Mutex<Vec<LogId>>,
  pub params: Mutex<Vec<ActorParams>>,
}

impl OrderRecorder {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn seen(&self) -> Vec<LogId> {
    self.seen.lock().clone()
  }
}

#[async_trait]
impl JobHandler for OrderRecorder {
  async fn execute(&self, params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
    let log_id = params
      .get(triggerkeeper::trigger::PARAM_LOG_ID)
      .and_then(|v| v.as_i64())
      .ok_or_else(|| anyhow::anyhow!("missing log id param"))?;
    self.seen.lock().push(log_id);
    self.params.lock().push(params);
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    Ok(Some(ExecutionResult::success()))
  }
}

/// Panics, errors or returns nothing depending on the `mode` param.
pub struct MisbehavingHandler;

#[async_trait]
impl JobHandler for MisbehavingHandler {
  async fn execute(&self, params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
    tokio::task::yield_now().await;
    match params.get("mode").and_then(|v| v.as_str()) {
      Some("panic") => panic!("Job forced panic!"),
      Some("error") => Err(anyhow::anyhow!("database unreachable").context("loading batch")),
      Some("none") => Ok(None),
      _ => Ok(Some(ExecutionResult::success())),
    }
  }
}
