//! Best-effort delivery of execution status to the coordinator.

use crate::coordinator::CoordinatorClient;
use crate::error::{CoordinatorError, ReportError};
use crate::metrics::ExecutorMetrics;
use crate::trigger::{ExecutionResult, LogId};

use std::future::Future;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Default number of retries after the first failed status call.
pub const DEFAULT_REPORT_MAX_RETRIES: u32 = 3;
/// Default pause between status call attempts.
pub const DEFAULT_REPORT_BACKOFF: Duration = Duration::from_secs(3);

/// Sends "executing" and "finished" notifications with a bounded retry loop.
///
/// A call is attempted `max_retries + 1` times with a fixed `backoff` sleep
/// between attempts. When every attempt fails the last error is logged and
/// returned; callers treat it as advisory and carry on.
pub struct StatusReporter {
  client: Arc<dyn CoordinatorClient>,
  worker_address: String,
  max_retries: u32,
  backoff: Duration,
  metrics: ExecutorMetrics,
}

impl StatusReporter {
  pub fn new(
    client: Arc<dyn CoordinatorClient>,
    worker_address: impl Into<String>,
    max_retries: u32,
    backoff: Duration,
    metrics: ExecutorMetrics,
  ) -> Self {
    Self {
      client,
      worker_address: worker_address.into(),
      max_retries,
      backoff,
      metrics,
    }
  }

  pub fn worker_address(&self) -> &str {
    &self.worker_address
  }

  pub async fn report_executing(&self, log_id: LogId) -> Result<(), ReportError> {
    let client = &self.client;
    let address = self.worker_address.as_str();
    self
      .deliver(log_id, "executing", move || {
        client.update_status_executing(log_id, address)
      })
      .await
  }

  pub async fn report_finished(
    &self,
    log_id: LogId,
    result: &ExecutionResult,
    is_terminal: bool,
  ) -> Result<(), ReportError> {
    let client = &self.client;
    self
      .deliver(log_id, "finished", move || {
        client.update_status_finished(log_id, result, is_terminal)
      })
      .await
  }

  async fn deliver<F, Fut>(&self, log_id: LogId, call: &'static str, mut send: F) -> Result<(), ReportError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), CoordinatorError>>,
  {
    let attempts = self.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
      match send().await {
        Ok(()) => {
          if attempt > 1 {
            info!(log_id, call, attempt, "Status report delivered after retry.");
          } else {
            debug!(log_id, call, "Status report delivered.");
          }
          return Ok(());
        }
        Err(e) if attempt < attempts => {
          warn!(
            log_id, call, attempt, max_attempts = attempts, error = %e,
            backoff_ms = self.backoff.as_millis(),
            "Status report failed, retrying after backoff."
          );
          tokio::time::sleep(self.backoff).await;
          attempt += 1;
        }
        Err(e) => {
          error!(log_id, call, attempts, error = %e, "Status report abandoned, coordinator view is stale.");
          self.metrics.reports_failed.fetch_add(1, AtomicOrdering::Relaxed);
          return Err(ReportError::Exhausted {
            log_id,
            attempts,
            source: e,
          });
        }
      }
    }
  }
}
