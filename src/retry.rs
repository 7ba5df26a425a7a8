//! Automatic retry of failed attempts and the per-job run limit.

use crate::coordinator::CoordinatorClient;
use crate::trigger::{ActorParams, ExecutionResult, TriggerRequest};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Where the successful-run count for `limit_times` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitSince {
  /// Count runs since the trigger's `update_time`. Triggers without one skip the check.
  #[default]
  TriggerUpdateTime,
  /// Count every successful run the coordinator knows about.
  Always,
}

impl LimitSince {
  fn resolve(&self, trigger: &TriggerRequest) -> Option<DateTime<Utc>> {
    match self {
      LimitSince::TriggerUpdateTime => trigger.update_time,
      LimitSince::Always => Some(DateTime::<Utc>::UNIX_EPOCH),
    }
  }
}

/// What to do with an attempt's result.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
  /// Report the result as the last word on this log id.
  ReportFinal,
  /// Report the result as non-terminal, then ask the coordinator for another
  /// attempt with these parameters.
  ReportNonFinalAndResubmit(ActorParams),
}

pub struct RetryPolicy {
  client: Arc<dyn CoordinatorClient>,
  limit_since: LimitSince,
}

impl RetryPolicy {
  pub fn new(client: Arc<dyn CoordinatorClient>, limit_since: LimitSince) -> Self {
    Self {
      client,
      limit_since,
    }
  }

  /// Decides whether `trigger` gets another attempt after producing `result`.
  ///
  /// A failed attempt count query ends the chain: the result is reported as final.
  pub async fn decide(&self, trigger: &TriggerRequest, result: &ExecutionResult) -> RetryAction {
    let budget = trigger.retry_budget();
    if result.is_success() || budget == 0 {
      return RetryAction::ReportFinal;
    }

    let chain_id = trigger.chain_id();
    let attempts_failed = match self.client.count_failed_attempts(chain_id).await {
      Ok(count) => count,
      Err(e) => {
        warn!(
          log_id = trigger.log_id, chain_id, error = %e,
          "Could not count failed attempts, reporting result as final."
        );
        return RetryAction::ReportFinal;
      }
    };

    if attempts_failed < budget {
      debug!(
        log_id = trigger.log_id, chain_id, attempts_failed, budget,
        "Retry budget remaining."
      );
      RetryAction::ReportNonFinalAndResubmit(trigger.retry_params())
    } else {
      info!(
        log_id = trigger.log_id, chain_id, attempts_failed, budget,
        "Retry budget exhausted."
      );
      RetryAction::ReportFinal
    }
  }

  /// Asks the coordinator for another attempt. Issued once, never retried.
  pub async fn resubmit(&self, trigger: &TriggerRequest, params: ActorParams) -> bool {
    match self.client.trigger_retry(trigger.job_id, params).await {
      Ok(true) => {
        info!(log_id = trigger.log_id, job_id = trigger.job_id, chain_id = trigger.chain_id(), "Retry requested.");
        true
      }
      Ok(false) => {
        warn!(log_id = trigger.log_id, job_id = trigger.job_id, "Coordinator refused the retry request.");
        false
      }
      Err(e) => {
        warn!(log_id = trigger.log_id, job_id = trigger.job_id, error = %e, "Retry request failed, attempt is lost.");
        false
      }
    }
  }

  /// Stops the job's schedule once its successful runs reach `limit_times`.
  /// Returns `true` if a stop was issued and accepted.
  pub async fn enforce_run_limit(&self, trigger: &TriggerRequest) -> bool {
    let limit = match trigger.limit_times {
      Some(limit) if limit > 0 => limit,
      _ => return false,
    };
    let Some(since) = self.limit_since.resolve(trigger) else {
      debug!(log_id = trigger.log_id, job_id = trigger.job_id, "No update time on trigger, run limit not checked.");
      return false;
    };

    let runs = match self.client.count_successful_runs(trigger.job_id, since).await {
      Ok(runs) => runs,
      Err(e) => {
        warn!(job_id = trigger.job_id, error = %e, "Could not count successful runs, run limit not checked.");
        return false;
      }
    };
    if runs < u64::from(limit) {
      return false;
    }

    match self.client.stop_job(trigger.job_id).await {
      Ok(stopped) => {
        info!(job_id = trigger.job_id, runs, limit, stopped, "Run limit reached, stop requested.");
        stopped
      }
      Err(e) => {
        warn!(job_id = trigger.job_id, runs, limit, error = %e, "Run limit reached but stop request failed.");
        false
      }
    }
  }
}
