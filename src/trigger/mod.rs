#[cfg(feature = "task_context")]
pub mod context;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Public Type Aliases ---

/// Identifier of one trigger (one execution attempt). Assigned by the coordinator.
pub type LogId = i64;

/// Identifier of the job definition a trigger belongs to.
pub type JobId = i64;

/// String-keyed parameters handed to the handler for one execution.
pub type ActorParams = HashMap<String, Value>;

/// Unique ID assigned to each executor instance, used in logs.
pub(crate) type WorkerId = uuid::Uuid;

// --- Injected parameter keys ---

/// Key under which the worker injects the trigger's `log_id`.
pub const PARAM_LOG_ID: &str = "__logId__";
/// Key under which the worker injects the trigger's `job_id`.
pub const PARAM_JOB_ID: &str = "__jobId__";
/// Key under which the worker injects the trigger time (RFC 3339).
pub const PARAM_TRIGGER_TIME: &str = "__triggerTime__";
/// Key under which the worker injects the retry chain id (`retry_log_id` or `log_id`).
pub const PARAM_PROCESS_LOG_ID: &str = "__processLogId__";
/// Key carrying the retry chain id in parameters handed back to the coordinator.
pub const PARAM_RETRY_LOG_ID: &str = "retryLogId";
/// Key carrying `"{index}/{total}"` in retry parameters of sharded triggers.
pub const PARAM_SHARDING: &str = "shardingParam";

/// Shard index/total value used for unsharded triggers.
pub const NO_SHARD: i32 = -1;

// --- Trigger Request ---

/// One request to run the handler once.
///
/// `log_id` must be unique among the triggers currently queued or executing on
/// one executor; a second submission with the same id is rejected.
/// The worker only ever mutates `actor_params`, and only to inject the
/// `__logId__`, `__jobId__`, `__triggerTime__` and `__processLogId__` keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
  pub log_id: LogId,
  pub job_id: JobId,
  pub trigger_time: DateTime<Utc>,
  #[serde(default)]
  pub actor_params: ActorParams,
  /// Shard index, `-1` when unsharded.
  #[serde(default = "no_shard")]
  pub shard_index: i32,
  /// Shard count, `-1` when unsharded.
  #[serde(default = "no_shard")]
  pub shard_total: i32,
  /// Maximum number of automatic retries. `None` or `0` disables retry.
  #[serde(default)]
  pub retry_times: Option<u32>,
  /// Retry chain id: absent on the first attempt, the original `log_id` afterwards.
  #[serde(default)]
  pub retry_log_id: Option<LogId>,
  /// Optional cap on the total number of successful runs of the owning job.
  #[serde(default)]
  pub limit_times: Option<u32>,
  #[serde(default)]
  pub update_time: Option<DateTime<Utc>>,
}

fn no_shard() -> i32 {
  NO_SHARD
}

impl TriggerRequest {
  /// Creates an unsharded, non-retrying trigger fired now.
  pub fn new(log_id: LogId, job_id: JobId) -> Self {
    Self {
      log_id,
      job_id,
      trigger_time: Utc::now(),
      actor_params: ActorParams::new(),
      shard_index: NO_SHARD,
      shard_total: NO_SHARD,
      retry_times: None,
      retry_log_id: None,
      limit_times: None,
      update_time: None,
    }
  }

  pub fn with_retry_times(mut self, retry_times: u32) -> Self {
    self.retry_times = Some(retry_times);
    self
  }

  pub fn with_retry_log_id(mut self, retry_log_id: LogId) -> Self {
    self.retry_log_id = Some(retry_log_id);
    self
  }

  pub fn with_shard(mut self, index: i32, total: i32) -> Self {
    self.shard_index = index;
    self.shard_total = total;
    self
  }

  pub fn with_limit_times(mut self, limit_times: u32, update_time: DateTime<Utc>) -> Self {
    self.limit_times = Some(limit_times);
    self.update_time = Some(update_time);
    self
  }

  pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.actor_params.insert(key.to_string(), value.into());
    self
  }

  /// The id shared by every attempt of this trigger's retry chain.
  pub fn chain_id(&self) -> LogId {
    self.retry_log_id.unwrap_or(self.log_id)
  }

  /// Whether this trigger carries a real shard assignment.
  pub fn is_sharded(&self) -> bool {
    self.shard_index >= 0 && self.shard_total > 0
  }

  /// Retry budget, treating an absent value as zero.
  pub fn retry_budget(&self) -> u32 {
    self.retry_times.unwrap_or(0)
  }

  /// Writes the standard worker fields into `actor_params`.
  pub(crate) fn inject_standard_params(&mut self) {
    self
      .actor_params
      .insert(PARAM_LOG_ID.to_string(), Value::from(self.log_id));
    self
      .actor_params
      .insert(PARAM_JOB_ID.to_string(), Value::from(self.job_id));
    self.actor_params.insert(
      PARAM_TRIGGER_TIME.to_string(),
      Value::from(self.trigger_time.to_rfc3339()),
    );
    self.actor_params.insert(
      PARAM_PROCESS_LOG_ID.to_string(),
      Value::from(self.chain_id()),
    );
  }

  /// Parameters handed to the coordinator to schedule the next attempt of this chain.
  pub(crate) fn retry_params(&self) -> ActorParams {
    let mut params = self.actor_params.clone();
    params.insert(
      PARAM_RETRY_LOG_ID.to_string(),
      Value::from(self.chain_id()),
    );
    if self.is_sharded() {
      params.insert(
        PARAM_SHARDING.to_string(),
        Value::from(format!("{}/{}", self.shard_index, self.shard_total)),
      );
    }
    params
  }
}

// --- Execution Result ---

/// Outcome code of one execution attempt. Serialized as the integer the coordinator expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResultCode {
  Success,
  Fail,
}

impl ResultCode {
  pub const SUCCESS_CODE: i32 = 200;
  pub const FAIL_CODE: i32 = 500;
}

impl From<ResultCode> for i32 {
  fn from(code: ResultCode) -> Self {
    match code {
      ResultCode::Success => ResultCode::SUCCESS_CODE,
      ResultCode::Fail => ResultCode::FAIL_CODE,
    }
  }
}

impl TryFrom<i32> for ResultCode {
  type Error = String;

  fn try_from(code: i32) -> Result<Self, Self::Error> {
    match code {
      ResultCode::SUCCESS_CODE => Ok(ResultCode::Success),
      ResultCode::FAIL_CODE => Ok(ResultCode::Fail),
      other => Err(format!("unknown result code {}", other)),
    }
  }
}

impl fmt::Display for ResultCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResultCode::Success => f.write_str("SUCCESS"),
      ResultCode::Fail => f.write_str("FAIL"),
    }
  }
}

/// Outcome of one execution attempt, in the shape the coordinator stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
  pub code: ResultCode,
  #[serde(rename = "msg", default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<Value>,
}

impl ExecutionResult {
  pub fn success() -> Self {
    Self {
      code: ResultCode::Success,
      message: None,
      content: None,
    }
  }

  pub fn fail(message: impl Into<String>) -> Self {
    Self {
      code: ResultCode::Fail,
      message: Some(message.into()),
      content: None,
    }
  }

  /// Result used when the handler produced nothing. Never a success.
  pub fn missing() -> Self {
    Self::fail("job handler returned no result")
  }

  pub fn with_content(mut self, content: impl Into<Value>) -> Self {
    self.content = Some(content.into());
    self
  }

  pub fn is_success(&self) -> bool {
    self.code == ResultCode::Success
  }
}
