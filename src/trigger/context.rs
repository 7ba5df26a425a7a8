use super::{JobId, LogId, TriggerRequest};

/// Contextual information available to a running handler via task-locals.
/// Accessible within `JobHandler::execute` using `try_get_current_task_context()`
/// or the `task_context!()` macro when the `task_context` feature is enabled.
///
/// This is the per-execution shard context: it is installed by the worker for
/// the duration of one execution and disappears with the execution task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskContext {
  /// Id of the trigger being executed.
  pub log_id: LogId,
  /// Id of the owning job.
  pub job_id: JobId,
  /// Shard index (`-1` when unsharded).
  pub shard_index: i32,
  /// Shard count (`-1` when unsharded).
  pub shard_total: i32,
}

impl TaskContext {
  pub(crate) fn for_trigger(trigger: &TriggerRequest) -> Self {
    Self {
      log_id: trigger.log_id,
      job_id: trigger.job_id,
      shard_index: trigger.shard_index,
      shard_total: trigger.shard_total,
    }
  }

  /// `(index, total)` when the execution is sharded.
  pub fn shard(&self) -> Option<(i32, i32)> {
    (self.shard_index >= 0 && self.shard_total > 0).then_some((self.shard_index, self.shard_total))
  }
}

tokio::task_local! {
    /// Provides access to the current `TaskContext` within a handler's execution scope.
    /// Set by the worker if the `task_context` feature is enabled.
    pub static CURRENT_TASK_CONTEXT: TaskContext;
}

/// Attempts to retrieve the `TaskContext` of the executing trigger.
///
/// Returns `None` if called outside an execution started by the worker.
pub fn try_get_current_task_context() -> Option<TaskContext> {
  CURRENT_TASK_CONTEXT.try_with(|ctx| *ctx).ok()
}

/// Retrieves the current `TaskContext`, panicking if called outside a
/// worker-managed execution.
///
/// # Panics
/// Panics if the `CURRENT_TASK_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! task_context {
  () => {
    $crate::trigger::context::CURRENT_TASK_CONTEXT.with(|ctx| *ctx)
  };
}
