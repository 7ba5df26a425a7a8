//! The pluggable business-logic unit the executor drives.

use crate::trigger::{ActorParams, ExecutionResult, LogId};

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;

/// Per-execution logging destination handed to a handler before it runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskLogger {
  pub log_id: LogId,
  /// File the handler should append its execution log to, if the log manager keeps files.
  pub path: Option<PathBuf>,
}

/// Business logic executed for each trigger.
///
/// `execute` may block for as long as the work takes. `kill` may be called from
/// another task while `execute` is in flight and should make it return promptly;
/// it is best-effort and its errors are only logged.
///
/// `execute` returning `Ok(None)` is reported as a failure, and an `Err` or a panic
/// becomes a failed result carrying the error text.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
  async fn execute(&self, params: ActorParams) -> anyhow::Result<Option<ExecutionResult>>;

  /// Signals a running `execute` to stop.
  ///
  /// Must not block: it is called while the executor's in-flight registry is
  /// locked, which also holds up the worker finishing the execution. Signal the
  /// work (flip a flag, cancel a token) and return.
  fn kill(&self) -> anyhow::Result<()> {
    Ok(())
  }

  fn set_logger(&self, _logger: TaskLogger) {}

  /// Detaches the logger set for the current execution. Same non-blocking rule as `kill`.
  fn clear_logger(&self) {}
}

/// The boxed future returned by closures wrapped in [`FnHandler`].
pub type HandlerFuture =
  Pin<Box<dyn Future<Output = anyhow::Result<Option<ExecutionResult>>> + Send + 'static>>;

/// Adapts an async closure into a [`JobHandler`] with a no-op `kill`.
///
/// ```no_run
/// use triggerkeeper::{ExecutionResult, FnHandler};
///
/// let handler = FnHandler::new(|params| {
///   Box::pin(async move {
///     println!("running with {} params", params.len());
///     Ok(Some(ExecutionResult::success()))
///   })
/// });
/// ```
pub struct FnHandler<F> {
  func: F,
}

impl<F> FnHandler<F>
where
  F: Fn(ActorParams) -> HandlerFuture + Send + Sync + 'static,
{
  pub fn new(func: F) -> Self {
    Self { func }
  }
}

impl<F> fmt::Debug for FnHandler<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FnHandler")
      .field("func", &format_args!("<Fn>"))
      .finish()
  }
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
  F: Fn(ActorParams) -> HandlerFuture + Send + Sync + 'static,
{
  async fn execute(&self, params: ActorParams) -> anyhow::Result<Option<ExecutionResult>> {
    (self.func)(params).await
  }
}
