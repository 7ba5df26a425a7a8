//! tests/context.rs
//! The task-local context seen by handlers.

#![cfg(feature = "task_context")]

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::common::{build_executor, setup_tracing, wait_until, FakeCoordinator};
use parking_lot::Mutex;
use triggerkeeper::{
  task_context, try_get_current_task_context, ActorParams, ExecutionResult, FnHandler, TaskContext,
  TriggerRequest,
};

#[tokio::test]
async fn test_handler_sees_its_trigger_context() {
  setup_tracing();
  let coordinator = FakeCoordinator::new();
  let seen: Arc<Mutex<Vec<TaskContext>>> = Arc::new(Mutex::new(Vec::new()));

  let recorded = seen.clone();
  let handler = FnHandler::new(move |_params: ActorParams| {
    let recorded = recorded.clone();
    Box::pin(async move {
      let ctx = try_get_current_task_context().ok_or_else(|| anyhow::anyhow!("no context"))?;
      assert_eq!(ctx, task_context!());
      recorded.lock().push(ctx);
      Ok::<_, anyhow::Error>(Some(ExecutionResult::success()))
    }) as triggerkeeper::HandlerFuture
  });
  let executor = build_executor(Arc::new(handler), coordinator.clone());

  executor.submit(TriggerRequest::new(61, 5).with_shard(1, 4)).unwrap();
  executor.submit(TriggerRequest::new(62, 5)).unwrap();

  assert!(wait_until(StdDuration::from_secs(2), || coordinator.finished().len() == 2).await);
  let seen = seen.lock().clone();
  assert_eq!(seen.len(), 2);

  assert_eq!((seen[0].log_id, seen[0].job_id), (61, 5));
  assert_eq!(seen[0].shard(), Some((1, 4)));
  assert_eq!(seen[1].log_id, 62);
  assert_eq!(seen[1].shard(), None);

  executor.shutdown("test done", Some(StdDuration::from_secs(2))).await.unwrap();
}

#[tokio::test]
async fn test_no_context_outside_execution() {
  assert!(try_get_current_task_context().is_none());
}
