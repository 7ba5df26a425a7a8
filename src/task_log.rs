//! Per-execution log files.

use crate::trigger::LogId;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

/// Prepares and closes the log destination of each execution.
///
/// Called by the worker on its own task, one execution at a time.
pub trait TaskLogManager: Send + Sync + 'static {
  fn prepare_log(&self, trigger_time: DateTime<Utc>, log_id: LogId);

  /// Where the log of `log_id` lives, if this manager keeps files.
  fn log_path(&self, trigger_time: DateTime<Utc>, log_id: LogId) -> Option<PathBuf>;

  fn end_log(&self);
}

/// Keeps no logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskLog;

impl TaskLogManager for NoopTaskLog {
  fn prepare_log(&self, _trigger_time: DateTime<Utc>, _log_id: LogId) {}

  fn log_path(&self, _trigger_time: DateTime<Utc>, _log_id: LogId) -> Option<PathBuf> {
    None
  }

  fn end_log(&self) {}
}

/// Stores one file per execution at `<root>/<yyyy-mm-dd>/<log_id>.log`,
/// dated by the trigger time.
#[derive(Debug, Clone)]
pub struct FileTaskLog {
  root: PathBuf,
}

impl FileTaskLog {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, trigger_time: DateTime<Utc>, log_id: LogId) -> PathBuf {
    self
      .root
      .join(trigger_time.format("%Y-%m-%d").to_string())
      .join(format!("{}.log", log_id))
  }
}

impl TaskLogManager for FileTaskLog {
  fn prepare_log(&self, trigger_time: DateTime<Utc>, log_id: LogId) {
    let path = self.path_for(trigger_time, log_id);
    if let Some(dir) = path.parent() {
      if let Err(e) = fs::create_dir_all(dir) {
        warn!(log_id, dir = %dir.display(), error = %e, "Could not create task log directory.");
        return;
      }
    }
    if let Err(e) = OpenOptions::new().create(true).append(true).open(&path) {
      warn!(log_id, path = %path.display(), error = %e, "Could not create task log file.");
    }
  }

  fn log_path(&self, trigger_time: DateTime<Utc>, log_id: LogId) -> Option<PathBuf> {
    Some(self.path_for(trigger_time, log_id))
  }

  // Files are opened per write by handlers, nothing is held open here.
  fn end_log(&self) {}
}
