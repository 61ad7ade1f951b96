//! Task definition and result types

use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One external-command execution attempt
///
/// The invocation fields are immutable after start; only `status` moves,
/// exactly once, to a terminal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Agent profile this task runs under
    pub agent: String,

    /// Resolved command name (lower-cased first token)
    pub command: String,

    /// Literal argument vector - no shell interpretation anywhere
    pub args: Vec<String>,

    /// Resolved working directory
    pub cwd: PathBuf,

    /// Current status
    pub status: TaskStatus,

    /// When the task was spawned
    pub started_at: DateTime<Utc>,

    /// OS process id, if the spawn reported one
    pub pid: Option<u32>,
}

impl Task {
    /// Create a new task in the `Running` state
    pub(crate) fn new(
        agent: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        cwd: PathBuf,
    ) -> Self {
        Self {
            id: TaskId::new(),
            agent: agent.into(),
            command: command.into(),
            args,
            cwd,
            status: TaskStatus::Running,
            started_at: Utc::now(),
            pid: None,
        }
    }
}

/// Immutable snapshot of a finished task
///
/// Produced exactly once per task. Execution failures are statuses here,
/// never errors - batch callers can inspect `task.status` uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The finished task, status set to its terminal value
    pub task: Task,

    /// Captured stdout (most recent output, capped)
    pub stdout: String,

    /// Captured stderr (most recent output, capped)
    pub stderr: String,

    /// Whether the wall-clock timeout fired
    pub timed_out: bool,

    /// Exit code, if the process exited normally (1 on spawn error)
    pub exit_code: Option<i32>,

    /// Signal that terminated the process, if any
    pub signal: Option<i32>,

    /// When the result was produced
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    /// Check if the task completed successfully
    pub fn is_success(&self) -> bool {
        self.task.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display_is_short() {
        let id = TaskId::new();
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn test_new_task_is_running() {
        let task = Task::new("butler", "echo", vec!["hi".into()], PathBuf::from("."));
        assert!(task.status.is_running());
        assert!(task.pid.is_none());
    }
}
