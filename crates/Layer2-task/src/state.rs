//! Task state machine

use serde::{Deserialize, Serialize};

/// Terminal-or-running status of a task
///
/// A task is `Running` from spawn until exactly one terminal transition.
/// `Timeout` is authoritative: once the wall-clock timer has fired, a later
/// close event must not downgrade the status to `Killed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Process is alive (or being spawned)
    Running,

    /// Exited with code 0
    Completed,

    /// Exited with a non-zero code, died on an unexpected signal,
    /// or failed to spawn
    Failed,

    /// Died on a termination-request signal (SIGTERM/SIGKILL)
    Killed,

    /// The configured wall-clock timeout fired before the process closed
    Timeout,
}

impl TaskStatus {
    /// Check if this is a terminal status (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    /// Check if the task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    /// Check if the task completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Get display name for the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Killed => "killed",
            TaskStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
