//! Task Runner - supervised external-command execution
//!
//! Features:
//! - Allow-list enforcement per agent profile (no shell anywhere)
//! - Wall-clock timeout with forced kill, authoritative over close events
//! - Incremental stdout/stderr capture with a fixed byte ceiling
//! - Live-task introspection and SIGTERM-based cancellation
//!
//! Every started task is inserted into the running set once and removed
//! exactly once, after its result has been fully computed - on success,
//! failure, timeout, kill, and spawn error alike.

use crate::capture::CappedBuffer;
use crate::state::TaskStatus;
use crate::task::{Task, TaskId, TaskResult};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use valet_foundation::{AgentProfile, Error, Result};

/// Resource bounds for one runner instance
///
/// Both bounds are mandatory - there is deliberately no `Default` impl,
/// so every caller makes an explicit decision about wall-clock time and
/// captured output volume.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Wall-clock timeout, armed at spawn
    pub timeout: Duration,

    /// Maximum captured bytes per stream (stdout and stderr separately)
    pub max_capture: usize,
}

impl RunnerConfig {
    pub fn new(timeout: Duration, max_capture: usize) -> Self {
        Self {
            timeout,
            max_capture,
        }
    }
}

/// Counters maintained across a runner's lifetime
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub killed: u64,
    pub timed_out: u64,
}

/// Handle to a started task
///
/// The spawn-time snapshot is available immediately; `wait` suspends
/// until the supervisor reports the terminal [`TaskResult`].
#[derive(Debug)]
pub struct TaskHandle {
    task: Task,
    done: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.task.pid
    }

    /// Spawn-time snapshot of the task
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Wait for the terminal result
    pub async fn wait(self) -> Result<TaskResult> {
        self.done
            .await
            .map_err(|_| Error::Task("task supervisor dropped before reporting".to_string()))
    }
}

/// Supervised external-command runner
///
/// Construct once per dispatcher and clone freely; clones share the
/// running set and counters.
#[derive(Clone)]
pub struct TaskRunner {
    /// Active tasks by ID
    running: Arc<RwLock<HashMap<TaskId, Task>>>,

    /// Lifetime counters
    stats: Arc<Mutex<RunnerStats>>,

    /// Resource bounds
    config: RunnerConfig,
}

impl TaskRunner {
    /// Create a runner with explicit resource bounds
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            running: Arc::new(RwLock::new(HashMap::with_capacity(16))),
            stats: Arc::new(Mutex::new(RunnerStats::default())),
            config,
        }
    }

    /// Start one external command under an agent profile
    ///
    /// Validation failures (empty/multiline input, malformed command name,
    /// command not in the allow-list) return an error before any process
    /// is spawned or task registered. Execution failures never surface
    /// here - they are terminal statuses on the eventual [`TaskResult`].
    pub async fn start(&self, profile: &AgentProfile, raw_input: &str) -> Result<TaskHandle> {
        let (command, args) = parse_input(raw_input)?;
        if !profile.allows(&command) {
            debug!(agent = %profile.name, command = %command, "Command rejected by allow-list");
            return Err(Error::command_not_allowed(
                &profile.name,
                &command,
                &profile.allow_commands,
            ));
        }

        let cwd = std::env::current_dir()?.join(&profile.cwd);
        let mut task = Task::new(&profile.name, &command, args, cwd);

        let mut cmd = Command::new(&task.command);
        cmd.args(&task.args)
            .current_dir(&task.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Environment is inherited as-is; filtering secrets out of it is
        // the profile owner's call, not this component's.

        self.stats.lock().await.started += 1;

        let (done_tx, done_rx) = oneshot::channel();
        match cmd.spawn() {
            Ok(child) => {
                task.pid = child.id();
                self.running.write().await.insert(task.id, task.clone());
                info!(
                    task = %task.id, agent = %task.agent, command = %task.command,
                    pid = ?task.pid, "Spawned task"
                );

                let runner = self.clone();
                let supervised = task.clone();
                tokio::spawn(async move {
                    let result = runner.supervise(supervised, child).await;
                    let _ = done_tx.send(result);
                });
            }
            Err(e) => {
                // The task still passes through the running set so the
                // lifecycle is identical on every path.
                self.running.write().await.insert(task.id, task.clone());
                warn!(task = %task.id, command = %task.command, "Failed to spawn: {}", e);
                let result = self
                    .conclude(
                        task.clone(),
                        TaskStatus::Failed,
                        String::new(),
                        e.to_string(),
                        false,
                        Some(1),
                        None,
                    )
                    .await;
                let _ = done_tx.send(result);
            }
        }

        Ok(TaskHandle {
            task,
            done: done_rx,
        })
    }

    /// Supervise a spawned child until closure, error, or timeout
    async fn supervise(&self, task: Task, mut child: Child) -> TaskResult {
        let stdout_buf = Arc::new(Mutex::new(CappedBuffer::new(self.config.max_capture)));
        let stderr_buf = Arc::new(Mutex::new(CappedBuffer::new(self.config.max_capture)));

        let stdout_reader = child
            .stdout
            .take()
            .map(|stream| tokio::spawn(drain_stream(stream, Arc::clone(&stdout_buf))));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(drain_stream(stream, Arc::clone(&stderr_buf))));

        let timeout = tokio::time::sleep(self.config.timeout);
        tokio::pin!(timeout);
        let mut timed_out = false;

        let wait_result = loop {
            tokio::select! {
                res = child.wait() => break res,
                _ = &mut timeout, if !timed_out => {
                    // Timeout is authoritative from this point on; the
                    // close event below must not overwrite it.
                    timed_out = true;
                    warn!(
                        task = %task.id, command = %task.command,
                        "Task exceeded {:?}, killing process", self.config.timeout
                    );
                    if let Err(e) = child.start_kill() {
                        warn!(task = %task.id, "Kill after timeout failed: {}", e);
                    }
                }
            }
        };

        // Flush whatever output made it through before closure.
        if let Some(handle) = stdout_reader {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_reader {
            let _ = handle.await;
        }
        let stdout = stdout_buf.lock().await.take();
        let mut stderr = stderr_buf.lock().await.take();

        let (status, exit_code, signal) = match wait_result {
            Ok(exit) => {
                let signal = exit_signal(&exit);
                let status = if timed_out {
                    TaskStatus::Timeout
                } else {
                    resolve_status(&exit)
                };
                (status, exit.code(), signal)
            }
            Err(e) => {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&e.to_string());
                let status = if timed_out {
                    TaskStatus::Timeout
                } else {
                    TaskStatus::Failed
                };
                (status, Some(1), None)
            }
        };

        self.conclude(task, status, stdout, stderr, timed_out, exit_code, signal)
            .await
    }

    /// Single terminal transition: build the result, drop the task from
    /// the running set, bump counters, log
    #[allow(clippy::too_many_arguments)]
    async fn conclude(
        &self,
        mut task: Task,
        status: TaskStatus,
        stdout: String,
        stderr: String,
        timed_out: bool,
        exit_code: Option<i32>,
        signal: Option<i32>,
    ) -> TaskResult {
        task.status = status;
        let result = TaskResult {
            task,
            stdout,
            stderr,
            timed_out,
            exit_code,
            signal,
            finished_at: Utc::now(),
        };

        self.running.write().await.remove(&result.task.id);
        {
            let mut stats = self.stats.lock().await;
            match result.task.status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Killed => stats.killed += 1,
                TaskStatus::Timeout => stats.timed_out += 1,
                TaskStatus::Running => {}
            }
        }

        match result.task.status {
            TaskStatus::Completed => info!(
                task = %result.task.id, exit = ?result.exit_code, "Task completed"
            ),
            status => warn!(
                task = %result.task.id, %status, exit = ?result.exit_code,
                signal = ?result.signal, "Task finished abnormally"
            ),
        }
        result
    }

    /// All currently active tasks, sorted by start time ascending
    pub async fn list_running(&self) -> Vec<Task> {
        let running = self.running.read().await;
        let mut tasks: Vec<Task> = running.values().cloned().collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    /// Request termination of one task
    ///
    /// Returns whether the OS accepted the signal. An unknown id is an
    /// ordinary `false`, never an error.
    pub async fn kill(&self, task_id: TaskId) -> bool {
        let pid = {
            let running = self.running.read().await;
            running.get(&task_id).and_then(|t| t.pid)
        };
        match pid {
            Some(pid) => {
                let accepted = request_termination(pid);
                if accepted {
                    info!(task = %task_id, pid, "Sent termination request");
                }
                accepted
            }
            None => false,
        }
    }

    /// Request termination of every active task, returning how many
    /// signals the OS accepted
    pub async fn kill_all(&self) -> usize {
        let targets: Vec<(TaskId, Option<u32>)> = {
            let running = self.running.read().await;
            running.values().map(|t| (t.id, t.pid)).collect()
        };

        let mut accepted = 0;
        for (task_id, pid) in targets {
            if let Some(pid) = pid {
                if request_termination(pid) {
                    info!(task = %task_id, pid, "Sent termination request");
                    accepted += 1;
                }
            }
        }
        accepted
    }

    /// Lifetime counters snapshot
    pub async fn stats(&self) -> RunnerStats {
        *self.stats.lock().await
    }
}

// ============================================================================
// Input parsing
// ============================================================================

/// Split raw input into a validated command name and a literal argv
fn parse_input(raw: &str) -> Result<(String, Vec<String>)> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(Error::MissingCommand);
    }
    // Single-line only: multiline input has no unambiguous argv reading
    // without handing it to a shell, which this runner never does.
    if input.contains('\n') || input.contains('\r') {
        return Err(Error::MultilineCommand);
    }

    let mut tokens = input.split_whitespace();
    let command = tokens
        .next()
        .ok_or(Error::MissingCommand)?
        .to_ascii_lowercase();
    if !command_name_pattern().is_match(&command) {
        return Err(Error::InvalidCommandName(command));
    }

    let args = tokens.map(str::to_string).collect();
    Ok((command, args))
}

fn command_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9._-]+$").expect("command name regex"))
}

// ============================================================================
// Stream capture
// ============================================================================

async fn drain_stream<R>(mut stream: R, buffer: Arc<Mutex<CappedBuffer>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                buffer.lock().await.push(&text);
            }
            Err(e) => {
                debug!("Stream read ended with error: {}", e);
                break;
            }
        }
    }
}

// ============================================================================
// Exit status resolution
// ============================================================================

/// Map a close event to a terminal status (timeout already excluded)
fn resolve_status(exit: &std::process::ExitStatus) -> TaskStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = exit.signal() {
            return if signal == libc::SIGTERM || signal == libc::SIGKILL {
                TaskStatus::Killed
            } else {
                TaskStatus::Failed
            };
        }
    }
    match exit.code() {
        Some(0) => TaskStatus::Completed,
        _ => TaskStatus::Failed,
    }
}

#[cfg(unix)]
fn exit_signal(exit: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    exit.signal()
}

#[cfg(not(unix))]
fn exit_signal(_exit: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Send a termination-request signal (SIGTERM on Unix)
#[cfg(unix)]
fn request_termination(pid: u32) -> bool {
    // SAFETY: kill() with a valid signal number only touches process
    // state owned by the kernel.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_termination(_pid: u32) -> bool {
    warn!("Termination signals are not supported on this platform");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_empty_input() {
        assert!(matches!(parse_input("   "), Err(Error::MissingCommand)));
    }

    #[test]
    fn test_parse_rejects_multiline() {
        assert!(matches!(
            parse_input("echo hi\nrm -rf /"),
            Err(Error::MultilineCommand)
        ));
    }

    #[test]
    fn test_parse_lowercases_command() {
        let (command, args) = parse_input("ECHO Hello World").unwrap();
        assert_eq!(command, "echo");
        assert_eq!(args, vec!["Hello", "World"]);
    }

    #[test]
    fn test_parse_rejects_metacharacters_in_name() {
        assert!(matches!(
            parse_input("./run.sh"),
            Err(Error::InvalidCommandName(_))
        ));
        assert!(matches!(
            parse_input("a;b arg"),
            Err(Error::InvalidCommandName(_))
        ));
    }

    #[test]
    fn test_parse_allows_dots_dashes_underscores() {
        let (command, _) = parse_input("python3.12 -V").unwrap();
        assert_eq!(command, "python3.12");
        let (command, _) = parse_input("my_tool-v2 x").unwrap();
        assert_eq!(command, "my_tool-v2");
    }

    #[test]
    fn test_args_pass_through_verbatim() {
        let (_, args) = parse_input("echo $(whoami) ; rm *").unwrap();
        // Metacharacters in args are literal bytes, not shell syntax.
        assert_eq!(args, vec!["$(whoami)", ";", "rm", "*"]);
    }

    #[test]
    fn test_trimmed_trailing_newline_is_single_line() {
        let (command, _) = parse_input("echo hi\n").unwrap();
        assert_eq!(command, "echo");
    }
}
