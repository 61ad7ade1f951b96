//! Chat Queue - per-conversation task serialization
//!
//! Features:
//! - Strict FIFO execution per chat key
//! - Full concurrency across different chat keys
//! - Queueing-delay measurement (enqueue to executor start)
//! - Depth accounting and a busy-chats snapshot
//! - Panic isolation: a failing executor never blocks its successors
//!
//! The queue owns its `tails`/`depths` maps exclusively; callers only
//! observe through accessor methods. All read-modify-write sequences on
//! the maps run under one mutex, so the "read previous tail, install new
//! tail" step is atomic on a multi-threaded runtime.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use valet_foundation::{Error, Result};

/// Snapshot cap bounds for [`ChatQueue::snapshot`]
const SNAPSHOT_MIN: usize = 1;
const SNAPSHOT_MAX: usize = 500;

// ============================================================================
// Chat Key
// ============================================================================

/// Integer key grouping all work that must be strictly ordered
///
/// Chat ids arriving from the wire are raw JSON numbers; [`ChatKey::new`]
/// is the single validation boundary - non-finite input is rejected before
/// any queue state is touched, finite input is floored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatKey(i64);

impl ChatKey {
    /// Validate and floor a raw numeric chat id
    pub fn new(raw: f64) -> Result<Self> {
        if !raw.is_finite() {
            return Err(Error::InvalidChatKey(format!(
                "chat id must be a finite number, got {raw}"
            )));
        }
        Ok(Self(raw.floor() as i64))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ChatKey {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ChatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Outcome types
// ============================================================================

/// Settled outcome of a queued task
#[derive(Debug)]
pub struct QueuedResult<T> {
    /// Queueing delay: enqueue to executor start, in milliseconds
    pub wait_ms: u64,

    /// Whatever the executor returned
    pub value: T,
}

/// Handle to a task that has been enqueued but not yet settled
#[derive(Debug)]
pub struct PendingTask<T> {
    chat: ChatKey,
    rx: oneshot::Receiver<Result<QueuedResult<T>>>,
}

impl<T> PendingTask<T> {
    /// Chat key this task was enqueued on
    pub fn chat(&self) -> ChatKey {
        self.chat
    }

    /// Wait until the task settles
    ///
    /// An executor panic surfaces here as an error; it never affects
    /// sibling tasks on the same or other chats.
    pub async fn wait(self) -> Result<QueuedResult<T>> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Task(
                "queue worker dropped before settling".to_string(),
            )),
        }
    }
}

/// One row of the busy-chats snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDepth {
    pub chat: i64,
    pub depth: usize,
}

// ============================================================================
// Queue
// ============================================================================

struct QueueState {
    /// Completion signal of the most recently enqueued task per chat.
    /// Invariant: an entry exists iff `depths` has a non-zero count.
    tails: HashMap<i64, oneshot::Receiver<()>>,

    /// Enqueued-but-not-settled count per chat. Entries are removed the
    /// instant the count reaches zero, so memory is bounded by the number
    /// of currently active chats.
    depths: HashMap<i64, usize>,
}

/// Per-chat task serialization queue
///
/// Construct once and clone freely; clones share the same state.
#[derive(Clone)]
pub struct ChatQueue {
    state: Arc<Mutex<QueueState>>,
}

impl ChatQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                tails: HashMap::new(),
                depths: HashMap::new(),
            })),
        }
    }

    /// Enqueue a unit of work for a chat
    ///
    /// The executor starts only after every previously enqueued task for
    /// the same chat has fully settled - success, failure, or panic. Tasks
    /// on different chats run with no relative ordering at all.
    pub async fn enqueue<F, Fut, T>(&self, chat: ChatKey, executor: F) -> PendingTask<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let key = chat.get();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let prev_tail = {
            let mut state = self.state.lock().await;
            *state.depths.entry(key).or_insert(0) += 1;
            state.tails.insert(key, done_rx)
        };

        let enqueued_at = Instant::now();
        let (out_tx, out_rx) = oneshot::channel();
        let state_handle = Arc::clone(&self.state);

        tokio::spawn(async move {
            // Wait for the predecessor to settle. A dropped sender (the
            // predecessor panicked mid-bookkeeping) releases us too.
            if let Some(prev) = prev_tail {
                let _ = prev.await;
            }

            let wait_ms = enqueued_at.elapsed().as_millis() as u64;
            debug!(chat = key, wait_ms, "Starting queued task");

            // The closure is invoked inside the caught future, so a panic
            // while *constructing* the work is isolated the same way as a
            // panic while running it.
            let outcome = AssertUnwindSafe(async move { executor().await })
                .catch_unwind()
                .await;

            // Bookkeeping runs on every path, panic included, before the
            // successor is released.
            {
                let mut state = state_handle.lock().await;
                if let Some(depth) = state.depths.get_mut(&key) {
                    *depth -= 1;
                    if *depth == 0 {
                        state.depths.remove(&key);
                        state.tails.remove(&key);
                    }
                }
            }
            let _ = done_tx.send(());

            let settled = match outcome {
                Ok(value) => Ok(QueuedResult { wait_ms, value }),
                Err(payload) => {
                    let msg = panic_message(payload);
                    warn!(chat = key, "Queued task panicked: {}", msg);
                    Err(Error::Task(format!("queued task panicked: {msg}")))
                }
            };
            let _ = out_tx.send(settled);
        });

        PendingTask { chat, rx: out_rx }
    }

    /// Pending-task count for a chat (0 if idle)
    pub async fn depth(&self, chat: ChatKey) -> usize {
        let state = self.state.lock().await;
        state.depths.get(&chat.get()).copied().unwrap_or(0)
    }

    /// Busiest chats, depth descending with ascending chat-id tiebreak
    ///
    /// Only chats with pending work appear. `max_chats` is clamped to
    /// [1, 500].
    pub async fn snapshot(&self, max_chats: usize) -> Vec<ChatDepth> {
        let cap = max_chats.clamp(SNAPSHOT_MIN, SNAPSHOT_MAX);
        let state = self.state.lock().await;
        let mut entries: Vec<ChatDepth> = state
            .depths
            .iter()
            .map(|(&chat, &depth)| ChatDepth { chat, depth })
            .collect();
        drop(state);

        entries.sort_by(|a, b| b.depth.cmp(&a.depth).then(a.chat.cmp(&b.chat)));
        entries.truncate(cap);
        entries
    }

    /// Number of chats with pending work
    pub async fn active_chats(&self) -> usize {
        self.state.lock().await.depths.len()
    }
}

impl Default for ChatQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_chat_key_rejects_non_finite() {
        assert!(ChatKey::new(f64::NAN).is_err());
        assert!(ChatKey::new(f64::INFINITY).is_err());
        assert!(ChatKey::new(f64::NEG_INFINITY).is_err());
        assert!(matches!(
            ChatKey::new(f64::NAN),
            Err(Error::InvalidChatKey(_))
        ));
    }

    #[test]
    fn test_chat_key_floors() {
        assert_eq!(ChatKey::new(100.9).unwrap(), ChatKey::from(100));
        assert_eq!(ChatKey::new(-3.2).unwrap(), ChatKey::from(-4));
    }

    #[tokio::test]
    async fn test_per_key_ordering() {
        let queue = ChatQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&order);
        let first = queue
            .enqueue(ChatKey::from(100), move || async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                first_log.lock().await.push("first");
                "first"
            })
            .await;

        let second_log = Arc::clone(&order);
        let second = queue
            .enqueue(ChatKey::from(100), move || async move {
                second_log.lock().await.push("second");
                "second"
            })
            .await;

        assert_eq!(queue.depth(ChatKey::from(100)).await, 2);

        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();

        assert_eq!(first.value, "first");
        assert_eq!(second.value, "second");
        // The second task spent at least the first task's runtime queued.
        assert!(second.wait_ms >= first.wait_ms);
        assert_eq!(*order.lock().await, vec!["first", "second"]);

        assert_eq!(queue.depth(ChatKey::from(100)).await, 0);
        assert!(queue.snapshot(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_cross_key_independence() {
        let queue = ChatQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Chat A is held open until we say so.
        let held = queue
            .enqueue(ChatKey::from(1), move || async move {
                let _ = release_rx.await;
                "held"
            })
            .await;

        // Chat B settles while A is still blocked.
        let quick = queue
            .enqueue(ChatKey::from(2), || async { "quick" })
            .await;
        let quick = quick.wait().await.unwrap();
        assert_eq!(quick.value, "quick");
        assert_eq!(queue.depth(ChatKey::from(1)).await, 1);

        release_tx.send(()).unwrap();
        assert_eq!(held.wait().await.unwrap().value, "held");
        assert_eq!(queue.depth(ChatKey::from(1)).await, 0);
    }

    #[tokio::test]
    async fn test_predecessor_panic_does_not_block_successor() {
        let queue = ChatQueue::new();

        let bad = queue
            .enqueue(ChatKey::from(5), || async {
                panic!("executor blew up");
            })
            .await;
        let good = queue.enqueue(ChatKey::from(5), || async { 7u32 }).await;

        let bad = bad.wait().await;
        assert!(matches!(bad, Err(Error::Task(_))));

        let good = good.wait().await.unwrap();
        assert_eq!(good.value, 7);
        assert_eq!(queue.depth(ChatKey::from(5)).await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_orders_by_depth_then_chat() {
        let queue = ChatQueue::new();
        let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);

        let mut pending = Vec::new();
        // chat 30: depth 1, chat 10: depth 2, chat 20: depth 2
        for (chat, count) in [(30i64, 1usize), (10, 2), (20, 2)] {
            for _ in 0..count {
                let mut gate = gate_rx.clone();
                pending.push(
                    queue
                        .enqueue(ChatKey::from(chat), move || async move {
                            while !*gate.borrow() {
                                let _ = gate.changed().await;
                            }
                        })
                        .await,
                );
            }
        }

        let snapshot = queue.snapshot(10).await;
        let pairs: Vec<(i64, usize)> = snapshot.iter().map(|e| (e.chat, e.depth)).collect();
        assert_eq!(pairs, vec![(10, 2), (20, 2), (30, 1)]);

        // Cap is clamped to at least one entry.
        assert_eq!(queue.snapshot(0).await.len(), 1);

        gate_tx.send(true).unwrap();
        for task in pending {
            task.wait().await.unwrap();
        }
        assert_eq!(queue.active_chats().await, 0);
    }

    #[tokio::test]
    async fn test_depth_defaults_to_zero() {
        let queue = ChatQueue::new();
        assert_eq!(queue.depth(ChatKey::from(999)).await, 0);
    }
}
