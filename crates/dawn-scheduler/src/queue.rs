use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::Result,
    types::{DueTask, ExistingTaskPolicy, TaskKey, TaskPayload},
};

/// Delayed, uniquely-keyed work items.
///
/// Tasks live only as long as the process; callers rebuild them on boot from
/// the alarm store.
pub trait TaskQueue: Send + Sync {
    /// Register `payload` to come due after `delay` under `key`.
    fn enqueue_unique(
        &self,
        key: TaskKey,
        delay: Duration,
        payload: TaskPayload,
        tags: Vec<String>,
        policy: ExistingTaskPolicy,
    ) -> Result<()>;

    /// Cancel the task under `key`. Returns `false` if nothing was pending.
    fn cancel(&self, key: &TaskKey) -> bool;

    /// Cancel every pending task carrying `tag`. Returns how many were removed.
    fn cancel_all_tagged(&self, tag: &str) -> usize;

    /// Keys of all pending tasks, sorted.
    fn pending(&self) -> Vec<TaskKey>;
}

struct PendingTask {
    generation: u64,
    token: CancellationToken,
    tags: Vec<String>,
}

/// [`TaskQueue`] backed by tokio timers.
///
/// Each task is a spawned sleep racing its own [`CancellationToken`]. Due
/// tasks are handed to the dispatcher over an `mpsc` channel. Removal from the
/// pending map is the commit point, so a cancel that wins the race is never
/// followed by a delivery.
#[derive(Clone)]
pub struct TokioTaskQueue {
    pending: Arc<DashMap<TaskKey, PendingTask>>,
    due_tx: mpsc::Sender<DueTask>,
    generation: Arc<AtomicU64>,
}

impl TokioTaskQueue {
    pub fn new(due_tx: mpsc::Sender<DueTask>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            due_tx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn spawn_timer(
        &self,
        key: TaskKey,
        delay: Duration,
        payload: TaskPayload,
        generation: u64,
        token: CancellationToken,
    ) {
        let pending = Arc::clone(&self.pending);
        let tx = self.due_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(task = %key, "delayed task cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    // Only the generation that is still registered may deliver.
                    if pending.remove_if(&key, |_, t| t.generation == generation).is_none() {
                        return;
                    }
                    let task = DueTask { key, payload };
                    match tx.try_send(task) {
                        Ok(()) => {}
                        Err(TrySendError::Full(task)) => {
                            warn!(task = %task.key, "due-task channel full, waiting for room");
                            if tx.send(task).await.is_err() {
                                warn!("due-task channel closed, task dropped");
                            }
                        }
                        Err(TrySendError::Closed(task)) => {
                            warn!(task = %task.key, "due-task channel closed, task dropped");
                        }
                    }
                }
            }
        });
    }
}

impl TaskQueue for TokioTaskQueue {
    fn enqueue_unique(
        &self,
        key: TaskKey,
        delay: Duration,
        payload: TaskPayload,
        tags: Vec<String>,
        policy: ExistingTaskPolicy,
    ) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let task = PendingTask {
            generation,
            token: token.clone(),
            tags,
        };

        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut existing) => match policy {
                ExistingTaskPolicy::Keep => {
                    debug!(task = %key, "task already pending, keeping it");
                    return Ok(());
                }
                ExistingTaskPolicy::Replace => {
                    let old = existing.insert(task);
                    old.token.cancel();
                    debug!(task = %key, ?delay, "pending task replaced");
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(task);
                debug!(task = %key, ?delay, "task enqueued");
            }
        }

        self.spawn_timer(key, delay, payload, generation, token);
        Ok(())
    }

    fn cancel(&self, key: &TaskKey) -> bool {
        match self.pending.remove(key) {
            Some((_, task)) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all_tagged(&self, tag: &str) -> usize {
        let keys: Vec<TaskKey> = self
            .pending
            .iter()
            .filter(|e| e.value().tags.iter().any(|t| t == tag))
            .map(|e| e.key().clone())
            .collect();
        keys.iter().filter(|k| self.cancel(k)).count()
    }

    fn pending(&self) -> Vec<TaskKey> {
        let mut keys: Vec<TaskKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
