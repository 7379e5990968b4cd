//! Index queue and worker.
//!
//! [`IndexQueue`] is the task table: at most one live [`IndexTask`] per
//! `(collection, document)` key. Every check-then-insert or
//! check-then-mark happens under the single table lock, so concurrent
//! producers cannot create a second live task for a document.
//!
//! ```text
//! enqueue ──▶ Pending ──dequeue──▶ Processing ──complete──▶ (removed)
//!               ▲                       │
//!               └──── superseded ───────┘
//! ```
//!
//! An enqueue that lands on a `Pending` task is absorbed. One that lands
//! on a `Processing` task marks it superseded: the in-flight pass still
//! commits, then [`IndexQueue::complete`] immediately queues a fresh task
//! for the same document.
//!
//! [`Worker`] drains the queue with up to `parallelism` passes in flight.
//! Because a key is only handed out while its task moves to `Processing`,
//! two passes for one document never overlap.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;

use wiki_index_core::models::{IndexStatus, IndexTask, IndexTaskState};

/// `(collection, document_id)`
pub type TaskKey = (String, String);

/// What [`IndexQueue::enqueue`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending task was created.
    Queued,
    /// A pending task already existed.
    Deduplicated,
    /// The document is being processed; a re-run was scheduled.
    Superseded,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskKey, IndexTask>,
    pending: VecDeque<TaskKey>,
}

/// Deduplicating task table plus the FIFO of pending keys.
#[derive(Default)]
pub struct IndexQueue {
    state: Mutex<QueueState>,
    available: Notify,
    idle: Notify,
}

fn key(collection: &str, document_id: &str) -> TaskKey {
    (collection.to_string(), document_id.to_string())
}

impl IndexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Every critical section leaves the table consistent, so a
        // poisoned lock is still safe to use.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request (re)indexing of a document. Never fails.
    pub fn enqueue(&self, collection: &str, document_id: &str) -> EnqueueOutcome {
        self.enqueue_from(collection, document_id, IndexStatus::Unindexed)
    }

    /// Like [`enqueue`](Self::enqueue), recording the document's status
    /// before it was marked pending.
    pub fn enqueue_from(
        &self,
        collection: &str,
        document_id: &str,
        prior_status: IndexStatus,
    ) -> EnqueueOutcome {
        let key = key(collection, document_id);
        let mut state = self.lock();

        if let Some(task) = state.tasks.get_mut(&key) {
            match task.state {
                IndexTaskState::Pending => {
                    tracing::debug!(collection, document = document_id, "enqueue deduplicated");
                    return EnqueueOutcome::Deduplicated;
                }
                IndexTaskState::Processing => {
                    task.superseded = true;
                    tracing::debug!(collection, document = document_id, "enqueue superseded in-flight pass");
                    return EnqueueOutcome::Superseded;
                }
                // Finished tasks are removed on completion; replace any leftover.
                IndexTaskState::Done | IndexTaskState::Failed => {}
            }
        }

        state.tasks.insert(
            key.clone(),
            IndexTask::new(collection, document_id).with_prior_status(prior_status),
        );
        state.pending.push_back(key);
        drop(state);

        tracing::debug!(collection, document = document_id, "enqueued");
        self.available.notify_one();
        EnqueueOutcome::Queued
    }

    /// Take the oldest pending task, moving it to `Processing`.
    pub fn try_dequeue(&self) -> Option<IndexTask> {
        let mut state = self.lock();
        while let Some(key) = state.pending.pop_front() {
            if let Some(task) = state.tasks.get_mut(&key) {
                if task.state == IndexTaskState::Pending {
                    task.state = IndexTaskState::Processing;
                    return Some(task.clone());
                }
            }
        }
        None
    }

    /// Wait for a pending task. Cancel-safe: a task is only removed from
    /// the pending list in the same poll that returns it.
    pub async fn dequeue(&self) -> IndexTask {
        loop {
            let notified = self.available.notified();
            if let Some(task) = self.try_dequeue() {
                return task;
            }
            notified.await;
        }
    }

    /// Count the start of another attempt on a processing task.
    pub fn begin_attempt(&self, collection: &str, document_id: &str) -> u32 {
        let mut state = self.lock();
        match state.tasks.get_mut(&key(collection, document_id)) {
            Some(task) => {
                task.attempt += 1;
                task.attempt
            }
            None => 1,
        }
    }

    /// Finish a pass. Returns `true` if the task had been superseded, in
    /// which case a new pending task (with `settled` as its prior status)
    /// has already been queued.
    pub fn complete(
        &self,
        collection: &str,
        document_id: &str,
        outcome: IndexTaskState,
        settled: IndexStatus,
    ) -> bool {
        let key = key(collection, document_id);
        let mut state = self.lock();

        let superseded = match state.tasks.remove(&key) {
            Some(task) => task.superseded,
            None => false,
        };
        tracing::debug!(collection, document = document_id, ?outcome, superseded, "task finished");

        if superseded {
            state.tasks.insert(
                key.clone(),
                IndexTask::new(collection, document_id).with_prior_status(settled),
            );
            state.pending.push_back(key);
            drop(state);
            self.available.notify_one();
            return true;
        }

        let idle = state.tasks.is_empty();
        drop(state);
        if idle {
            self.idle.notify_waiters();
        }
        false
    }

    /// Snapshot of the live task for a document.
    pub fn task(&self, collection: &str, document_id: &str) -> Option<IndexTask> {
        self.lock()
            .tasks
            .get(&key(collection, document_id))
            .cloned()
    }

    /// Live tasks (pending plus processing).
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once no task is pending or processing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// One indexing pass for a dequeued task.
///
/// Implementations must settle the task with [`IndexQueue::complete`].
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: IndexTask);

    /// Settle a task whose [`handle`](Self::handle) panicked.
    async fn abandon(&self, task: IndexTask, cause: String);
}

/// Drains an [`IndexQueue`] into a [`TaskHandler`].
pub struct Worker;

impl Worker {
    /// Run until `shutdown` flips (or its sender is dropped), then wait for
    /// in-flight passes to finish.
    pub fn spawn(
        queue: Arc<IndexQueue>,
        handler: Arc<dyn TaskHandler>,
        parallelism: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let parallelism = parallelism.max(1);
        tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(parallelism));
            tracing::info!(parallelism, "index worker started");

            loop {
                let permit = tokio::select! {
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown.changed() => break,
                };
                let task = tokio::select! {
                    task = queue.dequeue() => task,
                    _ = shutdown.changed() => break,
                };

                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let pass = {
                        let handler = Arc::clone(&handler);
                        let task = task.clone();
                        tokio::spawn(async move { handler.handle(task).await })
                    };
                    if let Err(e) = pass.await {
                        if e.is_panic() {
                            let cause = panic_message(e.into_panic());
                            tracing::error!(
                                collection = %task.collection,
                                document = %task.document_id,
                                cause = %cause,
                                "indexing pass panicked"
                            );
                            handler.abandon(task, cause).await;
                        }
                    }
                    drop(permit);
                });
            }

            let _ = permits.acquire_many(parallelism as u32).await;
            tracing::info!("index worker stopped");
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("indexing pass panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_enqueue_deduplicates_pending() {
        let queue = IndexQueue::new();
        assert_eq!(queue.enqueue("Docs", "d1"), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue("Docs", "d1"), EnqueueOutcome::Deduplicated);
        assert_eq!(queue.enqueue("Other", "d1"), EnqueueOutcome::Queued);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_supersede_requeues_after_completion() {
        let queue = IndexQueue::new();
        queue.enqueue("Docs", "d1");
        let task = queue.try_dequeue().unwrap();
        assert_eq!(task.state, IndexTaskState::Processing);
        assert!(queue.try_dequeue().is_none());

        assert_eq!(queue.enqueue("Docs", "d1"), EnqueueOutcome::Superseded);
        assert!(queue.task("Docs", "d1").unwrap().superseded);
        // Still only one live task
        assert_eq!(queue.len(), 1);

        let requeued = queue.complete("Docs", "d1", IndexTaskState::Done, IndexStatus::Indexed);
        assert!(requeued);
        let next = queue.try_dequeue().unwrap();
        assert_eq!(next.attempt, 0);
        assert!(!next.superseded);
        assert_eq!(next.prior_status, IndexStatus::Indexed);

        assert!(!queue.complete("Docs", "d1", IndexTaskState::Done, IndexStatus::Indexed));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order_and_attempt_counting() {
        let queue = IndexQueue::new();
        queue.enqueue("Docs", "a");
        queue.enqueue("Docs", "b");
        assert_eq!(queue.try_dequeue().unwrap().document_id, "a");
        assert_eq!(queue.begin_attempt("Docs", "a"), 1);
        assert_eq!(queue.begin_attempt("Docs", "a"), 2);
        assert_eq!(queue.try_dequeue().unwrap().document_id, "b");
    }

    #[test]
    fn test_concurrent_enqueue_creates_one_task() {
        let queue = Arc::new(IndexQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        queue.enqueue("Docs", "d1");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 1);
        assert!(queue.try_dequeue().is_some());
        assert!(queue.try_dequeue().is_none());
    }

    struct Counting {
        queue: Arc<IndexQueue>,
        seen: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, task: IndexTask) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.queue.complete(
                &task.collection,
                &task.document_id,
                IndexTaskState::Done,
                IndexStatus::Indexed,
            );
        }

        async fn abandon(&self, task: IndexTask, _cause: String) {
            self.queue.complete(
                &task.collection,
                &task.document_id,
                IndexTaskState::Failed,
                IndexStatus::Failed,
            );
        }
    }

    struct Panicking {
        queue: Arc<IndexQueue>,
        abandoned: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskHandler for Panicking {
        async fn handle(&self, task: IndexTask) {
            if task.document_id == "bad" {
                panic!("embedder exploded");
            }
            self.queue.complete(
                &task.collection,
                &task.document_id,
                IndexTaskState::Done,
                IndexStatus::Indexed,
            );
        }

        async fn abandon(&self, task: IndexTask, cause: String) {
            self.abandoned.lock().unwrap().push(cause);
            self.queue.complete(
                &task.collection,
                &task.document_id,
                IndexTaskState::Failed,
                IndexStatus::Failed,
            );
        }
    }

    #[tokio::test]
    async fn test_panicking_pass_is_abandoned_and_worker_continues() {
        let queue = Arc::new(IndexQueue::new());
        let handler = Arc::new(Panicking {
            queue: Arc::clone(&queue),
            abandoned: std::sync::Mutex::new(Vec::new()),
        });
        let (tx, rx) = watch::channel(false);
        let worker = Worker::spawn(Arc::clone(&queue), handler.clone(), 2, rx);

        queue.enqueue("Docs", "bad");
        queue.enqueue("Docs", "good");
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        let abandoned = handler.abandoned.lock().unwrap().clone();
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0].contains("embedder exploded"));
        // The key is free again.
        assert_eq!(queue.enqueue("Docs", "bad"), EnqueueOutcome::Queued);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_respects_parallelism_and_drains() {
        let queue = Arc::new(IndexQueue::new());
        let handler = Arc::new(Counting {
            queue: Arc::clone(&queue),
            seen: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let (tx, rx) = watch::channel(false);
        let worker = Worker::spawn(Arc::clone(&queue), handler.clone(), 2, rx);

        for i in 0..6 {
            queue.enqueue("Docs", &format!("d{}", i));
        }
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        assert_eq!(handler.seen.load(Ordering::SeqCst), 6);
        assert!(handler.max_in_flight.load(Ordering::SeqCst) <= 2);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue_returns() {
        let queue = IndexQueue::new();
        tokio::time::timeout(Duration::from_millis(100), queue.wait_idle())
            .await
            .unwrap();
    }
}
