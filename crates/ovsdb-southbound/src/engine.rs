//! Reconciliation engine.
//!
//! Two concurrency primitives:
//!
//! - a fixed pool of workers draining one bounded queue of one-shot runs;
//! - a single timer task holding delayed retries. When a retry fires the
//!   timer only re-submits the task into the worker queue, so a slow
//!   reconciliation never holds up other timers.
//!
//! Every queued run and pending timer is tracked in the [`TaskStore`] by
//! task identity.

use crate::config::EngineConfig;
use crate::error::{Result, SouthboundError};
use crate::task::{self, AttemptOutcome, ReconciliationTask};
use crate::task_store::{TaskHandle, TaskId, TaskStore};
use serde::Serialize;
use std::future::poll_fn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

struct WorkItem {
    task: Arc<dyn ReconciliationTask>,
    handle: TaskHandle,
}

struct TimerEntry {
    task: Arc<dyn ReconciliationTask>,
    handle: TaskHandle,
    delay: Duration,
}

#[derive(Debug, Default)]
struct EngineCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    retries_scheduled: AtomicU64,
    abandoned: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Runs accepted into the worker queue
    pub submitted: u64,
    /// Submissions refused because the queue was full
    pub rejected: u64,
    /// Tasks that reached SUCCEEDED
    pub completed: u64,
    /// Retry timers scheduled
    pub retries_scheduled: u64,
    /// Tasks that reached ABANDONED
    pub abandoned: u64,
    /// Attempts that panicked
    pub panicked: u64,
}

struct EngineInner {
    store: TaskStore,
    work_tx: mpsc::Sender<WorkItem>,
    timer_tx: mpsc::UnboundedSender<TimerEntry>,
    capacity: usize,
    shutdown: CancellationToken,
    counters: EngineCounters,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.store.cancel_all();
    }
}

/// Runs reconciliation tasks on a bounded worker pool with delayed retry.
///
/// Cloning is cheap; all clones share one pool, timer and store.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    /// Starts the worker pool and the retry timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &EngineConfig) -> Self {
        let workers = config.worker_threads.max(1);
        let capacity = config.queue_capacity.max(1);
        let (work_tx, work_rx) = mpsc::channel(capacity);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(EngineInner {
            store: TaskStore::new(),
            work_tx,
            timer_tx,
            capacity,
            shutdown: shutdown.clone(),
            counters: EngineCounters::default(),
        });

        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        for index in 0..workers {
            tokio::spawn(run_worker(
                index,
                Arc::downgrade(&inner),
                Arc::clone(&work_rx),
                shutdown.clone(),
            ));
        }
        tokio::spawn(run_timer(Arc::downgrade(&inner), timer_rx, shutdown));

        info!(workers, capacity, "Reconciliation engine started");
        Self { inner }
    }

    /// Submits `task` for immediate one-shot execution.
    ///
    /// Fails with [`SouthboundError::CapacityExceeded`] when the worker
    /// queue is full; nothing is recorded in that case and any existing
    /// handle for the same identity is left untouched.
    pub fn enqueue(&self, task: Arc<dyn ReconciliationTask>) -> Result<TaskHandle> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SouthboundError::EngineShutdown);
        }

        let permit = self.inner.work_tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = %task.id(),
                    capacity = self.inner.capacity,
                    "Reconciliation queue full, rejecting task"
                );
                SouthboundError::CapacityExceeded {
                    capacity: self.inner.capacity,
                }
            }
            TrySendError::Closed(()) => SouthboundError::EngineShutdown,
        })?;

        let handle = self.inner.store.new_handle(task.id());
        self.inner.store.insert(handle.clone());
        debug!(task = %task.id(), generation = handle.generation(), "Task enqueued");
        permit.send(WorkItem {
            task,
            handle: handle.clone(),
        });
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Schedules `task` to be re-submitted after `task.retry_delay()`.
    ///
    /// Any handle already recorded for the identity is cancelled first, so
    /// at most one timer per identity can fire.
    pub fn enqueue_for_retry(&self, task: Arc<dyn ReconciliationTask>) -> Result<TaskHandle> {
        let delay = task.retry_delay();
        self.schedule(task, delay)
    }

    fn schedule(&self, task: Arc<dyn ReconciliationTask>, delay: Duration) -> Result<TaskHandle> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SouthboundError::EngineShutdown);
        }

        let handle = self.inner.store.new_handle(task.id());
        self.inner.store.insert(handle.clone());
        debug!(
            task = %task.id(),
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );

        let entry = TimerEntry {
            task,
            handle: handle.clone(),
            delay,
        };
        if self.inner.timer_tx.send(entry).is_err() {
            self.inner.store.remove_if_current(&handle);
            return Err(SouthboundError::EngineShutdown);
        }
        self.inner
            .counters
            .retries_scheduled
            .fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Cancels and forgets the task with identity `id`.
    ///
    /// A queued run that has not started never starts; a running attempt
    /// is interrupted at its next await point. Returns true if a handle
    /// was present.
    pub fn dequeue(&self, id: &TaskId) -> bool {
        let removed = self.inner.store.cancel(id);
        if removed {
            debug!(task = %id, "Task dequeued");
        }
        removed
    }

    /// Returns true if a live handle exists for `id`.
    pub fn is_enqueued(&self, id: &TaskId) -> bool {
        self.inner.store.contains(id)
    }

    /// Identities of every queued, running or scheduled task.
    pub fn pending(&self) -> Vec<TaskId> {
        self.inner.store.ids()
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        let c = &self.inner.counters;
        EngineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            retries_scheduled: c.retries_scheduled.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting work and cancels every outstanding handle without
    /// waiting for running attempts to drain.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let cancelled = self.inner.store.cancel_all();
        info!(cancelled, "Reconciliation engine shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn is_current(&self, handle: &TaskHandle) -> bool {
        self.inner.store.is_current(handle)
    }

    pub(crate) fn release(&self, handle: &TaskHandle) {
        self.inner.store.remove_if_current(handle);
    }

    pub(crate) fn record_completed(&self) {
        self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.inner.counters.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Called on the timer task when a retry is due: re-submits the task
    /// to the worker pool, or pushes the timer back if the task is not
    /// ready or the pool is saturated.
    fn check_readiness_and_process(&self, entry: TimerEntry) {
        let TimerEntry {
            task,
            handle,
            delay,
        } = entry;

        if handle.is_cancelled() || !self.is_current(&handle) {
            handle.mark_done();
            return;
        }

        if !task.is_ready() {
            debug!(task = %task.id(), "Task not ready, rescheduling");
            if let Err(e) = self.schedule(task, delay) {
                debug!(error = %e, "Dropping retry");
            }
            handle.mark_done();
            return;
        }

        match self.enqueue(Arc::clone(&task)) {
            Ok(_) => {}
            Err(SouthboundError::CapacityExceeded { .. }) => {
                if let Err(e) = self.schedule(task, delay) {
                    debug!(error = %e, "Dropping retry");
                }
            }
            Err(e) => debug!(task = %task.id(), error = %e, "Dropping retry"),
        }
        handle.mark_done();
    }

    async fn execute(&self, item: WorkItem) {
        let WorkItem { task, handle } = item;
        let attempt = task.progress().begin_attempt();
        debug!(task = %task.id(), attempt, "Running reconciliation attempt");

        let runner = Arc::clone(&task);
        let mut join = tokio::spawn(async move { runner.reconcile().await });
        let outcome = tokio::select! {
            _ = handle.token().cancelled() => {
                join.abort();
                AttemptOutcome::Cancelled
            }
            joined = &mut join => match joined {
                Ok(Ok(())) => AttemptOutcome::Succeeded,
                Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
                Err(e) if e.is_panic() => {
                    self.inner.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(task = %task.id(), attempt, "Reconciliation attempt panicked");
                    AttemptOutcome::Failed("attempt panicked".to_string())
                }
                Err(_) => AttemptOutcome::Cancelled,
            },
        };

        task::finish_attempt(self, task, &handle, attempt, outcome);
        handle.mark_done();
    }
}

async fn run_worker(
    index: usize,
    engine: Weak<EngineInner>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    shutdown: CancellationToken,
) {
    loop {
        let item = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else { break };

        if item.handle.is_cancelled() {
            item.handle.mark_done();
            continue;
        }
        let Some(inner) = engine.upgrade() else { break };
        ReconciliationEngine { inner }.execute(item).await;
    }
    debug!(worker = index, "Reconciliation worker stopped");
}

async fn run_timer(
    engine: Weak<EngineInner>,
    mut commands: mpsc::UnboundedReceiver<TimerEntry>,
    shutdown: CancellationToken,
) {
    let mut timers: DelayQueue<TimerEntry> = DelayQueue::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(entry) => {
                    let delay = entry.delay;
                    timers.insert(entry, delay);
                }
                None => break,
            },
            Some(expired) = poll_fn(|cx| timers.poll_expired(cx)), if !timers.is_empty() => {
                let entry = expired.into_inner();
                if entry.handle.is_cancelled() {
                    entry.handle.mark_done();
                    continue;
                }
                let Some(inner) = engine.upgrade() else { break };
                ReconciliationEngine { inner }.check_readiness_and_process(entry);
            }
        }
    }
    debug!("Retry timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{RetryPolicy, TaskProgress, TaskState};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingTask {
        id: TaskId,
        progress: TaskProgress,
        runs: AtomicU32,
        succeed_on: u32,
        policy: RetryPolicy,
    }

    impl CountingTask {
        fn new(id: &str, succeed_on: u32, max_attempts: u32) -> Arc<Self> {
            Arc::new(Self {
                id: TaskId::new(id),
                progress: TaskProgress::new(),
                runs: AtomicU32::new(0),
                succeed_on,
                policy: RetryPolicy::new(Duration::from_millis(5), max_attempts),
            })
        }
    }

    #[async_trait]
    impl ReconciliationTask for CountingTask {
        fn id(&self) -> &TaskId {
            &self.id
        }

        fn progress(&self) -> &TaskProgress {
            &self.progress
        }

        fn retry_policy(&self) -> RetryPolicy {
            self.policy
        }

        async fn reconcile(&self) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run >= self.succeed_on {
                Ok(())
            } else {
                Err(SouthboundError::device("test", "not yet"))
            }
        }
    }

    struct BlockingTask {
        id: TaskId,
        progress: TaskProgress,
    }

    #[async_trait]
    impl ReconciliationTask for BlockingTask {
        fn id(&self) -> &TaskId {
            &self.id
        }

        fn progress(&self) -> &TaskProgress {
            &self.progress
        }

        async fn reconcile(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn small_config(workers: usize, capacity: usize) -> EngineConfig {
        EngineConfig {
            worker_threads: workers,
            queue_capacity: capacity,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_enqueue_runs_once_and_clears_store() {
        let engine = ReconciliationEngine::new(&small_config(2, 16));
        let task = CountingTask::new("ok", 1, 3);

        engine.enqueue(task.clone()).unwrap();
        assert!(wait_until(|| task.progress().state() == TaskState::Succeeded).await);
        assert!(wait_until(|| !engine.is_enqueued(task.id())).await);
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_retried_until_success() {
        let engine = ReconciliationEngine::new(&small_config(2, 16));
        let task = CountingTask::new("flaky", 3, 5);

        engine.enqueue(task.clone()).unwrap();
        assert!(wait_until(|| task.progress().state() == TaskState::Succeeded).await);
        assert_eq!(task.progress().attempts(), 3);
        assert_eq!(engine.stats().retries_scheduled, 2);
    }

    #[tokio::test]
    async fn test_always_failing_task_is_abandoned() {
        let engine = ReconciliationEngine::new(&small_config(2, 16));
        let task = CountingTask::new("broken", u32::MAX, 3);

        engine.enqueue(task.clone()).unwrap();
        assert!(wait_until(|| task.progress().state() == TaskState::Abandoned).await);
        // One initial attempt plus max_attempts retries.
        assert_eq!(task.runs.load(Ordering::SeqCst), 4);
        assert!(!engine.is_enqueued(task.id()));
        assert_eq!(engine.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_capacity_error_is_reported() {
        let engine = ReconciliationEngine::new(&small_config(1, 1));
        let blocker = Arc::new(BlockingTask {
            id: TaskId::new("blocker"),
            progress: TaskProgress::new(),
        });
        engine.enqueue(blocker.clone()).unwrap();
        assert!(wait_until(|| blocker.progress().attempts() == 1).await);

        // The only worker is busy; one slot in the queue, then full.
        engine
            .enqueue(CountingTask::new("queued", 1, 1))
            .unwrap();
        let rejected = engine.enqueue(CountingTask::new("rejected", 1, 1));
        assert!(matches!(
            rejected,
            Err(SouthboundError::CapacityExceeded { capacity: 1 })
        ));
        assert!(!engine.is_enqueued(&TaskId::new("rejected")));
        assert_eq!(engine.stats().rejected, 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_dequeue_cancels_running_attempt() {
        let engine = ReconciliationEngine::new(&small_config(1, 4));
        let task = Arc::new(BlockingTask {
            id: TaskId::new("long"),
            progress: TaskProgress::new(),
        });
        let handle = engine.enqueue(task.clone()).unwrap();
        assert!(wait_until(|| task.progress().attempts() == 1).await);

        assert!(engine.dequeue(task.id()));
        assert!(!engine.is_enqueued(task.id()));
        assert!(wait_until(|| handle.is_done()).await);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_retry_replaces_previous_timer() {
        let engine = ReconciliationEngine::new(&small_config(1, 4));
        let task = CountingTask::new("timer", 1, 1);

        let first = engine.enqueue_for_retry(task.clone()).unwrap();
        let second = engine.enqueue_for_retry(task.clone()).unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        assert!(wait_until(|| task.progress().state() == TaskState::Succeeded).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let engine = ReconciliationEngine::new(&small_config(1, 4));
        let task = CountingTask::new("late", 1, 1);
        engine.enqueue_for_retry(task.clone()).unwrap();

        engine.shutdown();
        assert!(engine.is_shutdown());
        assert!(engine.pending().is_empty());
        assert!(matches!(
            engine.enqueue(task),
            Err(SouthboundError::EngineShutdown)
        ));
    }
}
