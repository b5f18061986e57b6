//! Retryable reconciliation tasks.
//!
//! A task is one idempotent corrective action against a device (reconnect,
//! replay configuration). The engine runs it; this module owns the attempt
//! bookkeeping and the transition taken after every attempt:
//!
//! ```text
//! INIT -> ATTEMPTING -> SUCCEEDED
//!                    -> RETRY_SCHEDULED -> ATTEMPTING ...
//!                    -> ABANDONED
//! ```

use crate::config::RetryConfig;
use crate::engine::ReconciliationEngine;
use crate::error::Result;
use crate::task_store::{TaskHandle, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of a reconciliation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created, never attempted
    Init,
    /// An attempt is running
    Attempting,
    /// The last attempt succeeded
    Succeeded,
    /// The last attempt failed and a retry timer is pending
    RetryScheduled,
    /// Attempts were exhausted
    Abandoned,
}

impl TaskState {
    /// Returns true if no further attempt will be made.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Abandoned)
    }
}

/// Linear backoff: the delay before retry `n` is `n * base_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_interval: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(base_interval: Duration, max_attempts: u32) -> Self {
        Self {
            base_interval,
            max_attempts,
        }
    }

    /// The backoff step.
    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    /// Attempts allowed before the task is abandoned.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `attempt` failed attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(attempt)
    }

    /// Returns true if a task that just failed attempt number `attempt`
    /// may be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.base_interval(), config.max_attempts)
    }
}

#[derive(Debug)]
struct ProgressInner {
    state: TaskState,
    last_attempt: Option<DateTime<Utc>>,
}

/// Attempt counter and state of one task. Mutated only by the task's own
/// execution.
#[derive(Debug)]
pub struct TaskProgress {
    attempts: AtomicU32,
    inner: Mutex<ProgressInner>,
}

impl TaskProgress {
    /// Creates progress in the `Init` state.
    pub fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            inner: Mutex::new(ProgressInner {
                state: TaskState::Init,
                last_attempt: None,
            }),
        }
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Time the last attempt started.
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_attempt
    }

    pub(crate) fn begin_attempt(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.state = TaskState::Attempting;
        inner.last_attempt = Some(Utc::now());
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.inner.lock().state = state;
    }
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// One idempotent reconciliation action with its retry policy.
///
/// Implementations must tolerate being run again after a partial
/// success; the engine guarantees only that at most one run per
/// [`TaskId`] is tracked at a time.
#[async_trait]
pub trait ReconciliationTask: Send + Sync + 'static {
    /// Identity used for de-duplication in the task store.
    fn id(&self) -> &TaskId;

    /// Attempt bookkeeping owned by the task.
    fn progress(&self) -> &TaskProgress;

    /// Backoff and attempt limit.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Performs one attempt. `Err` means "try again later".
    async fn reconcile(&self) -> Result<()>;

    /// Readiness predicate consulted when a retry timer fires. A task that
    /// is not ready is rescheduled without consuming an attempt.
    fn is_ready(&self) -> bool {
        true
    }

    /// Delay before the next retry given the attempts made so far.
    fn retry_delay(&self) -> Duration {
        self.retry_policy().delay_for(self.progress().attempts())
    }

    /// Attempts allowed before the task is abandoned.
    fn max_attempts(&self) -> u32 {
        self.retry_policy().max_attempts()
    }
}

/// How a single run ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Applies the state transition after an attempt finished.
pub(crate) fn finish_attempt(
    engine: &ReconciliationEngine,
    task: Arc<dyn ReconciliationTask>,
    handle: &TaskHandle,
    attempt: u32,
    outcome: AttemptOutcome,
) {
    let id = task.id().clone();
    match outcome {
        AttemptOutcome::Cancelled => {
            debug!(task = %id, attempt, "Reconciliation attempt cancelled");
        }
        AttemptOutcome::Succeeded => {
            task.progress().set_state(TaskState::Succeeded);
            engine.release(handle);
            engine.record_completed();
            info!(task = %id, attempt, "Reconciliation succeeded");
        }
        AttemptOutcome::Failed(reason) => {
            if !engine.is_current(handle) {
                // Superseded by a newer submission while running.
                debug!(task = %id, attempt, "Dropping result of superseded attempt");
                return;
            }
            if task.retry_policy().allows_retry(attempt) {
                debug!(
                    task = %id,
                    attempt,
                    error = %reason,
                    "Reconciliation failed, scheduling retry"
                );
                task.progress().set_state(TaskState::RetryScheduled);
                if let Err(e) = engine.enqueue_for_retry(task) {
                    warn!(task = %id, error = %e, "Unable to schedule retry");
                }
            } else {
                task.progress().set_state(TaskState::Abandoned);
                engine.release(handle);
                engine.record_abandoned();
                warn!(
                    task = %id,
                    attempts = attempt,
                    error = %reason,
                    "Reconciliation abandoned after exhausting attempts"
                );
            }
        }
    }
}
