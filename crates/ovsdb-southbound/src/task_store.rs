//! Identity-keyed store of cancellable task handles.
//!
//! The store holds at most one handle per [`TaskId`]. Inserting a handle
//! for an identity that already has one cancels and replaces the old
//! handle, so a superseded timer or queued run never executes.

use crate::device::{NodeId, RowKey, RowType};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identity of "what is being reconciled".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// Creates an identity from an arbitrary string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of a connection attempt to a device node.
    pub fn connection(node: &NodeId) -> Self {
        Self(format!("connection:{}", node))
    }

    /// Identity of a configuration replay to a device node.
    pub fn replay(node: &NodeId) -> Self {
        Self(format!("replay:{}", node))
    }

    /// Identity of the reconciliation of one row.
    pub fn row(row_type: RowType, key: &RowKey) -> Self {
        Self(format!("row:{}:{}", row_type, key))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cancellable handle to one scheduled or queued run of a task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    generation: u64,
    token: CancellationToken,
    done: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new(id: TaskId, generation: u64) -> Self {
        Self {
            id,
            generation,
            token: CancellationToken::new(),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The identity this handle belongs to.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Monotonic submission number, unique within a store.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Requests cancellation. A run that has not started never starts;
    /// a running one is interrupted at its next await point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true once the run finished, whatever its outcome.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Concurrent map from task identity to its live handle.
#[derive(Debug, Default)]
pub struct TaskStore {
    handles: DashMap<TaskId, TaskHandle>,
    next_generation: AtomicU64,
}

impl TaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh handle for `id` without recording it.
    pub fn new_handle(&self, id: &TaskId) -> TaskHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        TaskHandle::new(id.clone(), generation)
    }

    /// Records `handle`, cancelling and returning any handle it replaces.
    pub fn insert(&self, handle: TaskHandle) -> Option<TaskHandle> {
        let previous = self.handles.insert(handle.id().clone(), handle);
        if let Some(old) = &previous {
            old.cancel();
        }
        previous
    }

    /// Returns true if a non-cancelled handle exists for `id`.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.handles
            .get(id)
            .map(|handle| !handle.is_cancelled())
            .unwrap_or(false)
    }

    /// Returns a clone of the handle recorded for `id`.
    pub fn get(&self, id: &TaskId) -> Option<TaskHandle> {
        self.handles.get(id).map(|handle| handle.clone())
    }

    /// Cancels and removes the handle for `id`.
    ///
    /// Returns true if a handle was present.
    pub fn cancel(&self, id: &TaskId) -> bool {
        match self.handles.remove(id) {
            Some((_, handle)) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes `handle` only if it is still the one recorded for its
    /// identity. A newer submission for the same identity is left alone.
    pub fn remove_if_current(&self, handle: &TaskHandle) -> bool {
        self.handles
            .remove_if(handle.id(), |_, current| {
                current.generation() == handle.generation()
            })
            .is_some()
    }

    /// Returns true if `handle` is the one currently recorded.
    pub fn is_current(&self, handle: &TaskHandle) -> bool {
        self.handles
            .get(handle.id())
            .map(|current| current.generation() == handle.generation())
            .unwrap_or(false)
    }

    /// Cancels and removes every handle. Returns how many were removed.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Identities currently recorded.
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of recorded handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handle is recorded.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
