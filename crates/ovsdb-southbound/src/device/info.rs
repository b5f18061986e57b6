//! Per-device state: the row cache, the dependency queue and the
//! transaction submitter.
//!
//! Two locks are involved. The state mutex guards the cache and queue and
//! is held only for short, non-reentrant sections. The resolution lock is
//! re-entrant and is held while ready jobs run, so a callback may update
//! the cache of its own device on the same thread. The state mutex is
//! never held while a callback runs.
//!
//! A trigger fired from inside a callback does not run jobs itself; it
//! widens the pass already running on that thread, which keeps jobs in
//! submission order.

use super::cache::DeviceObjectCache;
use super::job::{DependencyClass, DependentJob, JobKind, PendingJob};
use super::queue::DependencyQueue;
use super::row::{DeviceData, NodeId, RowKey, RowType, RowUuid};
use super::schema::RowData;
use super::transaction::{TransactionBuilder, TransactionSubmitter};
use crate::error::{Result, SouthboundError};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What [`DeviceInfo::add_job_to_queue`] did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// No dependency was outstanding; the callback already ran
    Executed,
    /// Queued under the given id
    Queued(u64),
}

/// Triggers requested during the running resolution pass.
#[derive(Debug, Default)]
struct ResolutionPass {
    running: bool,
    requested: Vec<JobKind>,
}

struct PassReset<'a>(&'a RefCell<ResolutionPass>);

impl Drop for PassReset<'_> {
    fn drop(&mut self) {
        let mut pass = self.0.borrow_mut();
        pass.running = false;
        pass.requested.clear();
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    cache: DeviceObjectCache,
    queue: DependencyQueue,
}

/// Cache, dependency queue and transaction entry point of one device.
pub struct DeviceInfo {
    node: NodeId,
    state: Mutex<DeviceState>,
    resolution: ReentrantMutex<RefCell<ResolutionPass>>,
    submitter: Arc<dyn TransactionSubmitter>,
}

impl DeviceInfo {
    /// Creates empty state for `node`.
    pub fn new(node: NodeId, submitter: Arc<dyn TransactionSubmitter>) -> Self {
        Self {
            node,
            state: Mutex::new(DeviceState::default()),
            resolution: ReentrantMutex::new(RefCell::new(ResolutionPass::default())),
            submitter,
        }
    }

    /// The device this state belongs to.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Queues `job` until its dependencies are met, or runs it right away
    /// when none is outstanding.
    ///
    /// Dependencies already satisfied at submission time are dropped. A
    /// job with an empty key or one that waits for its own row is refused
    /// with [`SouthboundError::InvariantViolation`].
    pub fn add_job_to_queue(&self, mut job: DependentJob) -> Result<JobDisposition> {
        if job.key().as_str().is_empty() {
            return Err(SouthboundError::invariant(format!(
                "{} job with an empty key",
                job.row_type()
            )));
        }
        if job.depends_on_itself() {
            return Err(SouthboundError::invariant(format!(
                "{} {} depends on itself",
                job.row_type(),
                job.key()
            )));
        }

        let mut state = self.state.lock();
        {
            let cache = &state.cache;
            job.dependencies_mut(DependencyClass::Config)
                .retain(|row_type, key| !cache.has_config(row_type, key));
            job.dependencies_mut(DependencyClass::InTransit)
                .retain(|row_type, key| cache.is_in_transit(row_type, key));
        }

        if !job.is_ready() {
            let (row_type, key, kind) = (job.row_type(), job.key().clone(), job.kind());
            let id = state.queue.push(job);
            debug!(
                device = %self.node,
                row_type = %row_type,
                key = %key,
                kind = %kind,
                job = id,
                "Job queued on unmet dependencies"
            );
            return Ok(JobDisposition::Queued(id));
        }
        drop(state);

        let _resolving = self.resolution.lock();
        self.execute(job);
        Ok(JobDisposition::Executed)
    }

    /// Marks `key` as submitted to the device and not yet confirmed.
    pub fn mark_key_as_in_transit(&self, row_type: RowType, key: RowKey) {
        debug!(device = %self.node, row_type = %row_type, key = %key, "Row in transit");
        self.state.lock().cache.mark_in_transit(row_type, key);
    }

    /// Records a configuration row and runs every configuration-waiting
    /// job that became ready.
    pub fn update_config_data(&self, row_type: RowType, key: RowKey, data: Option<RowData>) {
        {
            let mut state = self.state.lock();
            state.queue.satisfy(DependencyClass::Config, row_type, &key);
            state.cache.update_config(row_type, key, data);
        }
        self.on_config_data_available();
    }

    /// Runs, oldest first, every ready configuration-waiting job and every
    /// ready job whose last dependency was a configuration row.
    pub fn on_config_data_available(&self) {
        self.run_ready(JobKind::ConfigWaiting);
    }

    /// Records a row reported by the device. Clears its in-transit marker
    /// but runs nothing; call [`on_oper_data_available`] once the update
    /// batch is applied.
    ///
    /// [`on_oper_data_available`]: Self::on_oper_data_available
    pub fn update_device_oper_data(
        &self,
        row_type: RowType,
        key: RowKey,
        uuid: Option<RowUuid>,
        data: Option<RowData>,
    ) {
        let mut state = self.state.lock();
        state.queue.satisfy(DependencyClass::InTransit, row_type, &key);
        state.cache.update_oper(row_type, key, uuid, data);
    }

    /// Runs, oldest first, every ready operational-waiting job and every
    /// ready job whose last dependency was an in-transit row.
    pub fn on_oper_data_available(&self) {
        self.run_ready(JobKind::OperWaiting);
    }

    /// Forgets a configuration row. Returns true if it was cached.
    pub fn clear_config_data(&self, row_type: RowType, key: &RowKey) -> bool {
        self.state.lock().cache.clear_config(row_type, key)
    }

    /// Forgets a row reported by the device. A row that is gone is no
    /// longer in transit, so jobs waiting on it are updated.
    pub fn clear_device_oper_data(&self, row_type: RowType, key: &RowKey) -> bool {
        let mut state = self.state.lock();
        state.queue.satisfy(DependencyClass::InTransit, row_type, key);
        state.cache.clear_oper(row_type, key)
    }

    /// Drops every in-transit marker, e.g. after a failed transaction.
    /// Returns how many markers were cleared.
    pub fn clear_in_transit_data(&self) -> usize {
        let mut state = self.state.lock();
        let cleared = state.cache.clear_in_transit();
        for (class, row_type, key) in state.queue.edges() {
            if class == DependencyClass::InTransit {
                state.queue.satisfy(class, row_type, &key);
            }
        }
        if !cleared.is_empty() {
            info!(device = %self.node, cleared = cleared.len(), "In-transit markers cleared");
        }
        cleared.len()
    }

    /// Returns true if the configuration view holds the row.
    pub fn is_config_data_available(&self, row_type: RowType, key: &RowKey) -> bool {
        self.state.lock().cache.has_config(row_type, key)
    }

    /// The configuration row, if cached.
    pub fn config_data(&self, row_type: RowType, key: &RowKey) -> Option<DeviceData> {
        self.state.lock().cache.config(row_type, key).cloned()
    }

    /// Returns true if the row was submitted and not yet confirmed.
    pub fn is_key_in_transit(&self, row_type: RowType, key: &RowKey) -> bool {
        self.state.lock().cache.is_in_transit(row_type, key)
    }

    /// The operational row, if cached.
    pub fn device_oper_data(&self, row_type: RowType, key: &RowKey) -> Option<DeviceData> {
        self.state.lock().cache.oper(row_type, key).cloned()
    }

    /// Identifier the device assigned to the row.
    pub fn uuid(&self, row_type: RowType, key: &RowKey) -> Option<RowUuid> {
        self.state
            .lock()
            .cache
            .oper(row_type, key)
            .and_then(|entry| entry.uuid().cloned())
    }

    /// Key of the operational row the device identifies by `uuid`.
    pub fn key_for_uuid(&self, row_type: RowType, uuid: &RowUuid) -> Option<RowKey> {
        self.state.lock().cache.key_for_uuid(row_type, uuid).cloned()
    }

    /// Builds a transaction with `build` and submits it. An empty
    /// transaction is not sent. When the submission fails, every
    /// in-transit marker of the device is cleared.
    pub fn schedule_transaction<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&DeviceInfo, &mut TransactionBuilder),
    {
        let _resolving = self.resolution.lock();
        let mut tx = TransactionBuilder::new(self.node.clone());
        build(self, &mut tx);
        let submitted = self.submit(tx);
        if let Err(e) = &submitted {
            warn!(device = %self.node, error = %e, "Scheduled transaction failed");
            self.clear_in_transit_data();
        }
        submitted
    }

    /// Drops the queued job `id` without running it. Returns true if it
    /// was still queued.
    pub fn cancel_job(&self, id: u64) -> bool {
        let cancelled = self.state.lock().queue.cancel(id);
        if cancelled {
            debug!(device = %self.node, job = id, "Queued job cancelled");
        }
        cancelled
    }

    /// Snapshot of the queued jobs, oldest first.
    pub fn pending_jobs(&self) -> Vec<PendingJob> {
        self.state.lock().queue.pending()
    }

    /// Number of queued jobs.
    pub fn pending_job_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of rows in the configuration and operational views.
    pub fn cached_rows(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.cache.config_len(), state.cache.oper_len())
    }

    fn run_ready(&self, kind: JobKind) {
        let resolving = self.resolution.lock();
        {
            let mut pass = resolving.borrow_mut();
            if !pass.requested.contains(&kind) {
                pass.requested.push(kind);
            }
            if pass.running {
                return;
            }
            pass.running = true;
        }
        let _reset = PassReset(&*resolving);

        loop {
            let kinds = resolving.borrow().requested.clone();
            let next = self.state.lock().queue.take_next_ready(&kinds);
            let Some(job) = next else { break };
            self.execute(job);
        }
    }

    // Caller holds the resolution lock and not the state lock.
    fn execute(&self, job: DependentJob) {
        let (row_type, key, kind) = (job.row_type(), job.key().clone(), job.kind());
        debug!(
            device = %self.node,
            row_type = %row_type,
            key = %key,
            kind = %kind,
            "Dependencies resolved, running job"
        );

        let mut tx = TransactionBuilder::new(self.node.clone());
        (job.on_resolved)(self, &mut tx);
        if let Err(e) = self.submit(tx) {
            warn!(
                device = %self.node,
                row_type = %row_type,
                key = %key,
                error = %e,
                "Transaction for resolved job failed"
            );
            self.clear_in_transit_data();
        }
    }

    fn submit(&self, tx: TransactionBuilder) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }
        debug!(device = %self.node, operations = tx.len(), "Submitting transaction");
        self.submitter.submit(tx)
    }
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("node", &self.node)
            .field("pending_jobs", &self.pending_job_count())
            .finish_non_exhaustive()
    }
}
