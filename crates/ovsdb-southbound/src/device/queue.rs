//! FIFO queue of dependent jobs with a reverse dependency index.
//!
//! Satisfying one (class, type, key) edge touches only the jobs waiting on
//! it. Jobs are released in submission order.

use super::job::{DependencyClass, DependentJob, JobKind, PendingJob};
use super::row::{RowKey, RowType};
use std::collections::{BTreeMap, BTreeSet, HashMap};

type Edge = (DependencyClass, RowType, RowKey);

#[derive(Debug, Default)]
pub(crate) struct DependencyQueue {
    jobs: BTreeMap<u64, DependentJob>,
    waiters: HashMap<Edge, BTreeSet<u64>>,
    next_id: u64,
}

impl DependencyQueue {
    /// Appends `job`, returning its queue id.
    pub(crate) fn push(&mut self, job: DependentJob) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        for class in [DependencyClass::Config, DependencyClass::InTransit] {
            for (row_type, key) in job.dependencies(class).iter() {
                self.waiters
                    .entry((class, row_type, key.clone()))
                    .or_default()
                    .insert(id);
            }
        }
        self.jobs.insert(id, job);
        id
    }

    /// Marks one edge satisfied on every job waiting for it. Returns how
    /// many jobs were updated.
    pub(crate) fn satisfy(&mut self, class: DependencyClass, row_type: RowType, key: &RowKey) -> usize {
        let Some(ids) = self.waiters.remove(&(class, row_type, key.clone())) else {
            return 0;
        };
        let mut updated = 0;
        for id in ids {
            if let Some(job) = self.jobs.get_mut(&id) {
                if job.satisfy(class, row_type, key) {
                    updated += 1;
                }
            }
        }
        updated
    }

    /// Removes and returns the oldest job released by any trigger in
    /// `kinds`.
    pub(crate) fn take_next_ready(&mut self, kinds: &[JobKind]) -> Option<DependentJob> {
        let id = self
            .jobs
            .iter()
            .find(|(_, job)| kinds.iter().any(|kind| job.is_released_by(*kind)))
            .map(|(id, _)| *id)?;
        self.jobs.remove(&id)
    }

    /// Drops a queued job and its reverse index entries. Returns true if
    /// it was queued.
    pub(crate) fn cancel(&mut self, id: u64) -> bool {
        let Some(job) = self.jobs.remove(&id) else {
            return false;
        };
        for class in [DependencyClass::Config, DependencyClass::InTransit] {
            for (row_type, key) in job.dependencies(class).iter() {
                let edge = (class, row_type, key.clone());
                if let Some(ids) = self.waiters.get_mut(&edge) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.waiters.remove(&edge);
                    }
                }
            }
        }
        true
    }

    /// Every (class, type, key) edge some queued job waits for.
    pub(crate) fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.waiters.keys().cloned().collect();
        edges.sort();
        edges
    }

    pub(crate) fn pending(&self) -> Vec<PendingJob> {
        self.jobs.iter().map(|(id, job)| job.summary(*id)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::job::Dependencies;
    use crate::device::{DeviceInfo, TransactionBuilder};

    fn noop(_: &DeviceInfo, _: &mut TransactionBuilder) {}

    fn config_job(key: &str, deps: Dependencies) -> DependentJob {
        DependentJob::config_waiting(RowType::RemoteMcastMac, RowKey::new(key), None, deps, noop)
    }

    fn oper_job(key: &str, deps: Dependencies) -> DependentJob {
        DependentJob::oper_waiting(RowType::RemoteUcastMac, RowKey::new(key), None, deps, noop)
    }

    #[test]
    fn test_satisfy_releases_only_complete_jobs() {
        let mut queue = DependencyQueue::default();
        queue.push(config_job(
            "a",
            Dependencies::new()
                .with(RowType::LogicalSwitch, "ls0")
                .with(RowType::TerminationPoint, "tp0"),
        ));
        queue.push(config_job("b", Dependencies::new().with(RowType::LogicalSwitch, "ls0")));

        assert_eq!(queue.satisfy(DependencyClass::Config, RowType::LogicalSwitch, &RowKey::new("ls0")), 2);
        let ready = queue.take_next_ready(&[JobKind::ConfigWaiting]);
        assert_eq!(ready.map(|job| job.key().to_string()), Some("b".to_string()));
        assert!(queue.take_next_ready(&[JobKind::ConfigWaiting]).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_satisfy_unknown_edge() {
        let mut queue = DependencyQueue::default();
        queue.push(config_job("a", Dependencies::new().with(RowType::LogicalSwitch, "ls0")));
        assert_eq!(queue.satisfy(DependencyClass::InTransit, RowType::LogicalSwitch, &RowKey::new("ls0")), 0);
        assert!(queue.take_next_ready(&[JobKind::ConfigWaiting]).is_none());
    }

    #[test]
    fn test_take_next_ready_is_fifo() {
        let mut queue = DependencyQueue::default();
        let tp = Dependencies::new().with(RowType::TerminationPoint, "tp0");
        queue.push(oper_job("first", tp.clone()));
        queue.push(config_job("config", tp.clone()));
        queue.push(oper_job("second", tp.clone()));

        queue.satisfy(DependencyClass::InTransit, RowType::TerminationPoint, &RowKey::new("tp0"));
        let ready: Vec<String> = std::iter::from_fn(|| queue.take_next_ready(&[JobKind::OperWaiting]))
            .map(|job| job.key().to_string())
            .collect();
        assert_eq!(ready, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(queue.pending().len(), 1);
    }

    #[test]
    fn test_take_next_ready_skips_jobs_of_other_trigger() {
        let mut queue = DependencyQueue::default();
        queue.push(oper_job("oper", Dependencies::new().with(RowType::TerminationPoint, "tp0")));
        queue.push(config_job("config", Dependencies::new().with(RowType::LogicalSwitch, "ls0")));
        queue.satisfy(DependencyClass::InTransit, RowType::TerminationPoint, &RowKey::new("tp0"));
        queue.satisfy(DependencyClass::Config, RowType::LogicalSwitch, &RowKey::new("ls0"));

        let next = queue.take_next_ready(&[JobKind::ConfigWaiting]);
        assert_eq!(next.map(|job| job.key().to_string()), Some("config".to_string()));
        assert!(queue.take_next_ready(&[JobKind::ConfigWaiting]).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_drops_job_and_index() {
        let mut queue = DependencyQueue::default();
        let deps = Dependencies::new().with(RowType::LogicalSwitch, "ls0");
        let cancelled = queue.push(config_job("a", deps.clone()));
        queue.push(config_job("b", deps));

        assert!(queue.cancel(cancelled));
        assert!(!queue.cancel(cancelled));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.satisfy(DependencyClass::Config, RowType::LogicalSwitch, &RowKey::new("ls0")), 1);

        let only = queue.push(config_job("c", Dependencies::new().with(RowType::TerminationPoint, "tp0")));
        assert!(queue.cancel(only));
        assert!(queue.edges().is_empty());
    }

    #[test]
    fn test_edges_lists_outstanding_waits() {
        let mut queue = DependencyQueue::default();
        queue.push(oper_job("a", Dependencies::new().with(RowType::TerminationPoint, "tp0")));
        assert_eq!(
            queue.edges(),
            vec![(DependencyClass::InTransit, RowType::TerminationPoint, RowKey::new("tp0"))]
        );
    }
}
