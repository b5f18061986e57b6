//! Jobs waiting for rows they reference.

use super::info::DeviceInfo;
use super::row::{RowKey, RowType};
use super::schema::RowData;
use super::transaction::TransactionBuilder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Callback run exactly once when a job's dependencies are all satisfied.
/// Operations added to the builder are submitted to the device afterwards.
pub type ResolutionCallback = Box<dyn FnOnce(&DeviceInfo, &mut TransactionBuilder) + Send>;

/// Which trigger releases a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Waits for configuration rows to appear
    ConfigWaiting,
    /// Waits for in-transit rows to be confirmed by the device
    OperWaiting,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::ConfigWaiting => f.write_str("CONFIG_WAITING"),
            JobKind::OperWaiting => f.write_str("OPER_WAITING"),
        }
    }
}

impl JobKind {
    /// Dependency class whose updates fire this kind's trigger.
    pub fn class(&self) -> DependencyClass {
        match self {
            JobKind::ConfigWaiting => DependencyClass::Config,
            JobKind::OperWaiting => DependencyClass::InTransit,
        }
    }
}

/// Class of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyClass {
    /// The referenced row must exist in the configuration view
    Config,
    /// The referenced row must not be in transit to the device
    InTransit,
}

/// Ordered mapping of row type to the keys a job still waits for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dependencies(BTreeMap<RowType, Vec<RowKey>>);

impl Dependencies {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key`; duplicates are ignored.
    pub fn add(&mut self, row_type: RowType, key: RowKey) {
        let keys = self.0.entry(row_type).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, row_type: RowType, key: impl Into<RowKey>) -> Self {
        self.add(row_type, key.into());
        self
    }

    /// Removes `key`. Returns true if it was present.
    pub fn remove(&mut self, row_type: RowType, key: &RowKey) -> bool {
        let Some(keys) = self.0.get_mut(&row_type) else {
            return false;
        };
        let before = keys.len();
        keys.retain(|k| k != key);
        let removed = keys.len() != before;
        if keys.is_empty() {
            self.0.remove(&row_type);
        }
        removed
    }

    /// Returns true if `key` is still awaited.
    pub fn contains(&self, row_type: RowType, key: &RowKey) -> bool {
        self.0
            .get(&row_type)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    /// Keys awaited for `row_type`.
    pub fn keys(&self, row_type: RowType) -> &[RowKey] {
        self.0.get(&row_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every awaited (type, key) pair in order.
    pub fn iter(&self) -> impl Iterator<Item = (RowType, &RowKey)> + '_ {
        self.0
            .iter()
            .flat_map(|(row_type, keys)| keys.iter().map(move |key| (*row_type, key)))
    }

    /// Number of awaited keys.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Returns true once nothing is awaited.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(RowType, &RowKey) -> bool) {
        for (row_type, keys) in self.0.iter_mut() {
            keys.retain(|key| keep(*row_type, key));
        }
        self.0.retain(|_, keys| !keys.is_empty());
    }
}

/// A pending row write blocked on other rows.
pub struct DependentJob {
    row_type: RowType,
    key: RowKey,
    data: Option<RowData>,
    kind: JobKind,
    config: Dependencies,
    in_transit: Dependencies,
    last_satisfied: Option<DependencyClass>,
    created_at: DateTime<Utc>,
    pub(crate) on_resolved: ResolutionCallback,
}

impl DependentJob {
    /// A job released once every row in `unmet` exists in the
    /// configuration view.
    pub fn config_waiting<F>(
        row_type: RowType,
        key: RowKey,
        data: Option<RowData>,
        unmet: Dependencies,
        on_resolved: F,
    ) -> Self
    where
        F: FnOnce(&DeviceInfo, &mut TransactionBuilder) + Send + 'static,
    {
        Self::new(
            JobKind::ConfigWaiting,
            row_type,
            key,
            data,
            unmet,
            Dependencies::new(),
            Box::new(on_resolved),
        )
    }

    /// A job released once no row in `unmet` is in transit and an
    /// operational update batch completes.
    pub fn oper_waiting<F>(
        row_type: RowType,
        key: RowKey,
        data: Option<RowData>,
        unmet: Dependencies,
        on_resolved: F,
    ) -> Self
    where
        F: FnOnce(&DeviceInfo, &mut TransactionBuilder) + Send + 'static,
    {
        Self::new(
            JobKind::OperWaiting,
            row_type,
            key,
            data,
            Dependencies::new(),
            unmet,
            Box::new(on_resolved),
        )
    }

    fn new(
        kind: JobKind,
        row_type: RowType,
        key: RowKey,
        data: Option<RowData>,
        config: Dependencies,
        in_transit: Dependencies,
        on_resolved: ResolutionCallback,
    ) -> Self {
        Self {
            row_type,
            key,
            data,
            kind,
            config,
            in_transit,
            last_satisfied: None,
            created_at: Utc::now(),
            on_resolved,
        }
    }

    /// Additionally waits for configuration rows.
    pub fn with_config_dependencies(mut self, deps: Dependencies) -> Self {
        for (row_type, key) in deps.iter() {
            self.config.add(row_type, key.clone());
        }
        self
    }

    /// Additionally waits for in-transit rows.
    pub fn with_in_transit_dependencies(mut self, deps: Dependencies) -> Self {
        for (row_type, key) in deps.iter() {
            self.in_transit.add(row_type, key.clone());
        }
        self
    }

    /// Table of the blocked row.
    pub fn row_type(&self) -> RowType {
        self.row_type
    }

    /// Key of the blocked row.
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// Content of the blocked row, if carried.
    pub fn data(&self) -> Option<&RowData> {
        self.data.as_ref()
    }

    /// Trigger that releases the job.
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Unmet dependencies of `class`.
    pub fn dependencies(&self, class: DependencyClass) -> &Dependencies {
        match class {
            DependencyClass::Config => &self.config,
            DependencyClass::InTransit => &self.in_transit,
        }
    }

    /// Returns true once every dependency of both classes is satisfied.
    pub fn is_ready(&self) -> bool {
        self.config.is_empty() && self.in_transit.is_empty()
    }

    /// Returns true if the job waits for its own row.
    pub(crate) fn depends_on_itself(&self) -> bool {
        self.config.contains(self.row_type, &self.key)
            || self.in_transit.contains(self.row_type, &self.key)
    }

    pub(crate) fn satisfy(&mut self, class: DependencyClass, row_type: RowType, key: &RowKey) -> bool {
        let removed = self.dependencies_mut(class).remove(row_type, key);
        if removed {
            self.last_satisfied = Some(class);
        }
        removed
    }

    /// Returns true if the trigger for `kind` may run this job: it is
    /// ready, and either waits for that trigger or its last dependency
    /// was cleared by an update of that trigger's class.
    pub(crate) fn is_released_by(&self, kind: JobKind) -> bool {
        self.is_ready() && (self.kind == kind || self.last_satisfied == Some(kind.class()))
    }

    pub(crate) fn dependencies_mut(&mut self, class: DependencyClass) -> &mut Dependencies {
        match class {
            DependencyClass::Config => &mut self.config,
            DependencyClass::InTransit => &mut self.in_transit,
        }
    }

    pub(crate) fn summary(&self, id: u64) -> PendingJob {
        PendingJob {
            id,
            kind: self.kind,
            row_type: self.row_type,
            key: self.key.clone(),
            config_dependencies: self.config.clone(),
            in_transit_dependencies: self.in_transit.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for DependentJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentJob")
            .field("kind", &self.kind)
            .field("row_type", &self.row_type)
            .field("key", &self.key)
            .field("config", &self.config)
            .field("in_transit", &self.in_transit)
            .finish_non_exhaustive()
    }
}

/// Diagnostic view of a queued job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingJob {
    /// Queue position identifier, increasing in submission order
    pub id: u64,
    /// Trigger that releases the job
    pub kind: JobKind,
    /// Table of the blocked row
    pub row_type: RowType,
    /// Key of the blocked row
    pub key: RowKey,
    /// Configuration rows still missing
    pub config_dependencies: Dependencies,
    /// Rows still in transit
    pub in_transit_dependencies: Dependencies,
    /// Time the job was created
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &DeviceInfo, _: &mut TransactionBuilder) {}

    #[test]
    fn test_dependencies_add_dedup_and_remove() {
        let mut deps = Dependencies::new()
            .with(RowType::TerminationPoint, "192.168.122.20")
            .with(RowType::TerminationPoint, "192.168.122.30")
            .with(RowType::TerminationPoint, "192.168.122.20")
            .with(RowType::LogicalSwitch, "ls0");
        assert_eq!(deps.len(), 3);

        let order: Vec<(RowType, String)> = deps
            .iter()
            .map(|(t, k)| (t, k.to_string()))
            .collect();
        assert_eq!(order[0], (RowType::LogicalSwitch, "ls0".to_string()));

        assert!(deps.remove(RowType::LogicalSwitch, &RowKey::new("ls0")));
        assert!(!deps.remove(RowType::LogicalSwitch, &RowKey::new("ls0")));
        assert!(deps.keys(RowType::LogicalSwitch).is_empty());
        assert_eq!(deps.keys(RowType::TerminationPoint).len(), 2);
    }

    #[test]
    fn test_job_ready_after_both_classes_satisfied() {
        let mut job = DependentJob::config_waiting(
            RowType::RemoteMcastMac,
            RowKey::new("mac0"),
            None,
            Dependencies::new().with(RowType::LogicalSwitch, "ls0"),
            noop,
        )
        .with_in_transit_dependencies(Dependencies::new().with(RowType::TerminationPoint, "tp0"));

        assert!(!job.is_ready());
        assert!(job.satisfy(DependencyClass::Config, RowType::LogicalSwitch, &RowKey::new("ls0")));
        assert!(!job.is_ready());
        assert!(!job.satisfy(DependencyClass::Config, RowType::TerminationPoint, &RowKey::new("tp0")));
        assert!(job.satisfy(DependencyClass::InTransit, RowType::TerminationPoint, &RowKey::new("tp0")));
        assert!(job.is_ready());
    }

    #[test]
    fn test_released_by_trigger_of_last_cleared_class() {
        let mut job = DependentJob::config_waiting(
            RowType::RemoteMcastMac,
            RowKey::new("mac0"),
            None,
            Dependencies::new().with(RowType::LogicalSwitch, "ls0"),
            noop,
        )
        .with_in_transit_dependencies(Dependencies::new().with(RowType::TerminationPoint, "tp0"));

        job.satisfy(DependencyClass::Config, RowType::LogicalSwitch, &RowKey::new("ls0"));
        assert!(!job.is_released_by(JobKind::ConfigWaiting));
        job.satisfy(DependencyClass::InTransit, RowType::TerminationPoint, &RowKey::new("tp0"));
        assert!(job.is_released_by(JobKind::ConfigWaiting));
        assert!(job.is_released_by(JobKind::OperWaiting));
    }

    #[test]
    fn test_ready_job_of_other_kind_waits_for_its_trigger() {
        let mut job = DependentJob::oper_waiting(
            RowType::RemoteUcastMac,
            RowKey::new("mac1"),
            None,
            Dependencies::new().with(RowType::TerminationPoint, "tp0"),
            noop,
        );
        job.satisfy(DependencyClass::InTransit, RowType::TerminationPoint, &RowKey::new("tp0"));
        assert!(job.is_released_by(JobKind::OperWaiting));
        assert!(!job.is_released_by(JobKind::ConfigWaiting));
    }

    #[test]
    fn test_self_dependency_detected() {
        let job = DependentJob::oper_waiting(
            RowType::LogicalSwitch,
            RowKey::new("ls0"),
            None,
            Dependencies::new().with(RowType::LogicalSwitch, "ls0"),
            noop,
        );
        assert!(job.depends_on_itself());
    }
}
