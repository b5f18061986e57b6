//! Device state: typed rows, the per-device cache and the queue of jobs
//! waiting for referenced rows.

mod cache;
mod dependency;
mod info;
mod job;
mod queue;
mod registry;
mod row;
mod schema;
mod transaction;

pub use dependency::UnmetDependencyGetter;
pub use info::{DeviceInfo, JobDisposition};
pub use job::{DependencyClass, Dependencies, DependentJob, JobKind, PendingJob, ResolutionCallback};
pub use registry::DeviceRegistry;
pub use row::{DataStatus, DeviceData, NodeId, RowKey, RowType, RowUuid};
pub use schema::{
    Dependent, LogicalSwitch, PhysicalLocator, PhysicalPort, RemoteMcastMac, RemoteUcastMac, RowData,
};
pub use transaction::{RowOperation, TransactionBuilder, TransactionSubmitter};
