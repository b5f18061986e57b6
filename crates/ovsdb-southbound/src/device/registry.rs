//! Connected devices by node identity.

use super::info::DeviceInfo;
use super::row::NodeId;
use super::transaction::TransactionSubmitter;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Map of node identity to device state.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<NodeId, Arc<DeviceInfo>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of `node`, creating it with `submitter` if the
    /// node is not registered yet.
    pub fn connect(&self, node: NodeId, submitter: Arc<dyn TransactionSubmitter>) -> Arc<DeviceInfo> {
        let entry = self.devices.entry(node.clone()).or_insert_with(|| {
            info!(device = %node, "Device registered");
            Arc::new(DeviceInfo::new(node, submitter))
        });
        Arc::clone(entry.value())
    }

    /// The state of `node`, if registered.
    pub fn get(&self, node: &NodeId) -> Option<Arc<DeviceInfo>> {
        self.devices.get(node).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `node`. Jobs still queued on it are dropped with it.
    pub fn disconnect(&self, node: &NodeId) -> Option<Arc<DeviceInfo>> {
        let (_, device) = self.devices.remove(node)?;
        let pending = device.pending_job_count();
        if pending > 0 {
            warn!(device = %node, pending, "Device removed with unresolved jobs");
        } else {
            info!(device = %node, "Device removed");
        }
        Some(device)
    }

    /// Registered nodes, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.devices.iter().map(|e| e.key().clone()).collect();
        nodes.sort();
        nodes
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
