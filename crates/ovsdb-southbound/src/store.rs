//! Source of intended configuration.
//!
//! The reconcilers only read from it. [`InMemoryConfigStore`] backs tests
//! and embedders that keep configuration in process.

use crate::device::{NodeId, RowData, RowKey, RowType};
use crate::error::{Result, SouthboundError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One configured row.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRow {
    /// Row key
    pub key: RowKey,
    /// Row content
    pub data: RowData,
}

impl ConfigRow {
    /// Table of the row.
    pub fn row_type(&self) -> RowType {
        self.data.row_type()
    }
}

/// Read access to the intended configuration of device nodes.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns true if `node` is present in the configuration.
    async fn contains_node(&self, node: &NodeId) -> Result<bool>;

    /// Reads one configured row.
    async fn read_row(&self, node: &NodeId, row_type: RowType, key: &RowKey) -> Result<Option<RowData>>;

    /// Every configured row of `node`, referenced rows before the rows
    /// that reference them.
    async fn config_rows(&self, node: &NodeId) -> Result<Vec<ConfigRow>>;
}

/// Process-local configuration store.
#[derive(Debug)]
pub struct InMemoryConfigStore {
    nodes: DashMap<NodeId, BTreeMap<(RowType, RowKey), RowData>>,
    available: AtomicBool,
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConfigStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Adds `node` with no rows, keeping existing rows.
    pub fn add_node(&self, node: NodeId) {
        self.nodes.entry(node).or_default();
    }

    /// Removes `node` and its rows.
    pub fn remove_node(&self, node: &NodeId) -> bool {
        self.nodes.remove(node).is_some()
    }

    /// Stores a row, adding the node if needed.
    pub fn put_row(&self, node: NodeId, key: RowKey, data: RowData) {
        self.nodes
            .entry(node)
            .or_default()
            .insert((data.row_type(), key), data);
    }

    /// Removes a row.
    pub fn remove_row(&self, node: &NodeId, row_type: RowType, key: &RowKey) -> bool {
        self.nodes
            .get_mut(node)
            .map(|mut rows| rows.remove(&(row_type, key.clone())).is_some())
            .unwrap_or(false)
    }

    /// Makes every read fail while `available` is false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SouthboundError::device("config-store", "store unavailable"))
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn contains_node(&self, node: &NodeId) -> Result<bool> {
        self.check_available()?;
        Ok(self.nodes.contains_key(node))
    }

    async fn read_row(&self, node: &NodeId, row_type: RowType, key: &RowKey) -> Result<Option<RowData>> {
        self.check_available()?;
        Ok(self
            .nodes
            .get(node)
            .and_then(|rows| rows.get(&(row_type, key.clone())).cloned()))
    }

    async fn config_rows(&self, node: &NodeId) -> Result<Vec<ConfigRow>> {
        self.check_available()?;
        Ok(self
            .nodes
            .get(node)
            .map(|rows| {
                rows.iter()
                    .map(|((_, key), data)| ConfigRow {
                        key: key.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
