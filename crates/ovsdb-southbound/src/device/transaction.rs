//! Device transactions.
//!
//! A transaction is built in memory, one row operation at a time, then
//! handed to the [`TransactionSubmitter`] that owns the wire session.

use super::row::{NodeId, RowKey, RowType};
use super::schema::RowData;
use crate::error::Result;
use serde::Serialize;

/// One row mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RowOperation {
    /// Create a row
    Insert {
        row_type: RowType,
        key: RowKey,
        data: RowData,
    },
    /// Replace the content of an existing row
    Update {
        row_type: RowType,
        key: RowKey,
        data: RowData,
    },
    /// Remove a row
    Delete { row_type: RowType, key: RowKey },
}

impl RowOperation {
    /// Table the operation touches.
    pub fn row_type(&self) -> RowType {
        match self {
            RowOperation::Insert { row_type, .. }
            | RowOperation::Update { row_type, .. }
            | RowOperation::Delete { row_type, .. } => *row_type,
        }
    }

    /// Key the operation touches.
    pub fn key(&self) -> &RowKey {
        match self {
            RowOperation::Insert { key, .. }
            | RowOperation::Update { key, .. }
            | RowOperation::Delete { key, .. } => key,
        }
    }
}

/// Ordered batch of row operations against one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionBuilder {
    node: NodeId,
    operations: Vec<RowOperation>,
}

impl TransactionBuilder {
    /// Starts an empty transaction for `node`.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            operations: Vec::new(),
        }
    }

    /// Target device.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Appends an insert of `data` under `key`.
    pub fn insert(&mut self, key: RowKey, data: RowData) -> &mut Self {
        self.operations.push(RowOperation::Insert {
            row_type: data.row_type(),
            key,
            data,
        });
        self
    }

    /// Appends an update of `key` to `data`.
    pub fn update(&mut self, key: RowKey, data: RowData) -> &mut Self {
        self.operations.push(RowOperation::Update {
            row_type: data.row_type(),
            key,
            data,
        });
        self
    }

    /// Appends a delete of `key`.
    pub fn delete(&mut self, row_type: RowType, key: RowKey) -> &mut Self {
        self.operations
            .push(RowOperation::Delete { row_type, key });
        self
    }

    /// Returns true if any operation in this transaction touches the row.
    pub fn touches(&self, row_type: RowType, key: &RowKey) -> bool {
        self.operations
            .iter()
            .any(|op| op.row_type() == row_type && op.key() == key)
    }

    /// Operations in submission order.
    pub fn operations(&self) -> &[RowOperation] {
        &self.operations
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Commits built transactions to a device.
pub trait TransactionSubmitter: Send + Sync {
    /// Sends `transaction` to its device.
    fn submit(&self, transaction: TransactionBuilder) -> Result<()>;
}
