//! Replay of the intended configuration onto a device.

use crate::device::DeviceInfo;
use crate::error::Result;
use crate::store::ConfigStore;
use crate::task::{ReconciliationTask, RetryPolicy, TaskProgress};
use crate::task_store::TaskId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Pushes every configured row of a device in one transaction.
///
/// Rows the device already reported are updated, the others inserted. Each
/// replayed row is recorded in the configuration view and marked in
/// transit until the device confirms it.
pub struct ConfigReplayTask {
    id: TaskId,
    device: Arc<DeviceInfo>,
    store: Arc<dyn ConfigStore>,
    policy: RetryPolicy,
    progress: TaskProgress,
}

impl ConfigReplayTask {
    /// Creates a replay task for `device`.
    pub fn new(device: Arc<DeviceInfo>, store: Arc<dyn ConfigStore>, policy: RetryPolicy) -> Self {
        Self {
            id: TaskId::replay(device.node()),
            device,
            store,
            policy,
            progress: TaskProgress::new(),
        }
    }
}

#[async_trait]
impl ReconciliationTask for ConfigReplayTask {
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
        let node = self.device.node();
        let rows = self.store.config_rows(node).await?;
        if rows.is_empty() {
            debug!(device = %node, "Nothing to replay");
            return Ok(());
        }

        let count = rows.len();
        self.device.schedule_transaction(move |device, tx| {
            for row in rows {
                let row_type = row.row_type();
                device.update_config_data(row_type, row.key.clone(), Some(row.data.clone()));
                if device.uuid(row_type, &row.key).is_some() {
                    tx.update(row.key.clone(), row.data);
                } else {
                    tx.insert(row.key.clone(), row.data);
                }
                device.mark_key_as_in_transit(row_type, row.key);
            }
        })?;
        info!(device = %node, rows = count, "Configuration replayed");
        Ok(())
    }
}
