//! Reconnection of controller-initiated device connections.

use crate::device::NodeId;
use crate::engine::ReconciliationEngine;
use crate::error::Result;
use crate::store::ConfigStore;
use crate::task::{ReconciliationTask, RetryPolicy, TaskProgress};
use crate::task_store::TaskId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Opens controller-initiated connections to devices.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connects to `node`. Returns once the session is established.
    async fn connect(&self, node: &NodeId) -> Result<()>;
}

/// Retries the connection to one device until it succeeds or attempts
/// run out.
pub struct ConnectionReconciliationTask {
    id: TaskId,
    node: NodeId,
    connector: Arc<dyn DeviceConnector>,
    policy: RetryPolicy,
    progress: TaskProgress,
}

impl ConnectionReconciliationTask {
    /// Creates a task for `node`.
    pub fn new(node: NodeId, connector: Arc<dyn DeviceConnector>, policy: RetryPolicy) -> Self {
        Self {
            id: TaskId::connection(&node),
            node,
            connector,
            policy,
            progress: TaskProgress::new(),
        }
    }

    /// The device being reconnected.
    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

#[async_trait]
impl ReconciliationTask for ConnectionReconciliationTask {
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
        debug!(device = %self.node, attempt = self.progress.attempts(), "Connecting to device");
        self.connector.connect(&self.node).await?;
        info!(device = %self.node, "Device connection re-established");
        Ok(())
    }
}

/// Entry points that start and stop connection reconciliation.
pub struct ConnectionReconciler {
    engine: ReconciliationEngine,
    connector: Arc<dyn DeviceConnector>,
    store: Arc<dyn ConfigStore>,
    policy: RetryPolicy,
}

impl ConnectionReconciler {
    /// Creates a reconciler submitting to `engine`.
    pub fn new(
        engine: ReconciliationEngine,
        connector: Arc<dyn DeviceConnector>,
        store: Arc<dyn ConfigStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            connector,
            store,
            policy,
        }
    }

    /// A controller-initiated connection to `node` failed: schedule
    /// reconnection through the retry timer.
    ///
    /// Returns false if reconnection is already in progress.
    pub fn reconcile_connection(&self, node: &NodeId) -> Result<bool> {
        let id = TaskId::connection(node);
        if self.engine.is_enqueued(&id) {
            debug!(device = %node, "Connection reconciliation already in progress");
            return Ok(false);
        }
        self.engine.enqueue_for_retry(self.task(node))?;
        info!(device = %node, "Connection reconciliation scheduled");
        Ok(true)
    }

    /// `node` disconnected. Devices present in the configuration are
    /// reconnected at once; others initiated the connection themselves
    /// and are left alone.
    ///
    /// Returns true if reconnection was started.
    pub async fn on_disconnect(&self, node: &NodeId) -> Result<bool> {
        let id = TaskId::connection(node);
        if self.engine.is_enqueued(&id) {
            debug!(device = %node, "Connection reconciliation already in progress");
            return Ok(false);
        }
        if !self.store.contains_node(node).await? {
            debug!(device = %node, "Device not configured, not reconnecting");
            return Ok(false);
        }
        self.engine.enqueue(self.task(node))?;
        info!(device = %node, "Configured device disconnected, reconnecting");
        Ok(true)
    }

    /// Cancels reconnection of `node`, e.g. because the device connected
    /// by itself. Returns true if a reconnection was in progress.
    pub fn stop_connection_reconciliation_if_active(&self, node: &NodeId) -> bool {
        let stopped = self.engine.dequeue(&TaskId::connection(node));
        if stopped {
            info!(device = %node, "Connection reconciliation stopped");
        }
        stopped
    }

    fn task(&self, node: &NodeId) -> Arc<dyn ReconciliationTask> {
        Arc::new(ConnectionReconciliationTask::new(
            node.clone(),
            Arc::clone(&self.connector),
            self.policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::SouthboundError;
    use crate::store::InMemoryConfigStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyConnector {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl DeviceConnector for FlakyConnector {
        async fn connect(&self, node: &NodeId) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(SouthboundError::device(node.to_string(), "connection refused"))
            }
        }
    }

    fn reconciler(succeed_on: u32, store: Arc<InMemoryConfigStore>) -> (ConnectionReconciler, Arc<FlakyConnector>) {
        let engine = ReconciliationEngine::new(&EngineConfig {
            worker_threads: 2,
            queue_capacity: 16,
        });
        let connector = Arc::new(FlakyConnector {
            calls: AtomicU32::new(0),
            succeed_on,
        });
        let reconciler = ConnectionReconciler::new(
            engine,
            connector.clone(),
            store,
            RetryPolicy::new(Duration::from_millis(5), 5),
        );
        (reconciler, connector)
    }

    async fn wait_for_calls(connector: &FlakyConnector, calls: u32) -> bool {
        for _ in 0..200 {
            if connector.calls.load(Ordering::SeqCst) >= calls {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_reconcile_connection_retries_until_connected() {
        let (reconciler, connector) = reconciler(3, Arc::new(InMemoryConfigStore::new()));
        let node = NodeId::new("hwvtep://10.0.0.1:6640");

        assert!(reconciler.reconcile_connection(&node).unwrap());
        assert!(wait_for_calls(&connector, 3).await);
        for _ in 0..200 {
            if !reconciler.engine.is_enqueued(&TaskId::connection(&node)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!reconciler.engine.is_enqueued(&TaskId::connection(&node)));
    }

    #[tokio::test]
    async fn test_duplicate_trigger_is_ignored() {
        let (reconciler, _) = reconciler(u32::MAX, Arc::new(InMemoryConfigStore::new()));
        let node = NodeId::new("hwvtep://10.0.0.1:6640");

        assert!(reconciler.reconcile_connection(&node).unwrap());
        assert!(!reconciler.reconcile_connection(&node).unwrap());
        assert!(reconciler.stop_connection_reconciliation_if_active(&node));
        assert!(!reconciler.stop_connection_reconciliation_if_active(&node));
    }

    #[tokio::test]
    async fn test_on_disconnect_only_reconnects_configured_devices() {
        let store = Arc::new(InMemoryConfigStore::new());
        let configured = NodeId::new("hwvtep://10.0.0.1:6640");
        store.add_node(configured.clone());
        let (reconciler, connector) = reconciler(1, store);

        assert!(!reconciler
            .on_disconnect(&NodeId::new("hwvtep://uuid/passive"))
            .await
            .unwrap());
        assert!(reconciler.on_disconnect(&configured).await.unwrap());
        assert!(wait_for_calls(&connector, 1).await);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.set_available(false);
        let (reconciler, _) = reconciler(1, store);
        assert!(reconciler
            .on_disconnect(&NodeId::new("hwvtep://10.0.0.1:6640"))
            .await
            .is_err());
    }
}
