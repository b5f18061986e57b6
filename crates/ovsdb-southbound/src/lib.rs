//! Southbound reconciliation core for OVSDB hardware VTEP devices.
//!
//! This crate keeps the controller's view of remote switch state converging
//! despite an asynchronous, partially ordered device protocol:
//!
//! - [`ReconciliationEngine`]: bounded worker pool plus a retry timer
//! - [`ReconciliationTask`]: one idempotent corrective action with linear backoff
//! - [`ConnectionArbiter`]: elects one live connection among passive reconnects
//! - [`DeviceInfo`]: per-device row cache and the queue of jobs waiting for
//!   referenced rows
//!
//! # Architecture
//!
//! 1. Row updates from a device feed its [`DeviceInfo`], which runs a
//!    dependent job at once or parks it until the rows it references appear
//! 2. The [`ConnectionArbiter`] decides which passive connection may serve a
//!    device
//! 3. Failed connections and configuration replays are handed to the
//!    [`ReconciliationEngine`] as tasks and retried until they succeed or
//!    run out of attempts
//!
//! The wire codec and the configuration datastore stay outside; the core
//! reaches them through [`TransactionSubmitter`], [`ConfigStore`],
//! [`DeviceConnector`] and [`PassiveConnection`].
//!
//! # Example
//!
//! ```ignore
//! use ovsdb_southbound::{ConnectionReconciler, ReconciliationEngine, RetryPolicy, SouthboundConfig};
//!
//! let config = SouthboundConfig::load_or_default(ovsdb_southbound::DEFAULT_CONFIG_PATH)?;
//! ovsdb_southbound::init_logging(&config.logging)?;
//!
//! let engine = ReconciliationEngine::new(&config.engine);
//! let reconciler = ConnectionReconciler::new(
//!     engine.clone(),
//!     connector,
//!     store,
//!     RetryPolicy::from(&config.retry),
//! );
//! reconciler.reconcile_connection(&node)?;
//! ```

mod arbiter;
mod config;
mod connection;
pub mod device;
mod engine;
mod error;
mod logging;
mod replay;
mod store;
mod task;
mod task_store;

pub use arbiter::{ConnectionArbiter, Liveness, PassiveConnection, PendingClient};
pub use config::{
    ArbiterConfig, EngineConfig, LogFormat, LoggingConfig, RetryConfig, SouthboundConfig,
    DEFAULT_CONFIG_PATH,
};
pub use connection::{ConnectionReconciler, ConnectionReconciliationTask, DeviceConnector};
pub use device::{DeviceInfo, DeviceRegistry, TransactionSubmitter};
pub use engine::{EngineStats, ReconciliationEngine};
pub use error::{Result, SouthboundError};
pub use logging::init_logging;
pub use replay::ConfigReplayTask;
pub use store::{ConfigRow, ConfigStore, InMemoryConfigStore};
pub use task::{ReconciliationTask, RetryPolicy, TaskProgress, TaskState};
pub use task_store::{TaskHandle, TaskId, TaskStore};
