//! Computes which referenced rows a row is still waiting for.

use super::info::DeviceInfo;
use super::job::Dependencies;
use super::schema::Dependent;
use super::transaction::TransactionBuilder;
use crate::error::Result;
use crate::store::ConfigStore;
use tracing::trace;

/// Finds the unmet dependencies of a row on one device.
#[derive(Debug, Clone, Copy)]
pub struct UnmetDependencyGetter<'a> {
    device: &'a DeviceInfo,
}

impl<'a> UnmetDependencyGetter<'a> {
    /// Creates a getter for `device`.
    pub fn new(device: &'a DeviceInfo) -> Self {
        Self { device }
    }

    /// Referenced rows missing from the configuration view.
    ///
    /// A row missing from the cache but present in `store` is written back
    /// to the cache and counts as met.
    pub async fn config_dependencies<D>(&self, store: &dyn ConfigStore, row: &D) -> Result<Dependencies>
    where
        D: Dependent + ?Sized,
    {
        let mut unmet = Dependencies::new();
        for (row_type, keys) in row.dependencies() {
            for key in keys {
                if self.device.is_config_data_available(row_type, &key) {
                    continue;
                }
                match store.read_row(self.device.node(), row_type, &key).await? {
                    Some(data) => {
                        trace!(
                            device = %self.device.node(),
                            row_type = %row_type,
                            key = %key,
                            "Dependency found in config store"
                        );
                        self.device.update_config_data(row_type, key, Some(data));
                    }
                    None => unmet.add(row_type, key),
                }
            }
        }
        Ok(unmet)
    }

    /// Referenced rows still in transit to the device.
    ///
    /// Rows touched by `current` are excluded, since the device applies
    /// them in the same transaction.
    pub fn in_transit_dependencies<D>(&self, current: Option<&TransactionBuilder>, row: &D) -> Dependencies
    where
        D: Dependent + ?Sized,
    {
        let mut unmet = Dependencies::new();
        for (row_type, keys) in row.dependencies() {
            for key in keys {
                let in_current = current
                    .map(|tx| tx.touches(row_type, &key))
                    .unwrap_or(false);
                if !in_current && self.device.is_key_in_transit(row_type, &key) {
                    unmet.add(row_type, key);
                }
            }
        }
        unmet
    }
}
