//! Per-device row cache.
//!
//! Two views are kept per device: the intended configuration and the
//! operational state reported by the device. An operational entry may be
//! a placeholder marking a row as in transit. Operational rows are also
//! indexed by the uuid the device assigned to them.

use super::row::{DataStatus, DeviceData, RowKey, RowType, RowUuid};
use super::schema::RowData;
use std::collections::HashMap;

type Table = HashMap<RowKey, DeviceData>;

#[derive(Debug, Default)]
pub(crate) struct DeviceObjectCache {
    config: HashMap<RowType, Table>,
    oper: HashMap<RowType, Table>,
    uuids: HashMap<(RowType, RowUuid), RowKey>,
}

impl DeviceObjectCache {
    pub(crate) fn update_config(&mut self, row_type: RowType, key: RowKey, data: Option<RowData>) {
        self.config
            .entry(row_type)
            .or_default()
            .insert(key.clone(), DeviceData::cached(key, None, data));
    }

    pub(crate) fn config(&self, row_type: RowType, key: &RowKey) -> Option<&DeviceData> {
        self.config.get(&row_type).and_then(|table| table.get(key))
    }

    pub(crate) fn has_config(&self, row_type: RowType, key: &RowKey) -> bool {
        self.config(row_type, key).is_some()
    }

    pub(crate) fn clear_config(&mut self, row_type: RowType, key: &RowKey) -> bool {
        self.config
            .get_mut(&row_type)
            .map(|table| table.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Replaces the operational entry with an in-transit marker. A uuid the
    /// device already assigned is kept.
    pub(crate) fn mark_in_transit(&mut self, row_type: RowType, key: RowKey) {
        let table = self.oper.entry(row_type).or_default();
        let uuid = table.get(&key).and_then(|entry| entry.uuid().cloned());
        table.insert(key.clone(), DeviceData::in_transit(key, uuid));
    }

    pub(crate) fn update_oper(
        &mut self,
        row_type: RowType,
        key: RowKey,
        uuid: Option<RowUuid>,
        data: Option<RowData>,
    ) {
        if let Some(uuid) = &uuid {
            self.uuids.insert((row_type, uuid.clone()), key.clone());
        }
        let previous = self
            .oper
            .entry(row_type)
            .or_default()
            .insert(key.clone(), DeviceData::cached(key, uuid.clone(), data));
        if let Some(old) = previous.and_then(|entry| entry.uuid().cloned()) {
            if Some(&old) != uuid.as_ref() {
                self.forget_uuid(row_type, &old);
            }
        }
    }

    pub(crate) fn oper(&self, row_type: RowType, key: &RowKey) -> Option<&DeviceData> {
        self.oper.get(&row_type).and_then(|table| table.get(key))
    }

    pub(crate) fn is_in_transit(&self, row_type: RowType, key: &RowKey) -> bool {
        self.oper(row_type, key)
            .map(|entry| entry.status() == DataStatus::InTransit)
            .unwrap_or(false)
    }

    pub(crate) fn clear_oper(&mut self, row_type: RowType, key: &RowKey) -> bool {
        let Some(removed) = self.oper.get_mut(&row_type).and_then(|table| table.remove(key)) else {
            return false;
        };
        if let Some(uuid) = removed.uuid() {
            self.forget_uuid(row_type, uuid);
        }
        true
    }

    pub(crate) fn key_for_uuid(&self, row_type: RowType, uuid: &RowUuid) -> Option<&RowKey> {
        self.uuids.get(&(row_type, uuid.clone()))
    }

    fn forget_uuid(&mut self, row_type: RowType, uuid: &RowUuid) {
        self.uuids.remove(&(row_type, uuid.clone()));
    }

    /// Drops every in-transit marker, returning the keys that had one.
    pub(crate) fn clear_in_transit(&mut self) -> Vec<(RowType, RowKey)> {
        let mut cleared = Vec::new();
        let mut stale = Vec::new();
        for (row_type, table) in self.oper.iter_mut() {
            table.retain(|key, entry| {
                if entry.status() == DataStatus::InTransit {
                    cleared.push((*row_type, key.clone()));
                    if let Some(uuid) = entry.uuid() {
                        stale.push((*row_type, uuid.clone()));
                    }
                    false
                } else {
                    true
                }
            });
        }
        for (row_type, uuid) in stale {
            self.forget_uuid(row_type, &uuid);
        }
        cleared.sort();
        cleared
    }

    pub(crate) fn config_len(&self) -> usize {
        self.config.values().map(HashMap::len).sum()
    }

    pub(crate) fn oper_len(&self) -> usize {
        self.oper.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::schema::LogicalSwitch;

    fn ls(name: &str) -> Option<RowData> {
        Some(RowData::LogicalSwitch(LogicalSwitch::new(name, None)))
    }

    #[test]
    fn test_config_and_oper_are_separate() {
        let mut cache = DeviceObjectCache::default();
        let key = RowKey::new("ls0");

        cache.update_config(RowType::LogicalSwitch, key.clone(), ls("ls0"));
        assert!(cache.has_config(RowType::LogicalSwitch, &key));
        assert!(cache.oper(RowType::LogicalSwitch, &key).is_none());

        cache.update_oper(RowType::LogicalSwitch, key.clone(), Some(RowUuid::new("u1")), ls("ls0"));
        assert_eq!(
            cache.oper(RowType::LogicalSwitch, &key).and_then(|d| d.uuid()),
            Some(&RowUuid::new("u1"))
        );
        assert_eq!(cache.config_len(), 1);
        assert_eq!(cache.oper_len(), 1);
    }

    #[test]
    fn test_oper_update_replaces_in_transit_marker() {
        let mut cache = DeviceObjectCache::default();
        let key = RowKey::new("10.0.0.1");

        cache.mark_in_transit(RowType::TerminationPoint, key.clone());
        assert!(cache.is_in_transit(RowType::TerminationPoint, &key));

        cache.update_oper(RowType::TerminationPoint, key.clone(), None, None);
        assert!(!cache.is_in_transit(RowType::TerminationPoint, &key));
    }

    #[test]
    fn test_in_transit_marker_keeps_uuid() {
        let mut cache = DeviceObjectCache::default();
        let key = RowKey::new("ls0");
        cache.update_oper(RowType::LogicalSwitch, key.clone(), Some(RowUuid::new("u1")), ls("ls0"));

        cache.mark_in_transit(RowType::LogicalSwitch, key.clone());
        let entry = cache.oper(RowType::LogicalSwitch, &key).unwrap();
        assert_eq!(entry.status(), DataStatus::InTransit);
        assert_eq!(entry.uuid(), Some(&RowUuid::new("u1")));
        assert!(entry.data().is_none());
    }

    #[test]
    fn test_clear_in_transit_keeps_cached_rows() {
        let mut cache = DeviceObjectCache::default();
        cache.mark_in_transit(RowType::TerminationPoint, RowKey::new("a"));
        cache.mark_in_transit(RowType::LogicalSwitch, RowKey::new("b"));
        cache.update_oper(RowType::LogicalSwitch, RowKey::new("c"), None, ls("c"));

        let cleared = cache.clear_in_transit();
        assert_eq!(
            cleared,
            vec![
                (RowType::LogicalSwitch, RowKey::new("b")),
                (RowType::TerminationPoint, RowKey::new("a")),
            ]
        );
        assert_eq!(cache.oper_len(), 1);
    }

    #[test]
    fn test_uuid_index_follows_oper_rows() {
        let mut cache = DeviceObjectCache::default();
        let key = RowKey::new("ls0");
        cache.update_oper(RowType::LogicalSwitch, key.clone(), Some(RowUuid::new("u1")), ls("ls0"));
        assert_eq!(cache.key_for_uuid(RowType::LogicalSwitch, &RowUuid::new("u1")), Some(&key));

        cache.update_oper(RowType::LogicalSwitch, key.clone(), Some(RowUuid::new("u2")), ls("ls0"));
        assert!(cache.key_for_uuid(RowType::LogicalSwitch, &RowUuid::new("u1")).is_none());
        assert_eq!(cache.key_for_uuid(RowType::LogicalSwitch, &RowUuid::new("u2")), Some(&key));

        cache.mark_in_transit(RowType::LogicalSwitch, key.clone());
        assert_eq!(cache.key_for_uuid(RowType::LogicalSwitch, &RowUuid::new("u2")), Some(&key));

        cache.clear_in_transit();
        assert!(cache.key_for_uuid(RowType::LogicalSwitch, &RowUuid::new("u2")).is_none());
    }

    #[test]
    fn test_clear_missing_is_noop() {
        let mut cache = DeviceObjectCache::default();
        assert!(!cache.clear_config(RowType::LogicalSwitch, &RowKey::new("x")));
        assert!(!cache.clear_oper(RowType::LogicalSwitch, &RowKey::new("x")));
    }
}
