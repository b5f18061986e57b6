//! Row identity and cached row records.

use super::schema::RowData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a managed device node, e.g. `hwvtep://uuid/<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowType {
    /// Logical switch (VNI-backed broadcast domain)
    LogicalSwitch,
    /// Physical locator, i.e. a tunnel termination point
    TerminationPoint,
    /// Remote multicast MAC bound to a locator set
    RemoteMcastMac,
    /// Remote unicast MAC bound to one locator
    RemoteUcastMac,
    /// Physical switch port with VLAN bindings
    PhysicalPort,
}

impl RowType {
    /// Every row type, in declaration order.
    pub const ALL: [RowType; 5] = [
        RowType::LogicalSwitch,
        RowType::TerminationPoint,
        RowType::RemoteMcastMac,
        RowType::RemoteUcastMac,
        RowType::PhysicalPort,
    ];

    /// Returns the type name used in logs and task identities.
    pub fn as_str(&self) -> &'static str {
        match self {
            RowType::LogicalSwitch => "logical-switch",
            RowType::TerminationPoint => "termination-point",
            RowType::RemoteMcastMac => "remote-mcast-mac",
            RowType::RemoteUcastMac => "remote-ucast-mac",
            RowType::PhysicalPort => "physical-port",
        }
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a row within its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    /// Creates a row key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Identifier the device assigned to a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowUuid(String);

impl RowUuid {
    /// Creates a remote row identifier.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Availability of a cached row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataStatus {
    /// Present in the cache
    Cached,
    /// Submitted to the device, not yet reported back
    InTransit,
    /// Known key, content not available
    Unknown,
}

/// One cached row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceData {
    key: RowKey,
    uuid: Option<RowUuid>,
    data: Option<RowData>,
    status: DataStatus,
}

impl DeviceData {
    pub(crate) fn cached(key: RowKey, uuid: Option<RowUuid>, data: Option<RowData>) -> Self {
        Self {
            key,
            uuid,
            data,
            status: DataStatus::Cached,
        }
    }

    pub(crate) fn in_transit(key: RowKey, uuid: Option<RowUuid>) -> Self {
        Self {
            key,
            uuid,
            data: None,
            status: DataStatus::InTransit,
        }
    }

    /// The row key.
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// The identifier assigned by the device, if reported.
    pub fn uuid(&self) -> Option<&RowUuid> {
        self.uuid.as_ref()
    }

    /// The row content, if known.
    pub fn data(&self) -> Option<&RowData> {
        self.data.as_ref()
    }

    /// Cache status of the row.
    pub fn status(&self) -> DataStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_type_names_are_unique() {
        let mut names: Vec<&str> = RowType::ALL.iter().map(RowType::as_str).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RowType::ALL.len());
    }

    #[test]
    fn test_device_data_constructors() {
        let transit = DeviceData::in_transit(RowKey::new("ls0"), None);
        assert_eq!(transit.status(), DataStatus::InTransit);
        assert!(transit.uuid().is_none());

        let cached = DeviceData::cached(RowKey::new("ls0"), Some(RowUuid::new("u-1")), None);
        assert_eq!(cached.status(), DataStatus::Cached);
        assert_eq!(cached.uuid().map(RowUuid::as_str), Some("u-1"));
        assert_eq!(cached.key().as_str(), "ls0");
    }
}
