//! Typed hardware VTEP rows.
//!
//! Rows are a closed set matched exhaustively; every variant knows its
//! table ([`RowData::row_type`]) and the rows it references
//! ([`Dependent`]).

use super::row::{RowKey, RowType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Logical switch row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSwitch {
    /// Switch name
    pub name: String,
    /// VXLAN network identifier
    pub tunnel_key: Option<u32>,
    /// Free-form description
    pub description: Option<String>,
}

impl LogicalSwitch {
    /// Creates a logical switch row.
    pub fn new(name: impl Into<String>, tunnel_key: Option<u32>) -> Self {
        Self {
            name: name.into(),
            tunnel_key,
            description: None,
        }
    }
}

/// Physical locator (tunnel termination point) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalLocator {
    /// Tunnel destination address
    pub dst_ip: IpAddr,
    /// Encapsulation, normally `vxlan_over_ipv4`
    pub encapsulation: String,
}

impl PhysicalLocator {
    /// Creates a VXLAN locator for `dst_ip`.
    pub fn vxlan(dst_ip: IpAddr) -> Self {
        Self {
            dst_ip,
            encapsulation: "vxlan_over_ipv4".to_string(),
        }
    }
}

/// Remote multicast MAC row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMcastMac {
    /// MAC address, `unknown-dst` for flooding
    pub mac: String,
    /// Logical switch the entry belongs to
    pub logical_switch: RowKey,
    /// Locators the traffic is replicated to
    pub locator_set: Vec<RowKey>,
}

/// Remote unicast MAC row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUcastMac {
    /// MAC address
    pub mac: String,
    /// IP address bound to the MAC
    pub ip: Option<IpAddr>,
    /// Logical switch the entry belongs to
    pub logical_switch: RowKey,
    /// Locator the MAC is reachable through
    pub locator: RowKey,
}

/// Physical port row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPort {
    /// Port name
    pub name: String,
    /// VLAN id to logical switch bindings
    pub vlan_bindings: BTreeMap<u16, RowKey>,
}

/// Any row the core caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RowData {
    /// Logical switch
    LogicalSwitch(LogicalSwitch),
    /// Physical locator
    PhysicalLocator(PhysicalLocator),
    /// Remote multicast MAC
    RemoteMcastMac(RemoteMcastMac),
    /// Remote unicast MAC
    RemoteUcastMac(RemoteUcastMac),
    /// Physical port
    PhysicalPort(PhysicalPort),
}

impl RowData {
    /// Table the row belongs to.
    pub fn row_type(&self) -> RowType {
        match self {
            RowData::LogicalSwitch(_) => RowType::LogicalSwitch,
            RowData::PhysicalLocator(_) => RowType::TerminationPoint,
            RowData::RemoteMcastMac(_) => RowType::RemoteMcastMac,
            RowData::RemoteUcastMac(_) => RowType::RemoteUcastMac,
            RowData::PhysicalPort(_) => RowType::PhysicalPort,
        }
    }
}

/// A row that references other rows.
pub trait Dependent {
    /// Logical switches this row references.
    fn logical_switch_dependencies(&self) -> Vec<RowKey>;

    /// Termination points this row references.
    fn termination_point_dependencies(&self) -> Vec<RowKey>;

    /// All references grouped by table, logical switches first.
    fn dependencies(&self) -> Vec<(RowType, Vec<RowKey>)> {
        vec![
            (RowType::LogicalSwitch, self.logical_switch_dependencies()),
            (
                RowType::TerminationPoint,
                self.termination_point_dependencies(),
            ),
        ]
    }
}

impl Dependent for RemoteMcastMac {
    fn logical_switch_dependencies(&self) -> Vec<RowKey> {
        vec![self.logical_switch.clone()]
    }

    fn termination_point_dependencies(&self) -> Vec<RowKey> {
        self.locator_set.clone()
    }
}

impl Dependent for RemoteUcastMac {
    fn logical_switch_dependencies(&self) -> Vec<RowKey> {
        vec![self.logical_switch.clone()]
    }

    fn termination_point_dependencies(&self) -> Vec<RowKey> {
        vec![self.locator.clone()]
    }
}

impl Dependent for PhysicalPort {
    fn logical_switch_dependencies(&self) -> Vec<RowKey> {
        let mut switches: Vec<RowKey> = self.vlan_bindings.values().cloned().collect();
        switches.sort();
        switches.dedup();
        switches
    }

    fn termination_point_dependencies(&self) -> Vec<RowKey> {
        Vec::new()
    }
}

impl Dependent for RowData {
    fn logical_switch_dependencies(&self) -> Vec<RowKey> {
        match self {
            RowData::LogicalSwitch(_) | RowData::PhysicalLocator(_) => Vec::new(),
            RowData::RemoteMcastMac(row) => row.logical_switch_dependencies(),
            RowData::RemoteUcastMac(row) => row.logical_switch_dependencies(),
            RowData::PhysicalPort(row) => row.logical_switch_dependencies(),
        }
    }

    fn termination_point_dependencies(&self) -> Vec<RowKey> {
        match self {
            RowData::LogicalSwitch(_) | RowData::PhysicalLocator(_) => Vec::new(),
            RowData::RemoteMcastMac(row) => row.termination_point_dependencies(),
            RowData::RemoteUcastMac(row) => row.termination_point_dependencies(),
            RowData::PhysicalPort(row) => row.termination_point_dependencies(),
        }
    }
}
