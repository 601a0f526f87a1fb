//! VlanStatus CRD
//!
//! One object per (VlanConfig, node) pair recording what the node agent
//! actually built. The interesting data lives in the status subresource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, Conditions};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "network.netplane.io",
    version = "v1beta1",
    kind = "VlanStatus",
    shortname = "vs",
    status = "VlanStatusStatus",
    printcolumn = r#"{"name":"Cluster Network", "type":"string", "jsonPath":".status.clusterNetwork"}"#,
    printcolumn = r#"{"name":"VlanConfig", "type":"string", "jsonPath":".status.vlanConfig"}"#,
    printcolumn = r#"{"name":"Node", "type":"string", "jsonPath":".status.node"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct VlanStatusSpec {}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VlanStatusStatus {
    pub cluster_network: String,
    pub vlan_config: String,
    pub node: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_areas: Vec<LocalArea>,

    /// Bridge first, then uplink.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_status: Vec<LinkStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A VLAN id and the subnet carried on it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalArea {
    pub vid: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,
}

/// Snapshot of one kernel link.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub name: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default)]
    pub promiscuous: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default)]
    pub master_index: u32,
}

impl VlanStatus {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.conditions.is_ready())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Cluster network this status reports for, empty if not yet recorded.
    pub fn cluster_network(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.cluster_network.as_str())
            .unwrap_or_default()
    }
}
