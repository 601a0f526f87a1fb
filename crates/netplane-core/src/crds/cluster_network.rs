//! ClusterNetwork CRD
//!
//! A logical network spanning the fleet. The management plane creates one per
//! distinct `VlanConfig.spec.clusterNetwork`, keeps its MTU annotations in sync
//! and aggregates per-node readiness into its Ready condition.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::keys;
use crate::condition::{Condition, Conditions};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "network.netplane.io",
    version = "v1beta1",
    kind = "ClusterNetwork",
    shortname = "cn",
    status = "ClusterNetworkStatus",
    printcolumn = r#"{"name":"Uplink MTU", "type":"string", "jsonPath":".metadata.annotations.network\\.netplane\\.io/uplink-mtu"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ClusterNetwork {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.conditions.is_ready())
    }

    pub fn is_unready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.conditions.is_unready())
    }

    /// Set the Ready condition, returning whether anything changed.
    pub fn set_ready(&mut self, ready: bool) -> bool {
        self.status
            .get_or_insert_with(ClusterNetworkStatus::default)
            .conditions
            .set_ready(ready, "")
    }

    pub fn uplink_mtu(&self) -> Option<&str> {
        self.annotations().get(keys::UPLINK_MTU).map(String::as_str)
    }

    pub fn mtu_source(&self) -> Option<&str> {
        self.annotations()
            .get(keys::MTU_SOURCE_VLAN_CONFIG)
            .map(String::as_str)
    }

    /// Record `vlan_config` as the MTU source with effective value `mtu`.
    pub fn set_mtu_source(&mut self, vlan_config: &str, mtu: u32) {
        let annotations = self.annotations_mut();
        annotations.insert(keys::UPLINK_MTU.to_string(), mtu.to_string());
        annotations.insert(
            keys::MTU_SOURCE_VLAN_CONFIG.to_string(),
            vlan_config.to_string(),
        );
    }

    pub fn clear_mtu_source(&mut self) {
        let annotations = self.annotations_mut();
        annotations.remove(keys::UPLINK_MTU);
        annotations.remove(keys::MTU_SOURCE_VLAN_CONFIG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtu_source_annotations() {
        let mut cn = ClusterNetwork::new("storage", ClusterNetworkSpec::default());
        assert_eq!(cn.uplink_mtu(), None);

        cn.set_mtu_source("vc-a", 9000);
        assert_eq!(cn.uplink_mtu(), Some("9000"));
        assert_eq!(cn.mtu_source(), Some("vc-a"));

        cn.clear_mtu_source();
        assert_eq!(cn.uplink_mtu(), None);
        assert_eq!(cn.mtu_source(), None);
    }

    #[test]
    fn test_ready_transitions() {
        let mut cn = ClusterNetwork::new("storage", ClusterNetworkSpec::default());
        assert!(!cn.is_ready());
        assert!(!cn.is_unready());

        assert!(cn.set_ready(true));
        assert!(cn.is_ready());
        assert!(!cn.set_ready(true));

        assert!(cn.set_ready(false));
        assert!(cn.is_unready());
    }
}
