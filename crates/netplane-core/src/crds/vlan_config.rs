//! VlanConfig CRD
//!
//! Declares the uplink bond a set of nodes should build for one cluster
//! network. Several VlanConfigs may target the same cluster network; on any
//! given node at most one of them owns the devices.

use kube::{CustomResource, ResourceExt};
use macaddr::MacAddr6;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use super::keys;

/// Serde module for optional MAC addresses as colon-separated strings.
mod optional_mac_string {
    use macaddr::MacAddr6;
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(mac: &Option<MacAddr6>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match mac {
            Some(mac) => serializer.serialize_str(&mac.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<MacAddr6>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => MacAddr6::from_str(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// VlanConfig selects nodes and describes the bonded uplink they attach to a
/// cluster network's bridge.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "network.netplane.io",
    version = "v1beta1",
    kind = "VlanConfig",
    shortname = "vc",
    printcolumn = r#"{"name":"Cluster Network", "type":"string", "jsonPath":".spec.clusterNetwork"}"#,
    printcolumn = r#"{"name":"Description", "type":"string", "jsonPath":".spec.description"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VlanConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Cluster network this uplink serves.
    pub cluster_network: String,

    /// Node label selector. Resolved elsewhere into the matched-nodes annotation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    pub uplink: Uplink,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Uplink {
    /// Physical NICs enslaved to the bond.
    pub nics: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_attributes: Option<LinkAttrs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bond_options: Option<BondOptions>,
}

/// Link attributes applied only when set; zero means "keep the default".
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkAttrs {
    #[serde(default)]
    pub mtu: u32,

    #[serde(default, rename = "txQLen")]
    pub tx_qlen: u32,

    #[schemars(with = "Option<String>")]
    #[serde(
        default,
        with = "optional_mac_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub hardware_addr: Option<MacAddr6>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BondOptions {
    #[serde(default)]
    pub mode: BondMode,

    /// MII link monitoring interval in milliseconds; 0 leaves the kernel default.
    #[serde(default)]
    pub miimon: u32,
}

/// Linux bonding modes.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BondMode {
    BalanceRr,
    #[default]
    ActiveBackup,
    BalanceXor,
    Broadcast,
    #[serde(rename = "802.3ad")]
    #[strum(serialize = "802.3ad")]
    Ieee8023ad,
    BalanceTlb,
    BalanceAlb,
}

impl VlanConfig {
    /// MTU declared on the uplink, `0` when unset.
    pub fn mtu(&self) -> u32 {
        self.spec
            .uplink
            .link_attributes
            .as_ref()
            .map(|attrs| attrs.mtu)
            .unwrap_or(0)
    }

    /// Nodes listed in the matched-nodes annotation.
    ///
    /// A missing or malformed annotation yields `None`: the match has not been
    /// computed yet, which callers treat as "no match" rather than an error.
    pub fn matched_nodes(&self) -> Option<Vec<String>> {
        let raw = self.annotations().get(keys::MATCHED_NODES)?;
        if raw.is_empty() {
            return None;
        }
        serde_json::from_str(raw).ok()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn vlan_config(annotation: Option<&str>) -> VlanConfig {
        let mut vc = VlanConfig::new(
            "vc1",
            VlanConfigSpec {
                cluster_network: "storage".to_string(),
                ..Default::default()
            },
        );
        if let Some(value) = annotation {
            vc.annotations_mut()
                .insert(keys::MATCHED_NODES.to_string(), value.to_string());
        }
        vc
    }

    #[test]
    fn test_matched_nodes_annotation() {
        assert_eq!(vlan_config(None).matched_nodes(), None);
        assert_eq!(vlan_config(Some("")).matched_nodes(), None);
        assert_eq!(vlan_config(Some("not json")).matched_nodes(), None);
        assert_eq!(vlan_config(Some(r#"[{"name":"n1"}]"#)).matched_nodes(), None);
        assert_eq!(
            vlan_config(Some(r#"["node1","node2"]"#)).matched_nodes(),
            Some(vec!["node1".to_string(), "node2".to_string()])
        );
    }

    #[test]
    fn test_mtu_defaults_to_zero() {
        let mut vc = vlan_config(None);
        assert_eq!(vc.mtu(), 0);
        vc.spec.uplink.link_attributes = Some(LinkAttrs {
            mtu: 9000,
            ..Default::default()
        });
        assert_eq!(vc.mtu(), 9000);
    }

    #[test]
    fn test_bond_mode_strings() {
        assert_eq!(BondMode::default().to_string(), "active-backup");
        assert_eq!(BondMode::Ieee8023ad.to_string(), "802.3ad");
        assert_eq!(BondMode::from_str("balance-alb").unwrap(), BondMode::BalanceAlb);
        assert_eq!(
            serde_json::from_str::<BondMode>("\"802.3ad\"").unwrap(),
            BondMode::Ieee8023ad
        );
    }

    #[test]
    fn test_uplink_deserialization() {
        let uplink: Uplink = serde_json::from_value(serde_json::json!({
            "nics": ["eth1", "eth2"],
            "linkAttributes": { "mtu": 9000, "txQLen": 2000, "hardwareAddr": "02:00:00:aa:bb:cc" },
            "bondOptions": { "mode": "balance-tlb", "miimon": 100 }
        }))
        .unwrap();

        assert_eq!(uplink.nics, vec!["eth1", "eth2"]);
        let attrs = uplink.link_attributes.unwrap();
        assert_eq!(attrs.tx_qlen, 2000);
        assert_eq!(
            attrs.hardware_addr,
            Some(MacAddr6::new(0x02, 0, 0, 0xaa, 0xbb, 0xcc))
        );
        let bond = uplink.bond_options.unwrap();
        assert_eq!(bond.mode, BondMode::BalanceTlb);
        assert_eq!(bond.miimon, 100);
    }
}
