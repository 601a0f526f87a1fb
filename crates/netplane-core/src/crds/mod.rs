//! Custom Resource Definitions
//!
//! Resources owned by the cluster network control plane, plus the Multus
//! attachment definitions it reads.

pub mod attachment;
pub mod cluster_network;
pub mod vlan_config;
pub mod vlan_status;

pub use attachment::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};
pub use cluster_network::{ClusterNetwork, ClusterNetworkSpec, ClusterNetworkStatus};
pub use vlan_config::{BondMode, BondOptions, LinkAttrs, Uplink, VlanConfig, VlanConfigSpec};
pub use vlan_status::{LinkStatus, LocalArea, VlanStatus, VlanStatusSpec, VlanStatusStatus};

/// Label and annotation keys.
pub mod keys {
    pub const GROUP: &str = "network.netplane.io";

    /// JSON array of node names a VlanConfig currently selects.
    pub const MATCHED_NODES: &str = "network.netplane.io/matched-nodes";
    /// Effective uplink MTU of a ClusterNetwork.
    pub const UPLINK_MTU: &str = "network.netplane.io/uplink-mtu";
    /// VlanConfig whose MTU `UPLINK_MTU` reflects.
    pub const MTU_SOURCE_VLAN_CONFIG: &str = "network.netplane.io/mtu-source-vlanconfig";
    /// On nodes: the VlanConfig owning the devices. On VlanStatus: its VlanConfig.
    pub const VLAN_CONFIG: &str = "network.netplane.io/vlanconfig";
    pub const CLUSTER_NETWORK: &str = "network.netplane.io/clusternetwork";
    pub const NODE: &str = "network.netplane.io/node";
    /// Route settings of a NetworkAttachmentDefinition.
    pub const NETWORK_ROUTE: &str = "network.netplane.io/route";

    pub const VALUE_TRUE: &str = "true";

    /// Node label advertising that `cluster_network` is available there.
    pub fn network_available(cluster_network: &str) -> String {
        format!("{GROUP}/{cluster_network}")
    }
}
