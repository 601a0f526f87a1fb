//! Fixtures shared by the handler tests.

use k8s_openapi::api::core::v1::Node;
use kube::{api::ObjectMeta, ResourceExt};
use netplane_core::{
    crds::{
        LinkAttrs, NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec, Uplink,
        VlanConfigSpec,
    },
    keys, VlanConfig,
};

pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// VlanConfig over `eth1` with the given MTU (0 leaves link attributes unset)
/// and, if given, a matched-nodes annotation.
pub fn vlan_config(
    name: &str,
    cluster_network: &str,
    mtu: u32,
    matched: Option<&[&str]>,
) -> VlanConfig {
    let mut vc = VlanConfig::new(
        name,
        VlanConfigSpec {
            cluster_network: cluster_network.to_string(),
            uplink: Uplink {
                nics: vec!["eth1".to_string()],
                link_attributes: (mtu != 0).then(|| LinkAttrs {
                    mtu,
                    ..Default::default()
                }),
                bond_options: None,
            },
            ..Default::default()
        },
    );
    if let Some(nodes) = matched {
        let raw = serde_json::to_string(nodes).unwrap();
        vc.annotations_mut()
            .insert(keys::MATCHED_NODES.to_string(), raw);
    }
    vc
}

pub fn bridge_attachment(name: &str, bridge: &str, vlan: u16, cidr: &str) -> NetworkAttachmentDefinition {
    let config = serde_json::json!({
        "cniVersion": "0.3.1",
        "type": "bridge",
        "bridge": bridge,
        "vlan": vlan,
    });
    let mut nad = NetworkAttachmentDefinition::new(
        name,
        NetworkAttachmentDefinitionSpec {
            config: config.to_string(),
        },
    );
    nad.metadata.namespace = Some("default".to_string());
    nad.annotations_mut().insert(
        keys::NETWORK_ROUTE.to_string(),
        serde_json::json!({ "cidr": cidr }).to_string(),
    );
    nad
}
