//! Per-node VlanStatus reporting
//!
//! One VlanStatus per (VlanConfig, node), named by [`naming::status_name`].
//! Writes only happen when the reported state actually changed.

use kube::{api::ObjectMeta, Resource, ResourceExt};
use netplane_core::{
    crds::{VlanStatusSpec, VlanStatusStatus},
    keys, naming, Conditions, VlanConfig, VlanStatus,
};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{device::VlanDevice, store::{ObjectStore, StoreError}};

/// Labels identifying the status of `vc` on `node`.
pub fn status_labels(vc: &VlanConfig, node: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (keys::VLAN_CONFIG.to_string(), vc.name_any()),
        (
            keys::CLUSTER_NETWORK.to_string(),
            vc.spec.cluster_network.clone(),
        ),
        (keys::NODE.to_string(), node.to_string()),
    ])
}

fn new_status(vc: &VlanConfig, node: &str, name: &str) -> VlanStatus {
    VlanStatus {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(status_labels(vc, node)),
            owner_references: vc.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: VlanStatusSpec {},
        status: None,
    }
}

/// Record the outcome of a setup attempt: the built devices, or the error
/// message of a failed one.
pub async fn upsert(
    store: &dyn ObjectStore,
    vc: &VlanConfig,
    node: &str,
    outcome: Result<&VlanDevice, String>,
) -> Result<(), StoreError> {
    let name = naming::status_name(&vc.name_any(), node);
    let current = store.get_vlan_status(&name).await?;

    let mut desired = current
        .clone()
        .unwrap_or_else(|| new_status(vc, node, &name));
    desired.labels_mut().extend(status_labels(vc, node));
    let status = desired.status.get_or_insert_with(VlanStatusStatus::default);
    status.cluster_network = vc.spec.cluster_network.clone();
    status.vlan_config = vc.name_any();
    status.node = node.to_string();
    match outcome {
        Ok(device) => {
            status.local_areas = device.local_areas.clone();
            status.link_status = vec![device.bridge.clone(), device.uplink.clone()];
            status.conditions.set_ready(true, "");
        }
        Err(message) => {
            status.local_areas.clear();
            status.link_status.clear();
            status.conditions.set_ready(false, &message);
        }
    }

    match current {
        None => {
            store.create_vlan_status(&desired).await?;
        }
        Some(current) if current.status != desired.status || current.labels() != desired.labels() => {
            store.replace_vlan_status(&desired).await?;
        }
        Some(_) => debug!(name = %name, "vlanstatus unchanged"),
    }
    Ok(())
}

/// Drop the status after a clean teardown; after a failed one keep it and
/// mark it unready with the error.
pub async fn remove(
    store: &dyn ObjectStore,
    vc: &VlanConfig,
    node: &str,
    teardown_error: Option<String>,
) -> Result<(), StoreError> {
    let name = naming::status_name(&vc.name_any(), node);

    let Some(message) = teardown_error else {
        return match store.delete_vlan_status(&name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        };
    };

    let Some(mut vs) = store.get_vlan_status(&name).await? else {
        debug!(name = %name, "no vlanstatus to mark unready");
        return Ok(());
    };
    let changed = vs
        .status
        .get_or_insert_with(VlanStatusStatus::default)
        .conditions
        .set_ready(false, &message);
    if changed {
        store.replace_vlan_status(&vs).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::vlan_config;
    use crate::store::MemoryStore;
    use netplane_core::crds::{LinkStatus, LocalArea};

    fn device() -> VlanDevice {
        VlanDevice {
            bridge: LinkStatus {
                name: "storage-br".to_string(),
                index: 2,
                type_: "bridge".to_string(),
                ..Default::default()
            },
            uplink: LinkStatus {
                name: "storage-bo".to_string(),
                index: 1,
                type_: "bond".to_string(),
                master_index: 2,
                ..Default::default()
            },
            local_areas: vec![LocalArea {
                vid: 100,
                cidr: "10.0.100.0/24".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_in_place() {
        let store = MemoryStore::new();
        let vc = store
            .apply_vlan_config(vlan_config("vc1", "storage", 0, None))
            .await;

        upsert(&store, &vc, "node1", Err("no such nic".to_string()))
            .await
            .unwrap();
        let name = naming::status_name("vc1", "node1");
        let failed = store.get_vlan_status(&name).await.unwrap().unwrap();
        assert!(!failed.is_ready());
        assert_eq!(failed.labels(), &status_labels(&vc, "node1"));
        assert_eq!(
            failed.owner_references()[0].uid,
            vc.metadata.uid.clone().unwrap()
        );
        let message = failed.status.as_ref().unwrap().conditions[0].message.clone();
        assert_eq!(message, "no such nic");

        upsert(&store, &vc, "node1", Ok(&device())).await.unwrap();
        assert_eq!(store.vlan_status_names().await, vec![name.clone()]);
        let ready = store.get_vlan_status(&name).await.unwrap().unwrap();
        assert!(ready.is_ready());
        let status = ready.status.unwrap();
        assert_eq!(status.link_status[0].name, "storage-br");
        assert_eq!(status.link_status[1].name, "storage-bo");
        assert_eq!(status.local_areas.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_unchanged_does_not_write() {
        let store = MemoryStore::new();
        let vc = vlan_config("vc1", "storage", 0, None);
        upsert(&store, &vc, "node1", Ok(&device())).await.unwrap();
        let name = naming::status_name("vc1", "node1");
        let before = store.get_vlan_status(&name).await.unwrap().unwrap();

        upsert(&store, &vc, "node1", Ok(&device())).await.unwrap();
        let after = store.get_vlan_status(&name).await.unwrap().unwrap();
        assert_eq!(before.resource_version(), after.resource_version());
    }

    #[tokio::test]
    async fn test_remove_deletes_or_marks_unready() {
        let store = MemoryStore::new();
        let vc = vlan_config("vc1", "storage", 0, None);
        let name = naming::status_name("vc1", "node1");
        upsert(&store, &vc, "node1", Ok(&device())).await.unwrap();

        remove(&store, &vc, "node1", Some("device busy".to_string()))
            .await
            .unwrap();
        let kept = store.get_vlan_status(&name).await.unwrap().unwrap();
        assert!(!kept.is_ready());

        remove(&store, &vc, "node1", None).await.unwrap();
        assert!(store.get_vlan_status(&name).await.unwrap().is_none());

        // Already gone.
        remove(&store, &vc, "node1", None).await.unwrap();
        remove(&store, &vc, "node1", Some("device busy".to_string()))
            .await
            .unwrap();
    }
}
