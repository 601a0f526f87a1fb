//! Cluster readiness aggregation
//!
//! A ClusterNetwork is ready while at least one node serves it. Ready is
//! raised by the first ready VlanStatus and only dropped once the last
//! VlanStatus of the network goes away.

use kube::ResourceExt;
use netplane_core::{keys, VlanStatus};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use super::ManagerHandler;
use crate::controllers::ReconcileError;

impl ManagerHandler {
    /// Mark the status's cluster network ready once the status reports ready.
    #[instrument(skip_all, fields(vlan_status = %vs.name_any(), cluster_network = %vs.cluster_network()))]
    pub async fn set_cluster_network_ready(&self, vs: &VlanStatus) -> Result<(), ReconcileError> {
        if vs.is_deleting() || !vs.is_ready() {
            return Ok(());
        }
        let name = vs.cluster_network();
        let mut cn = self
            .store
            .get_cluster_network(name)
            .await?
            .ok_or_else(|| ReconcileError::ClusterNetworkNotFound(name.to_string()))?;
        if cn.is_ready() {
            return Ok(());
        }

        cn.set_ready(true);
        self.store.replace_cluster_network_status(&cn).await?;
        info!("cluster network ready");
        Ok(())
    }

    /// Mark the cluster network unready when `vs`, being removed, is the last
    /// VlanStatus left for it.
    #[instrument(skip_all, fields(vlan_status = %vs.name_any(), cluster_network = %vs.cluster_network()))]
    pub async fn set_cluster_network_unready(&self, vs: &VlanStatus) -> Result<(), ReconcileError> {
        let name = vs.cluster_network();
        if name.is_empty() {
            return Ok(());
        }

        let selector = BTreeMap::from([(keys::CLUSTER_NETWORK.to_string(), name.to_string())]);
        let remaining = self.store.list_vlan_statuses(&selector).await?;
        match remaining.as_slice() {
            [_, _, ..] => {
                debug!(remaining = remaining.len(), "cluster network still served");
                return Ok(());
            }
            [only] if only.name_any() != vs.name_any() => {
                return Err(ReconcileError::Inconsistent {
                    remaining: only.name_any(),
                    removing: vs.name_any(),
                });
            }
            _ => {}
        }

        let Some(mut cn) = self.store.get_cluster_network(name).await? else {
            debug!("cluster network already gone");
            return Ok(());
        };
        if cn.is_unready() {
            return Ok(());
        }

        cn.set_ready(false);
        self.store.replace_cluster_network_status(&cn).await?;
        info!("cluster network unready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectStore};
    use kube::api::ObjectMeta;
    use netplane_core::{
        crds::{ClusterNetworkSpec, VlanStatusSpec, VlanStatusStatus},
        naming, ClusterNetwork, Conditions,
    };
    use std::sync::Arc;

    fn vlan_status(vc: &str, node: &str, ready: bool) -> VlanStatus {
        let mut status = VlanStatusStatus {
            cluster_network: "storage".to_string(),
            vlan_config: vc.to_string(),
            node: node.to_string(),
            ..Default::default()
        };
        status.conditions.set_ready(ready, "");
        VlanStatus {
            metadata: ObjectMeta {
                name: Some(naming::status_name(vc, node)),
                labels: Some(BTreeMap::from([(
                    keys::CLUSTER_NETWORK.to_string(),
                    "storage".to_string(),
                )])),
                ..Default::default()
            },
            spec: VlanStatusSpec {},
            status: Some(status),
        }
    }

    async fn setup() -> (Arc<MemoryStore>, ManagerHandler) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_cluster_network(&ClusterNetwork::new("storage", ClusterNetworkSpec::default()))
            .await
            .unwrap();
        let manager = ManagerHandler::new(store.clone());
        (store, manager)
    }

    async fn cluster_network(store: &MemoryStore) -> ClusterNetwork {
        store.get_cluster_network("storage").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_ready_until_last_status_removed() {
        let (store, manager) = setup().await;

        let first = store
            .create_vlan_status(&vlan_status("vc1", "node1", true))
            .await
            .unwrap();
        manager.set_cluster_network_ready(&first).await.unwrap();
        assert!(cluster_network(&store).await.is_ready());

        let second = store
            .create_vlan_status(&vlan_status("vc1", "node2", true))
            .await
            .unwrap();
        manager.set_cluster_network_ready(&second).await.unwrap();
        assert!(cluster_network(&store).await.is_ready());

        store.delete_vlan_status(&first.name_any()).await.unwrap();
        manager.set_cluster_network_unready(&first).await.unwrap();
        assert!(cluster_network(&store).await.is_ready());

        store.delete_vlan_status(&second.name_any()).await.unwrap();
        manager.set_cluster_network_unready(&second).await.unwrap();
        assert!(cluster_network(&store).await.is_unready());
    }

    #[tokio::test]
    async fn test_unready_status_does_not_raise_ready() {
        let (store, manager) = setup().await;
        let failed = store
            .create_vlan_status(&vlan_status("vc1", "node1", false))
            .await
            .unwrap();
        manager.set_cluster_network_ready(&failed).await.unwrap();
        assert!(!cluster_network(&store).await.is_ready());
    }

    #[tokio::test]
    async fn test_removal_while_still_listed() {
        let (store, manager) = setup().await;
        let only = store
            .create_vlan_status(&vlan_status("vc1", "node1", true))
            .await
            .unwrap();
        manager.set_cluster_network_ready(&only).await.unwrap();

        // A status being finalized is still listed; being the only one it
        // takes readiness with it.
        manager.set_cluster_network_unready(&only).await.unwrap();
        assert!(cluster_network(&store).await.is_unready());
    }

    #[tokio::test]
    async fn test_single_foreign_survivor_is_inconsistent() {
        let (store, manager) = setup().await;
        let kept = store
            .create_vlan_status(&vlan_status("vc1", "node1", true))
            .await
            .unwrap();
        manager.set_cluster_network_ready(&kept).await.unwrap();
        let before = cluster_network(&store).await;

        let stray = vlan_status("vc1", "node2", true);
        let err = manager.set_cluster_network_unready(&stray).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Inconsistent { .. }));

        let after = cluster_network(&store).await;
        assert!(after.is_ready());
        assert_eq!(before.resource_version(), after.resource_version());
    }

    #[tokio::test]
    async fn test_missing_cluster_network() {
        let store = Arc::new(MemoryStore::new());
        let manager = ManagerHandler::new(store.clone());
        let vs = vlan_status("vc1", "node1", true);

        assert!(matches!(
            manager.set_cluster_network_ready(&vs).await,
            Err(ReconcileError::ClusterNetworkNotFound(_))
        ));
        manager.set_cluster_network_unready(&vs).await.unwrap();
    }
}
