//! MTU source election
//!
//! `uplink-mtu` on a ClusterNetwork must always equal the effective MTU of the
//! VlanConfig named by `mtu-source-vlanconfig`. Changes make the changed
//! VlanConfig the source unless the value already agrees; removing the source
//! elects a replacement among the survivors.

use kube::ResourceExt;
use netplane_core::{
    crds::ClusterNetworkSpec,
    mtu::{self, DEFAULT_MTU},
    ClusterNetwork, VlanConfig,
};
use tracing::{debug, info, instrument};

use super::ManagerHandler;
use crate::controllers::ReconcileError;

/// MTU a VlanConfig puts on its uplink: its declared value when valid and
/// nonzero, the default otherwise.
pub fn effective_mtu(vc: &VlanConfig) -> u32 {
    let declared = vc.mtu();
    if mtu::is_valid_mtu(declared) {
        mtu::default_if_zero(declared)
    } else {
        DEFAULT_MTU
    }
}

/// Pick the new MTU source: the first candidate declaring a valid nonzero
/// MTU, else the first one leaving it unset.
pub fn elect_source<'a, I>(candidates: I) -> Option<&'a VlanConfig>
where
    I: IntoIterator<Item = &'a VlanConfig>,
{
    let mut fallback = None;
    for vc in candidates {
        let declared = vc.mtu();
        if declared != 0 && mtu::is_valid_mtu(declared) {
            return Some(vc);
        }
        if declared == 0 && fallback.is_none() {
            fallback = Some(vc);
        }
    }
    fallback
}

impl ManagerHandler {
    /// Create the VlanConfig's ClusterNetwork if needed and bring its MTU
    /// annotations in line with this VlanConfig.
    #[instrument(skip_all, fields(vlan_config = %vc.name_any(), cluster_network = %vc.spec.cluster_network))]
    pub async fn ensure_cluster_network(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        if vc.is_deleting() {
            return Ok(());
        }
        let name = vc.name_any();
        let target = effective_mtu(vc);

        let Some(mut cn) = self
            .store
            .get_cluster_network(&vc.spec.cluster_network)
            .await?
        else {
            let mut cn = ClusterNetwork::new(&vc.spec.cluster_network, ClusterNetworkSpec::default());
            cn.set_mtu_source(&name, target);
            self.store.create_cluster_network(&cn).await?;
            info!(mtu = target, "created cluster network");
            return Ok(());
        };

        let current = cn.uplink_mtu().and_then(|raw| mtu::parse_mtu(raw).ok());
        if current.is_some_and(|current| mtu::are_equal_mtus(current, target)) {
            debug!(mtu = target, "uplink MTU already in sync");
            return Ok(());
        }

        cn.set_mtu_source(&name, target);
        self.store.replace_cluster_network(&cn).await?;
        info!(mtu = target, "updated uplink MTU");
        Ok(())
    }

    /// Re-elect the MTU source when the VlanConfig holding it goes away.
    #[instrument(skip_all, fields(vlan_config = %vc.name_any(), cluster_network = %vc.spec.cluster_network))]
    pub async fn on_vlan_config_remove(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        let name = vc.name_any();
        let cluster_network = &vc.spec.cluster_network;

        let Some(mut cn) = self.store.get_cluster_network(cluster_network).await? else {
            return Ok(());
        };
        if cn.mtu_source() != Some(name.as_str()) {
            return Ok(());
        }

        let remaining: Vec<VlanConfig> = self
            .store
            .list_vlan_configs()
            .await?
            .into_iter()
            .filter(|other| {
                other.spec.cluster_network == *cluster_network
                    && other.name_any() != name
                    && !other.is_deleting()
            })
            .collect();

        match elect_source(&remaining) {
            Some(source) => {
                let mtu = effective_mtu(source);
                cn.set_mtu_source(&source.name_any(), mtu);
                info!(source = %source.name_any(), mtu, "re-elected MTU source");
            }
            None => {
                cn.clear_mtu_source();
                info!("no vlanconfig left, cleared uplink MTU");
            }
        }
        self.store.replace_cluster_network(&cn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::vlan_config;
    use crate::store::{MemoryStore, ObjectStore};
    use std::sync::Arc;

    struct Harness {
        store: Arc<MemoryStore>,
        manager: ManagerHandler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        Harness {
            manager: ManagerHandler::new(store.clone()),
            store,
        }
    }

    impl Harness {
        async fn apply(&self, name: &str, mtu: u32) {
            let vc = self
                .store
                .apply_vlan_config(vlan_config(name, "storage", mtu, None))
                .await;
            self.manager.ensure_cluster_network(&vc).await.unwrap();
        }

        /// Delete `name` and run the removal handler against the marked object.
        async fn delete(&self, name: &str) {
            let vc = self.store.get_vlan_config(name).await.unwrap();
            self.store
                .add_vlan_config_finalizer(&vc, "test/manager")
                .await
                .unwrap();
            let deleting = self.store.delete_vlan_config(name).await.unwrap();
            self.manager.on_vlan_config_remove(&deleting).await.unwrap();
            self.store
                .remove_vlan_config_finalizer(&deleting, "test/manager")
                .await
                .unwrap();
        }

        async fn annotations(&self) -> (Option<String>, Option<String>) {
            let cn = self
                .store
                .get_cluster_network("storage")
                .await
                .unwrap()
                .unwrap();
            (
                cn.uplink_mtu().map(str::to_string),
                cn.mtu_source().map(str::to_string),
            )
        }
    }

    fn pair(mtu: &str, source: &str) -> (Option<String>, Option<String>) {
        (Some(mtu.to_string()), Some(source.to_string()))
    }

    #[test]
    fn test_effective_mtu() {
        assert_eq!(effective_mtu(&vlan_config("a", "n", 0, None)), 1500);
        assert_eq!(effective_mtu(&vlan_config("a", "n", 9000, None)), 9000);
        assert_eq!(effective_mtu(&vlan_config("a", "n", 100, None)), 1500);
    }

    #[test]
    fn test_elect_prefers_nonzero_mtu() {
        let candidates = vec![
            vlan_config("c", "n", 0, None),
            vlan_config("d", "n", 0, None),
            vlan_config("e", "n", 9000, None),
        ];
        assert_eq!(elect_source(&candidates).unwrap().name_any(), "e");

        let unset = vec![
            vlan_config("c", "n", 0, None),
            vlan_config("d", "n", 0, None),
        ];
        assert_eq!(elect_source(&unset).unwrap().name_any(), "c");

        let invalid = vec![vlan_config("f", "n", 100, None)];
        assert!(elect_source(&invalid).is_none());
        assert!(elect_source(&Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_source_follows_changes_and_deletions() {
        let h = harness();
        h.apply("a", 0).await;
        assert_eq!(h.annotations().await, pair("1500", "a"));

        h.apply("b", 9000).await;
        assert_eq!(h.annotations().await, pair("9000", "b"));

        h.delete("b").await;
        assert_eq!(h.annotations().await, pair("1500", "a"));

        h.delete("a").await;
        assert_eq!(h.annotations().await, (None, None));
    }

    #[tokio::test]
    async fn test_equal_mtu_keeps_source() {
        let h = harness();
        h.apply("a", 0).await;
        let before = h.store.get_cluster_network("storage").await.unwrap().unwrap();

        // 1500 and unset are the same effective MTU.
        h.apply("b", 1500).await;
        assert_eq!(h.annotations().await, pair("1500", "a"));
        let after = h.store.get_cluster_network("storage").await.unwrap().unwrap();
        assert_eq!(before.resource_version(), after.resource_version());
    }

    #[tokio::test]
    async fn test_removing_non_source_changes_nothing() {
        let h = harness();
        h.apply("a", 0).await;
        h.apply("b", 9000).await;

        h.delete("a").await;
        assert_eq!(h.annotations().await, pair("9000", "b"));
    }

    #[tokio::test]
    async fn test_reelection_tie_break() {
        let h = harness();
        h.apply("c", 0).await;
        h.apply("d", 0).await;
        h.apply("e", 9000).await;
        h.apply("s", 1280).await;
        assert_eq!(h.annotations().await, pair("1280", "s"));

        h.delete("s").await;
        assert_eq!(h.annotations().await, pair("9000", "e"));
    }

    #[tokio::test]
    async fn test_unparsable_annotation_is_rewritten() {
        let h = harness();
        h.apply("a", 0).await;
        let mut cn = h.store.get_cluster_network("storage").await.unwrap().unwrap();
        cn.annotations_mut().insert(
            netplane_core::keys::UPLINK_MTU.to_string(),
            "jumbo".to_string(),
        );
        h.store.replace_cluster_network(&cn).await.unwrap();

        h.apply("a", 0).await;
        assert_eq!(h.annotations().await, pair("1500", "a"));
    }

    #[tokio::test]
    async fn test_other_cluster_networks_are_not_candidates() {
        let h = harness();
        h.apply("a", 9000).await;
        let other = h
            .store
            .apply_vlan_config(vlan_config("z", "mgmt", 0, None))
            .await;
        h.manager.ensure_cluster_network(&other).await.unwrap();

        h.delete("a").await;
        assert_eq!(h.annotations().await, (None, None));
        let mgmt = h.store.get_cluster_network("mgmt").await.unwrap().unwrap();
        assert_eq!(mgmt.mtu_source(), Some("z"));
    }
}
