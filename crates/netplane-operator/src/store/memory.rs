//! In-process object store
//!
//! Mirrors the API server rules the handlers depend on: names are unique per
//! kind, every write bumps a cluster-wide resource version, replaces carrying
//! a stale resource version fail with a conflict, status and metadata are
//! written separately, and objects holding finalizers are only marked for
//! deletion. Lists come back in name order.

use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Node, apimachinery::pkg::apis::meta::v1::Time, chrono::Utc};
use kube::{Resource, ResourceExt};
use netplane_core::crds::{ClusterNetwork, NetworkAttachmentDefinition, VlanConfig, VlanStatus};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{ObjectStore, StoreError};

#[derive(Default)]
struct Objects {
    revision: u64,
    nodes: BTreeMap<String, Node>,
    vlan_configs: BTreeMap<String, VlanConfig>,
    cluster_networks: BTreeMap<String, ClusterNetwork>,
    vlan_statuses: BTreeMap<String, VlanStatus>,
    attachments: BTreeMap<String, NetworkAttachmentDefinition>,
    failing_node_writes: usize,
}

impl Objects {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// [`ObjectStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Objects>,
}

fn name_of<K: Resource>(obj: &K, kind: &'static str) -> Result<String, StoreError> {
    obj.meta().name.clone().ok_or(StoreError::Unnamed { kind })
}

fn stamp<K: Resource>(obj: &mut K, version: String) {
    let meta = obj.meta_mut();
    if meta.uid.is_none() {
        meta.uid = Some(format!("uid-{version}"));
    }
    meta.resource_version = Some(version);
}

fn create<K: Resource + Clone>(
    map: &mut BTreeMap<String, K>,
    obj: &K,
    kind: &'static str,
    version: String,
) -> Result<K, StoreError> {
    let name = name_of(obj, kind)?;
    if map.contains_key(&name) {
        return Err(StoreError::AlreadyExists { kind, name });
    }
    let mut created = obj.clone();
    created.meta_mut().uid = None;
    stamp(&mut created, version);
    map.insert(name, created.clone());
    Ok(created)
}

/// Optimistic replace; `merge` builds the stored object from (current, incoming).
fn replace<K: Resource + Clone>(
    map: &mut BTreeMap<String, K>,
    obj: &K,
    kind: &'static str,
    version: String,
    merge: impl FnOnce(&K, &K) -> K,
) -> Result<K, StoreError> {
    let name = name_of(obj, kind)?;
    let current = map
        .get(&name)
        .ok_or_else(|| StoreError::NotFound {
            kind,
            name: name.clone(),
        })?;
    if obj.meta().resource_version != current.meta().resource_version {
        return Err(StoreError::Conflict { kind, name });
    }
    let mut replaced = merge(current, obj);
    replaced.meta_mut().uid = current.meta().uid.clone();
    stamp(&mut replaced, version);
    map.insert(name, replaced.clone());
    Ok(replaced)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a VlanConfig regardless of its resource version,
    /// like `kubectl apply`. Finalizers already held are preserved.
    pub async fn apply_vlan_config(&self, vc: VlanConfig) -> VlanConfig {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        let name = vc.name_any();
        let mut stored = vc;
        if let Some(current) = objects.vlan_configs.get(&name) {
            stored.metadata.uid = current.metadata.uid.clone();
            stored.metadata.finalizers = current.metadata.finalizers.clone();
            stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        }
        stamp(&mut stored, version);
        objects.vlan_configs.insert(name, stored.clone());
        stored
    }

    /// Delete a VlanConfig. One holding finalizers is only marked for deletion
    /// and returned; otherwise it is removed and `None` is returned.
    pub async fn delete_vlan_config(&self, name: &str) -> Option<VlanConfig> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        let vc = objects.vlan_configs.get_mut(name)?;
        if vc.finalizers().is_empty() {
            objects.vlan_configs.remove(name);
            return None;
        }
        if vc.metadata.deletion_timestamp.is_none() {
            vc.metadata.deletion_timestamp = Some(Time(Utc::now()));
            vc.metadata.resource_version = Some(version);
        }
        Some(vc.clone())
    }

    pub async fn get_vlan_config(&self, name: &str) -> Option<VlanConfig> {
        self.objects.lock().await.vlan_configs.get(name).cloned()
    }

    pub async fn insert_node(&self, node: Node) -> Node {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        let mut stored = node;
        stamp(&mut stored, version);
        objects.nodes.insert(stored.name_any(), stored.clone());
        stored
    }

    /// Make the next `count` node replaces fail with a conflict, as if another
    /// writer got there first.
    pub async fn fail_node_writes(&self, count: usize) {
        self.objects.lock().await.failing_node_writes = count;
    }

    pub async fn insert_attachment(&self, nad: NetworkAttachmentDefinition) {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        let mut stored = nad;
        stamp(&mut stored, version);
        let key = stored.qualified_name();
        objects.attachments.insert(key, stored);
    }

    pub async fn vlan_status_names(&self) -> Vec<String> {
        self.objects
            .lock()
            .await
            .vlan_statuses
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.objects.lock().await.nodes.get(name).cloned())
    }

    async fn replace_node(&self, node: &Node) -> Result<Node, StoreError> {
        let mut objects = self.objects.lock().await;
        if objects.failing_node_writes > 0 {
            objects.failing_node_writes -= 1;
            return Err(StoreError::Conflict {
                kind: "node",
                name: name_of(node, "node")?,
            });
        }
        let version = objects.next_version();
        replace(&mut objects.nodes, node, "node", version, |_, new| new.clone())
    }

    async fn list_vlan_configs(&self) -> Result<Vec<VlanConfig>, StoreError> {
        Ok(self
            .objects
            .lock()
            .await
            .vlan_configs
            .values()
            .cloned()
            .collect())
    }

    async fn add_vlan_config_finalizer(
        &self,
        vc: &VlanConfig,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        replace(&mut objects.vlan_configs, vc, "vlanconfig", version, |current, _| {
            let mut updated = current.clone();
            if !updated.has_finalizer(finalizer) {
                updated.finalizers_mut().push(finalizer.to_string());
            }
            updated
        })?;
        Ok(())
    }

    async fn remove_vlan_config_finalizer(
        &self,
        vc: &VlanConfig,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        let name = name_of(vc, "vlanconfig")?;
        if !objects.vlan_configs.contains_key(&name) {
            return Ok(());
        }
        let updated = replace(&mut objects.vlan_configs, vc, "vlanconfig", version, |current, _| {
            let mut updated = current.clone();
            updated.finalizers_mut().retain(|f| f != finalizer);
            updated
        })?;
        if updated.is_deleting() && updated.finalizers().is_empty() {
            objects.vlan_configs.remove(&name);
        }
        Ok(())
    }

    async fn get_cluster_network(&self, name: &str) -> Result<Option<ClusterNetwork>, StoreError> {
        Ok(self.objects.lock().await.cluster_networks.get(name).cloned())
    }

    async fn create_cluster_network(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        create(&mut objects.cluster_networks, cn, "clusternetwork", version)
    }

    async fn replace_cluster_network(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        replace(
            &mut objects.cluster_networks,
            cn,
            "clusternetwork",
            version,
            |current, new| ClusterNetwork {
                status: current.status.clone(),
                ..new.clone()
            },
        )
    }

    async fn replace_cluster_network_status(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        replace(
            &mut objects.cluster_networks,
            cn,
            "clusternetwork",
            version,
            |current, new| ClusterNetwork {
                status: new.status.clone(),
                ..current.clone()
            },
        )
    }

    async fn get_vlan_status(&self, name: &str) -> Result<Option<VlanStatus>, StoreError> {
        Ok(self.objects.lock().await.vlan_statuses.get(name).cloned())
    }

    async fn list_vlan_statuses(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<VlanStatus>, StoreError> {
        let objects = self.objects.lock().await;
        Ok(objects
            .vlan_statuses
            .values()
            .filter(|vs| {
                selector
                    .iter()
                    .all(|(k, v)| vs.labels().get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn create_vlan_status(&self, vs: &VlanStatus) -> Result<VlanStatus, StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        create(&mut objects.vlan_statuses, vs, "vlanstatus", version)
    }

    async fn replace_vlan_status(&self, vs: &VlanStatus) -> Result<VlanStatus, StoreError> {
        let mut objects = self.objects.lock().await;
        let version = objects.next_version();
        replace(&mut objects.vlan_statuses, vs, "vlanstatus", version, |_, new| {
            new.clone()
        })
    }

    async fn delete_vlan_status(&self, name: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().await;
        objects.next_version();
        match objects.vlan_statuses.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "vlanstatus",
                name: name.to_string(),
            }),
        }
    }

    async fn list_network_attachments(
        &self,
    ) -> Result<Vec<NetworkAttachmentDefinition>, StoreError> {
        Ok(self
            .objects
            .lock()
            .await
            .attachments
            .values()
            .cloned()
            .collect())
    }
}
