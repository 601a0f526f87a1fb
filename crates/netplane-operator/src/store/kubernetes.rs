//! API-server backed object store

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use netplane_core::crds::{ClusterNetwork, NetworkAttachmentDefinition, VlanConfig, VlanStatus};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, fmt::Debug};
use tracing::debug;

use super::{label_selector, ObjectStore, StoreError};

/// [`ObjectStore`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

fn write_error(kind: &'static str, name: &str, creating: bool, err: kube::Error) -> StoreError {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && creating => StoreError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind,
            name: name.to_string(),
        },
        _ => StoreError::Kube(err),
    }
}

fn object_name<K: Resource>(obj: &K, kind: &'static str) -> Result<String, StoreError> {
    obj.meta().name.clone().ok_or(StoreError::Unnamed { kind })
}

async fn replace<K>(api: &Api<K>, obj: &K, kind: &'static str) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object_name(obj, kind)?;
    api.replace(&name, &PostParams::default(), obj)
        .await
        .map_err(|e| write_error(kind, &name, false, e))
}

async fn replace_status<K>(api: &Api<K>, obj: &K, kind: &'static str) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object_name(obj, kind)?;
    let data = serde_json::to_vec(obj)?;
    api.replace_status(&name, &PostParams::default(), data)
        .await
        .map_err(|e| write_error(kind, &name, false, e))
}

/// Merge patch of the finalizer list, guarded by the read resource version.
fn finalizer_patch(vc: &VlanConfig, finalizers: Vec<String>) -> serde_json::Value {
    let mut metadata = json!({ "finalizers": finalizers });
    if let Some(rv) = vc.resource_version() {
        metadata["resourceVersion"] = json!(rv);
    }
    json!({ "metadata": metadata })
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        self.api::<Node>()
            .get_opt(name)
            .await
            .map_err(StoreError::Kube)
    }

    async fn replace_node(&self, node: &Node) -> Result<Node, StoreError> {
        replace(&self.api(), node, "node").await
    }

    async fn list_vlan_configs(&self) -> Result<Vec<VlanConfig>, StoreError> {
        let list = self
            .api::<VlanConfig>()
            .list(&ListParams::default())
            .await
            .map_err(StoreError::Kube)?;
        Ok(list.items)
    }

    async fn add_vlan_config_finalizer(
        &self,
        vc: &VlanConfig,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        if vc.has_finalizer(finalizer) {
            return Ok(());
        }
        let name = object_name(vc, "vlanconfig")?;
        let mut finalizers = vc.finalizers().to_vec();
        finalizers.push(finalizer.to_string());

        debug!(name = %name, finalizer, "adding finalizer");
        self.api::<VlanConfig>()
            .patch(
                &name,
                &PatchParams::default(),
                &Patch::Merge(finalizer_patch(vc, finalizers)),
            )
            .await
            .map_err(|e| write_error("vlanconfig", &name, false, e))?;
        Ok(())
    }

    async fn remove_vlan_config_finalizer(
        &self,
        vc: &VlanConfig,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        if !vc.has_finalizer(finalizer) {
            return Ok(());
        }
        let name = object_name(vc, "vlanconfig")?;
        let finalizers: Vec<String> = vc
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();

        debug!(name = %name, finalizer, "removing finalizer");
        match self
            .api::<VlanConfig>()
            .patch(
                &name,
                &PatchParams::default(),
                &Patch::Merge(finalizer_patch(vc, finalizers)),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Already gone: nothing left to release.
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(write_error("vlanconfig", &name, false, e)),
        }
    }

    async fn get_cluster_network(&self, name: &str) -> Result<Option<ClusterNetwork>, StoreError> {
        self.api::<ClusterNetwork>()
            .get_opt(name)
            .await
            .map_err(StoreError::Kube)
    }

    async fn create_cluster_network(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError> {
        let name = object_name(cn, "clusternetwork")?;
        self.api::<ClusterNetwork>()
            .create(&PostParams::default(), cn)
            .await
            .map_err(|e| write_error("clusternetwork", &name, true, e))
    }

    async fn replace_cluster_network(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError> {
        replace(&self.api(), cn, "clusternetwork").await
    }

    async fn replace_cluster_network_status(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError> {
        replace_status(&self.api(), cn, "clusternetwork").await
    }

    async fn get_vlan_status(&self, name: &str) -> Result<Option<VlanStatus>, StoreError> {
        self.api::<VlanStatus>()
            .get_opt(name)
            .await
            .map_err(StoreError::Kube)
    }

    async fn list_vlan_statuses(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<VlanStatus>, StoreError> {
        let params = ListParams::default().labels(&label_selector(selector));
        let list = self
            .api::<VlanStatus>()
            .list(&params)
            .await
            .map_err(StoreError::Kube)?;
        Ok(list.items)
    }

    async fn create_vlan_status(&self, vs: &VlanStatus) -> Result<VlanStatus, StoreError> {
        let name = object_name(vs, "vlanstatus")?;
        let api = self.api::<VlanStatus>();
        // The status subresource is dropped on create; write it separately.
        let mut created = api
            .create(&PostParams::default(), vs)
            .await
            .map_err(|e| write_error("vlanstatus", &name, true, e))?;
        if vs.status.is_none() {
            return Ok(created);
        }
        created.status = vs.status.clone();
        replace_status(&api, &created, "vlanstatus").await
    }

    async fn replace_vlan_status(&self, vs: &VlanStatus) -> Result<VlanStatus, StoreError> {
        let api = self.api::<VlanStatus>();
        let mut replaced = replace(&api, vs, "vlanstatus").await?;
        replaced.status = vs.status.clone();
        replace_status(&api, &replaced, "vlanstatus").await
    }

    async fn delete_vlan_status(&self, name: &str) -> Result<(), StoreError> {
        self.api::<VlanStatus>()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| write_error("vlanstatus", name, false, e))?;
        Ok(())
    }

    async fn list_network_attachments(
        &self,
    ) -> Result<Vec<NetworkAttachmentDefinition>, StoreError> {
        let list = self
            .api::<NetworkAttachmentDefinition>()
            .list(&ListParams::default())
            .await
            .map_err(StoreError::Kube)?;
        Ok(list.items)
    }
}
