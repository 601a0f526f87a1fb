//! Object store abstraction
//!
//! Handlers talk to the cluster only through [`ObjectStore`] so the same
//! reconciliation logic runs against the API server ([`KubeStore`]) and
//! against the in-process [`MemoryStore`] used by tests and dry runs.

mod kubernetes;
mod memory;

pub use kubernetes::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use netplane_core::crds::{ClusterNetwork, NetworkAttachmentDefinition, VlanConfig, VlanStatus};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("{kind} {name} has been modified, please apply the change to the latest version")]
    Conflict { kind: &'static str, name: String },
    #[error("{kind} has no name")]
    Unnamed { kind: &'static str },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Typed access to the objects the control plane reads and writes.
///
/// `get_*` return `Ok(None)` for missing objects. Every `replace_*` is an
/// optimistic write: it fails with [`StoreError::Conflict`] when the object's
/// resource version is stale.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError>;

    async fn replace_node(&self, node: &Node) -> Result<Node, StoreError>;

    async fn list_vlan_configs(&self) -> Result<Vec<VlanConfig>, StoreError>;

    async fn add_vlan_config_finalizer(
        &self,
        vc: &VlanConfig,
        finalizer: &str,
    ) -> Result<(), StoreError>;

    async fn remove_vlan_config_finalizer(
        &self,
        vc: &VlanConfig,
        finalizer: &str,
    ) -> Result<(), StoreError>;

    async fn get_cluster_network(&self, name: &str) -> Result<Option<ClusterNetwork>, StoreError>;

    async fn create_cluster_network(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError>;

    /// Replace metadata and spec.
    async fn replace_cluster_network(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError>;

    async fn replace_cluster_network_status(
        &self,
        cn: &ClusterNetwork,
    ) -> Result<ClusterNetwork, StoreError>;

    async fn get_vlan_status(&self, name: &str) -> Result<Option<VlanStatus>, StoreError>;

    /// VlanStatuses carrying every label in `selector`.
    async fn list_vlan_statuses(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<VlanStatus>, StoreError>;

    /// Create including status.
    async fn create_vlan_status(&self, vs: &VlanStatus) -> Result<VlanStatus, StoreError>;

    /// Replace metadata and status.
    async fn replace_vlan_status(&self, vs: &VlanStatus) -> Result<VlanStatus, StoreError>;

    async fn delete_vlan_status(&self, name: &str) -> Result<(), StoreError>;

    async fn list_network_attachments(
        &self,
    ) -> Result<Vec<NetworkAttachmentDefinition>, StoreError>;
}

/// Render a label selector in `k=v,k2=v2` form.
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
