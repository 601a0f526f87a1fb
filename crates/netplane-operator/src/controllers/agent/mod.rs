//! Node agent
//!
//! Converges the bond and bridge of every cluster network this node is
//! selected for, and reports the result in a VlanStatus per VlanConfig.
//!
//! The agent marks VlanConfigs it has acted on with a per-node finalizer.
//! A VlanConfig without it was never set up on this node, so its removal
//! leaves the node's devices alone: they may belong to another VlanConfig
//! of the same cluster network. Holding the finalizer is not enough to tear
//! down either: a setup that failed before the node was labeled leaves the
//! finalizer behind, and another VlanConfig may have claimed the node since.
//! Devices are only torn down while the node's owner label is empty or
//! names the VlanConfig being removed.

mod ownership;
mod status;

use ownership::Ownership;

use kube::ResourceExt;
use netplane_core::{crds::attachment::AttachmentError, keys, naming, LocalArea, VlanConfig};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::ReconcileError;
use crate::{
    device::{self, DeviceController, UplinkConfig, VlanDevice},
    store::ObjectStore,
};

pub const FINALIZER_DOMAIN: &str = "agent.netplane.io";

pub struct AgentHandler {
    node_name: String,
    finalizer: String,
    store: Arc<dyn ObjectStore>,
    devices: Arc<dyn DeviceController>,
}

impl AgentHandler {
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        devices: Arc<dyn DeviceController>,
    ) -> Self {
        let node_name = node_name.into();
        Self {
            finalizer: format!("{FINALIZER_DOMAIN}/{node_name}"),
            node_name,
            store,
            devices,
        }
    }

    /// Finalizer this node holds on VlanConfigs it has set up.
    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    /// Handle a created or updated VlanConfig.
    #[instrument(skip_all, fields(vlan_config = %vc.name_any(), node = %self.node_name))]
    pub async fn on_change(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        if vc.is_deleting() {
            return Ok(());
        }
        let name = vc.name_any();

        let found = ownership::resolve(self.store.as_ref(), vc, &self.node_name).await?;
        match found.decide(&name) {
            Ownership::NotTarget => {
                if !vc.has_finalizer(&self.finalizer) {
                    return Ok(());
                }
                info!("node no longer selected, removing VLAN");
                self.remove_vlan(vc).await?;
                self.store
                    .remove_vlan_config_finalizer(vc, &self.finalizer)
                    .await?;
                Ok(())
            }
            Ownership::OwnedBy(owner) => {
                info!(
                    owner = %owner,
                    cluster_network = %vc.spec.cluster_network,
                    "cluster network already owned by another vlanconfig on this node"
                );
                if vc.has_finalizer(&self.finalizer) {
                    // Left over from a setup that never labeled the node.
                    self.remove_vlan(vc).await?;
                    self.store
                        .remove_vlan_config_finalizer(vc, &self.finalizer)
                        .await?;
                }
                Ok(())
            }
            Ownership::Proceed => {
                if !vc.has_finalizer(&self.finalizer) {
                    self.store
                        .add_vlan_config_finalizer(vc, &self.finalizer)
                        .await?;
                }
                self.setup_vlan(vc).await
            }
        }
    }

    /// Handle a VlanConfig being deleted.
    #[instrument(skip_all, fields(vlan_config = %vc.name_any(), node = %self.node_name))]
    pub async fn on_remove(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        if !vc.has_finalizer(&self.finalizer) {
            return Ok(());
        }
        info!("vlanconfig deleted, removing VLAN");
        self.remove_vlan(vc).await?;
        self.store
            .remove_vlan_config_finalizer(vc, &self.finalizer)
            .await?;
        Ok(())
    }

    async fn setup_vlan(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        let built = self.build_devices(vc).await;

        let outcome = built.as_ref().map_err(ToString::to_string);
        if let Err(source) =
            status::upsert(self.store.as_ref(), vc, &self.node_name, outcome.clone()).await
        {
            return Err(ReconcileError::Status {
                name: naming::status_name(&vc.name_any(), &self.node_name),
                source,
                cause: outcome.err(),
            });
        }

        if let Err(source) = built {
            return Err(ReconcileError::Setup {
                vlan_config: vc.name_any(),
                node: self.node_name.clone(),
                source: Box::new(source),
            });
        }
        self.set_node_labels(vc).await
    }

    async fn build_devices(&self, vc: &VlanConfig) -> Result<VlanDevice, ReconcileError> {
        let cluster_network = vc.spec.cluster_network.clone();
        let local_areas = self.local_areas(&cluster_network).await?;
        let uplink = UplinkConfig::from(vc);

        let device = device::run_blocking(&self.devices, move |devices| {
            device::setup_vlan(devices, &cluster_network, &uplink, &local_areas)
        })
        .await?;
        debug!(
            bridge = %device.bridge.name,
            uplink = %device.uplink.name,
            local_areas = device.local_areas.len(),
            "VLAN devices ready"
        );
        Ok(device)
    }

    /// Local areas of every bridge attachment riding on the cluster
    /// network's bridge, deduplicated.
    async fn local_areas(&self, cluster_network: &str) -> Result<Vec<LocalArea>, ReconcileError> {
        let bridge = naming::bridge_name(cluster_network);
        let mut areas = Vec::new();
        for nad in self.store.list_network_attachments().await? {
            match nad.local_area_on(&bridge) {
                Ok(Some(area)) => areas.push(area),
                Ok(None) => {}
                // Unparsable configs may belong to any CNI plugin.
                Err(e @ AttachmentError::Config { .. }) => {
                    warn!(error = %e, "skipping attachment");
                }
                Err(e) => return Err(e.into()),
            }
        }
        areas.sort();
        areas.dedup();
        Ok(areas)
    }

    async fn remove_vlan(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        if let Some(owner) = self.node_owner().await? {
            if owner != vc.name_any() {
                info!(owner = %owner, "devices owned by another vlanconfig, keeping them");
                return self.remove_status(vc, None).await;
            }
        }

        let cluster_network = vc.spec.cluster_network.clone();
        let teardown =
            match device::run_blocking(&self.devices, move |d| d.teardown(&cluster_network)).await {
                Err(e) if e.is_not_found() => {
                    debug!("VLAN devices already absent");
                    Ok(())
                }
                other => other,
            };

        let labels = self.remove_node_labels(vc).await;
        self.remove_status(vc, teardown.as_ref().err().map(ToString::to_string))
            .await?;

        teardown.map_err(|source| ReconcileError::Teardown {
            vlan_config: vc.name_any(),
            node: self.node_name.clone(),
            source,
        })?;
        labels
    }

    async fn remove_status(
        &self,
        vc: &VlanConfig,
        cause: Option<String>,
    ) -> Result<(), ReconcileError> {
        status::remove(self.store.as_ref(), vc, &self.node_name, cause.clone())
            .await
            .map_err(|source| ReconcileError::Status {
                name: naming::status_name(&vc.name_any(), &self.node_name),
                source,
                cause,
            })
    }

    /// VlanConfig named by the node's owner label, if any.
    async fn node_owner(&self) -> Result<Option<String>, ReconcileError> {
        let node = self.store.get_node(&self.node_name).await?;
        Ok(node
            .and_then(|n| n.labels().get(keys::VLAN_CONFIG).cloned())
            .filter(|owner| !owner.is_empty()))
    }

    async fn set_node_labels(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        let name = vc.name_any();
        let available = keys::network_available(&vc.spec.cluster_network);

        let mut node = self
            .store
            .get_node(&self.node_name)
            .await?
            .ok_or_else(|| ReconcileError::NodeNotFound(self.node_name.clone()))?;
        let labels = node.labels();
        if labels.get(&available).map(String::as_str) == Some(keys::VALUE_TRUE)
            && labels.get(keys::VLAN_CONFIG) == Some(&name)
        {
            return Ok(());
        }

        let labels = node.labels_mut();
        labels.insert(available, keys::VALUE_TRUE.to_string());
        labels.insert(keys::VLAN_CONFIG.to_string(), name);
        self.store
            .replace_node(&node)
            .await
            .map_err(|source| ReconcileError::NodeLabels {
                node: self.node_name.clone(),
                source,
            })?;
        Ok(())
    }

    /// Clear the ownership labels if they point at `vc`.
    async fn remove_node_labels(&self, vc: &VlanConfig) -> Result<(), ReconcileError> {
        let name = vc.name_any();
        let Some(mut node) = self.store.get_node(&self.node_name).await? else {
            return Ok(());
        };
        if node.labels().get(keys::VLAN_CONFIG) != Some(&name) {
            return Ok(());
        }

        let labels = node.labels_mut();
        labels.remove(keys::VLAN_CONFIG);
        labels.remove(&keys::network_available(&vc.spec.cluster_network));
        self.store
            .replace_node(&node)
            .await
            .map_err(|source| ReconcileError::NodeLabels {
                node: self.node_name.clone(),
                source,
            })?;
        Ok(())
    }
}
