//! Network device drivers
//!
//! The agent builds one bond (the uplink) and one VLAN-filtering bridge per
//! cluster network. [`DeviceController`] is the narrow, synchronous surface it
//! needs; calls may block on the kernel, so async code goes through
//! [`run_blocking`].

mod iproute2;
mod memory;

pub use iproute2::IpRoute2;
pub use memory::{DeviceOp, MemoryDevices};

use macaddr::MacAddr6;
use netplane_core::{
    crds::{BondMode, LinkStatus, LocalArea, VlanConfig},
    naming,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("link {0} not found")]
    NotFound(String),
    #[error("`{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected output from `{command}`: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Rejected(String),
    #[error("device task failed: {0}")]
    Task(String),
}

impl DeviceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeviceError::NotFound(_))
    }
}

/// Bond settings derived from a VlanConfig uplink. `None` keeps whatever the
/// kernel computed.
#[derive(Clone, Debug, PartialEq)]
pub struct UplinkConfig {
    pub name: String,
    pub nics: Vec<String>,
    pub mode: BondMode,
    pub miimon: Option<u32>,
    pub mtu: Option<u32>,
    pub tx_qlen: Option<u32>,
    pub hardware_addr: Option<MacAddr6>,
}

impl From<&VlanConfig> for UplinkConfig {
    fn from(vc: &VlanConfig) -> Self {
        let uplink = &vc.spec.uplink;
        let attrs = uplink.link_attributes.clone().unwrap_or_default();
        let bond = uplink.bond_options.clone().unwrap_or_default();
        let nonzero = |v: u32| (v != 0).then_some(v);

        Self {
            name: naming::bond_name(&vc.spec.cluster_network),
            nics: uplink.nics.clone(),
            mode: bond.mode,
            miimon: nonzero(bond.miimon),
            mtu: nonzero(attrs.mtu),
            tx_qlen: nonzero(attrs.tx_qlen),
            hardware_addr: attrs.hardware_addr,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkHandle {
    pub name: String,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeHandle {
    pub link: LinkHandle,
    pub uplink: LinkHandle,
    /// Local areas requested when the bridge was ensured.
    pub local_areas: Vec<LocalArea>,
}

/// Devices serving one cluster network on this node.
#[derive(Clone, Debug, PartialEq)]
pub struct VlanDevice {
    pub bridge: LinkStatus,
    pub uplink: LinkStatus,
    pub local_areas: Vec<LocalArea>,
}

/// Creates, reuses and removes the uplink bond and bridge of a cluster network.
///
/// Every operation is create-or-reuse, so repeating a call against devices
/// that already match is harmless.
pub trait DeviceController: Send + Sync {
    fn ensure_uplink(&self, config: &UplinkConfig) -> Result<LinkHandle, DeviceError>;

    fn ensure_bridge(
        &self,
        name: &str,
        uplink: &LinkHandle,
        local_areas: &[LocalArea],
    ) -> Result<BridgeHandle, DeviceError>;

    /// Remove the bridge and bond of `cluster_network`. Returns
    /// [`DeviceError::NotFound`] when neither exists.
    fn teardown(&self, cluster_network: &str) -> Result<(), DeviceError>;

    /// Local areas actually programmed on the bridge.
    fn list_local_areas(&self, bridge: &BridgeHandle) -> Result<Vec<LocalArea>, DeviceError>;

    fn link_summary(&self, link: &LinkHandle) -> Result<LinkStatus, DeviceError>;
}

/// Build the uplink, then the bridge over it, and report what was built.
pub fn setup_vlan(
    devices: &dyn DeviceController,
    cluster_network: &str,
    uplink: &UplinkConfig,
    local_areas: &[LocalArea],
) -> Result<VlanDevice, DeviceError> {
    let uplink = devices.ensure_uplink(uplink)?;
    let bridge = devices.ensure_bridge(&naming::bridge_name(cluster_network), &uplink, local_areas)?;

    Ok(VlanDevice {
        local_areas: devices.list_local_areas(&bridge)?,
        bridge: devices.link_summary(&bridge.link)?,
        uplink: devices.link_summary(&bridge.uplink)?,
    })
}

/// Run `op` on the blocking thread pool.
pub async fn run_blocking<T, F>(devices: &Arc<dyn DeviceController>, op: F) -> Result<T, DeviceError>
where
    F: FnOnce(&dyn DeviceController) -> Result<T, DeviceError> + Send + 'static,
    T: Send + 'static,
{
    let devices = Arc::clone(devices);
    tokio::task::spawn_blocking(move || op(devices.as_ref()))
        .await
        .map_err(|e| DeviceError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use netplane_core::crds::{BondOptions, LinkAttrs, Uplink, VlanConfigSpec};

    #[test]
    fn test_uplink_config_defaults() {
        let vc = VlanConfig::new(
            "vc1",
            VlanConfigSpec {
                cluster_network: "storage".to_string(),
                uplink: Uplink {
                    nics: vec!["eth1".to_string()],
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let config = UplinkConfig::from(&vc);
        assert_eq!(config.name, "storage-bo");
        assert_eq!(config.mode, BondMode::ActiveBackup);
        assert_eq!(config.miimon, None);
        assert_eq!(config.mtu, None);
        assert_eq!(config.tx_qlen, None);
        assert_eq!(config.hardware_addr, None);
    }

    #[test]
    fn test_uplink_config_applies_explicit_values() {
        let vc = VlanConfig::new(
            "vc1",
            VlanConfigSpec {
                cluster_network: "storage".to_string(),
                uplink: Uplink {
                    nics: vec!["eth1".to_string(), "eth2".to_string()],
                    link_attributes: Some(LinkAttrs {
                        mtu: 9000,
                        tx_qlen: 0,
                        hardware_addr: Some(MacAddr6::new(2, 0, 0, 0, 0, 1)),
                    }),
                    bond_options: Some(BondOptions {
                        mode: BondMode::Ieee8023ad,
                        miimon: 100,
                    }),
                },
                ..Default::default()
            },
        );

        let config = UplinkConfig::from(&vc);
        assert_eq!(config.mode, BondMode::Ieee8023ad);
        assert_eq!(config.miimon, Some(100));
        assert_eq!(config.mtu, Some(9000));
        assert_eq!(config.tx_qlen, None);
        assert_eq!(config.hardware_addr, Some(MacAddr6::new(2, 0, 0, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_setup_vlan_reports_devices() {
        let devices: Arc<dyn DeviceController> = Arc::new(MemoryDevices::new());
        let uplink = UplinkConfig {
            name: "storage-bo".to_string(),
            nics: vec!["eth1".to_string()],
            mode: BondMode::ActiveBackup,
            miimon: None,
            mtu: Some(9000),
            tx_qlen: None,
            hardware_addr: None,
        };
        let areas = vec![LocalArea {
            vid: 100,
            cidr: "10.0.100.0/24".to_string(),
        }];

        let device = run_blocking(&devices, move |d| setup_vlan(d, "storage", &uplink, &areas))
            .await
            .unwrap();

        assert_eq!(device.bridge.name, "storage-br");
        assert_eq!(device.bridge.type_, "bridge");
        assert_eq!(device.uplink.name, "storage-bo");
        assert_eq!(device.uplink.type_, "bond");
        assert_eq!(device.uplink.master_index, device.bridge.index);
        assert_eq!(device.local_areas.len(), 1);
    }
}
