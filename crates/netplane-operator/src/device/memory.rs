//! In-memory device driver
//!
//! Models links, bond/bridge membership and bridge-port VLANs without touching
//! the host. Used for dry runs (`--driver memory`) and by the test suite,
//! which also relies on its call counters and failure injection.

use netplane_core::{
    crds::{LinkStatus, LocalArea},
    mtu::DEFAULT_MTU,
    naming,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
};
use strum::Display;

use super::{BridgeHandle, DeviceController, DeviceError, LinkHandle, UplinkConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceOp {
    EnsureUplink,
    EnsureBridge,
    Teardown,
    ListLocalAreas,
    LinkSummary,
}

#[derive(Clone, Debug)]
struct Link {
    index: u32,
    kind: &'static str,
    master: Option<String>,
    promisc: bool,
    mtu: u32,
    tx_qlen: u32,
    mac: String,
    vids: BTreeSet<u16>,
}

#[derive(Default)]
struct State {
    next_index: u32,
    links: BTreeMap<String, Link>,
    calls: BTreeMap<DeviceOp, usize>,
    failures: BTreeMap<DeviceOp, String>,
}

impl State {
    fn record(&mut self, op: DeviceOp) -> Result<(), DeviceError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get(&op) {
            Some(message) => Err(DeviceError::Rejected(message.clone())),
            None => Ok(()),
        }
    }

    fn ensure_link(&mut self, name: &str, kind: &'static str) -> &mut Link {
        let next_index = &mut self.next_index;
        self.links.entry(name.to_string()).or_insert_with(|| {
            *next_index += 1;
            let index = *next_index;
            Link {
                index,
                kind,
                master: None,
                promisc: false,
                mtu: DEFAULT_MTU,
                tx_qlen: 1000,
                mac: format!("02:00:00:00:{:02x}:{:02x}", index >> 8, index & 0xff),
                vids: BTreeSet::new(),
            }
        })
    }
}

/// [`DeviceController`] keeping all links in memory.
#[derive(Default)]
pub struct MemoryDevices {
    state: Mutex<State>,
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent `op` fail with `message`.
    pub fn fail(&self, op: DeviceOp, message: impl Into<String>) {
        self.state().failures.insert(op, message.into());
    }

    pub fn clear_failure(&self, op: DeviceOp) {
        self.state().failures.remove(&op);
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: DeviceOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.state().links.contains_key(name)
    }

    pub fn master_of(&self, name: &str) -> Option<String> {
        self.state().links.get(name).and_then(|l| l.master.clone())
    }

    pub fn mtu_of(&self, name: &str) -> Option<u32> {
        self.state().links.get(name).map(|l| l.mtu)
    }

    pub fn tx_qlen_of(&self, name: &str) -> Option<u32> {
        self.state().links.get(name).map(|l| l.tx_qlen)
    }
}

impl DeviceController for MemoryDevices {
    fn ensure_uplink(&self, config: &UplinkConfig) -> Result<LinkHandle, DeviceError> {
        let mut state = self.state();
        state.record(DeviceOp::EnsureUplink)?;

        for nic in &config.nics {
            state.ensure_link(nic, "device").master = Some(config.name.clone());
        }
        let bond = state.ensure_link(&config.name, "bond");
        if let Some(mtu) = config.mtu {
            bond.mtu = mtu;
        }
        if let Some(tx_qlen) = config.tx_qlen {
            bond.tx_qlen = tx_qlen;
        }
        if let Some(mac) = config.hardware_addr {
            bond.mac = mac.to_string().to_lowercase();
        }

        Ok(LinkHandle {
            name: config.name.clone(),
            index: bond.index,
        })
    }

    fn ensure_bridge(
        &self,
        name: &str,
        uplink: &LinkHandle,
        local_areas: &[LocalArea],
    ) -> Result<BridgeHandle, DeviceError> {
        let mut state = self.state();
        state.record(DeviceOp::EnsureBridge)?;

        if !state.links.contains_key(&uplink.name) {
            return Err(DeviceError::NotFound(uplink.name.clone()));
        }
        let index = state.ensure_link(name, "bridge").index;
        let port = state.ensure_link(&uplink.name, "bond");
        port.master = Some(name.to_string());
        // The kernel switches bridge ports to promiscuous mode.
        port.promisc = true;
        port.vids = local_areas
            .iter()
            .filter(|la| la.vid != 0)
            .map(|la| la.vid)
            .collect();

        Ok(BridgeHandle {
            link: LinkHandle {
                name: name.to_string(),
                index,
            },
            uplink: uplink.clone(),
            local_areas: local_areas.to_vec(),
        })
    }

    fn teardown(&self, cluster_network: &str) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.record(DeviceOp::Teardown)?;

        let bridge = naming::bridge_name(cluster_network);
        let bond = naming::bond_name(cluster_network);
        let removed_bridge = state.links.remove(&bridge).is_some();
        let removed_bond = state.links.remove(&bond).is_some();
        if !removed_bridge && !removed_bond {
            return Err(DeviceError::NotFound(bridge));
        }
        for link in state.links.values_mut() {
            if link.master.as_deref() == Some(bond.as_str()) {
                link.master = None;
            }
        }
        Ok(())
    }

    fn list_local_areas(&self, bridge: &BridgeHandle) -> Result<Vec<LocalArea>, DeviceError> {
        let mut state = self.state();
        state.record(DeviceOp::ListLocalAreas)?;

        let port = state
            .links
            .get(&bridge.uplink.name)
            .ok_or_else(|| DeviceError::NotFound(bridge.uplink.name.clone()))?;
        let mut areas: Vec<LocalArea> = bridge
            .local_areas
            .iter()
            .filter(|la| la.vid == 0 || port.vids.contains(&la.vid))
            .cloned()
            .collect();
        areas.sort();
        Ok(areas)
    }

    fn link_summary(&self, link: &LinkHandle) -> Result<LinkStatus, DeviceError> {
        let mut state = self.state();
        state.record(DeviceOp::LinkSummary)?;

        let found = state
            .links
            .get(&link.name)
            .ok_or_else(|| DeviceError::NotFound(link.name.clone()))?;
        let master_index = found
            .master
            .as_ref()
            .and_then(|m| state.links.get(m))
            .map(|m| m.index)
            .unwrap_or(0);

        Ok(LinkStatus {
            name: link.name.clone(),
            index: found.index,
            type_: found.kind.to_string(),
            mac: found.mac.clone(),
            promiscuous: found.promisc,
            state: "up".to_string(),
            master_index,
        })
    }
}
