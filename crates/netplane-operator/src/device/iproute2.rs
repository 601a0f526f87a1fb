//! iproute2 device driver
//!
//! Drives the host network stack through the `ip` and `bridge` commands and
//! reads state back from their JSON output.

use netplane_core::{
    crds::{LinkStatus, LocalArea},
    naming,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info};

use super::{BridgeHandle, DeviceController, DeviceError, LinkHandle, UplinkConfig};

/// Link as reported by `ip -json -details link show`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    address: String,
    #[serde(default)]
    operstate: String,
    #[serde(default)]
    master: Option<String>,
    #[serde(default)]
    link_type: String,
    #[serde(default)]
    promiscuity: u32,
    #[serde(default)]
    linkinfo: Option<LinkInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
struct LinkInfo {
    #[serde(default)]
    info_kind: String,
}

impl IpLink {
    fn kind(&self) -> &str {
        match &self.linkinfo {
            Some(info) if !info.info_kind.is_empty() => &info.info_kind,
            _ => &self.link_type,
        }
    }

    fn is_promiscuous(&self) -> bool {
        self.promiscuity > 0 || self.flags.iter().any(|f| f == "PROMISC")
    }

    fn handle(&self) -> LinkHandle {
        LinkHandle {
            name: self.ifname.clone(),
            index: self.ifindex,
        }
    }
}

/// Port entry of `bridge -json vlan show`.
#[derive(Clone, Debug, Default, Deserialize)]
struct BridgePort {
    #[serde(default)]
    ifname: String,
    #[serde(default)]
    vlans: Vec<BridgeVlan>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct BridgeVlan {
    vlan: u16,
    #[serde(default, rename = "vlanEnd")]
    vlan_end: Option<u16>,
}

/// [`DeviceController`] backed by iproute2.
#[derive(Clone, Debug)]
pub struct IpRoute2 {
    ip: PathBuf,
    bridge: PathBuf,
}

impl Default for IpRoute2 {
    fn default() -> Self {
        Self::new("ip", "bridge")
    }
}

impl IpRoute2 {
    pub fn new(ip: impl Into<PathBuf>, bridge: impl Into<PathBuf>) -> Self {
        Self {
            ip: ip.into(),
            bridge: bridge.into(),
        }
    }

    fn run(&self, program: &Path, args: &[String]) -> Result<String, DeviceError> {
        let command = format!("{} {}", program.display(), args.join(" "));
        debug!(%command, "running");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| DeviceError::Io {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_missing_device(&stderr) {
                return Err(DeviceError::NotFound(stderr));
            }
            return Err(DeviceError::Command {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn ip(&self, args: Vec<String>) -> Result<String, DeviceError> {
        self.run(&self.ip, &args)
    }

    fn show_link(&self, name: &str) -> Result<Option<IpLink>, DeviceError> {
        let args = args(&["-json", "-details", "link", "show", "dev", name]);
        match self.ip(args) {
            Ok(out) => Ok(parse_json::<Vec<IpLink>>("ip link show", &out)?
                .into_iter()
                .next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn require_link(&self, name: &str) -> Result<IpLink, DeviceError> {
        self.show_link(name)?
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    fn set_link(&self, name: &str, settings: &[&str]) -> Result<(), DeviceError> {
        let mut args = args(&["link", "set", "dev", name]);
        args.extend(settings.iter().map(|s| s.to_string()));
        self.ip(args).map(drop)
    }

    fn enslave(&self, name: &str, master: &str) -> Result<(), DeviceError> {
        let link = self.require_link(name)?;
        if link.master.as_deref() == Some(master) {
            return Ok(());
        }
        info!(link = %name, master = %master, "attaching link");
        // Bond slaves must be down while being enslaved.
        self.set_link(name, &["down"])?;
        self.set_link(name, &["master", master])?;
        self.set_link(name, &["up"])
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("does not exist") || stderr.contains("Cannot find device")
}

fn parse_json<T: DeserializeOwned>(command: &str, out: &str) -> Result<T, DeviceError> {
    serde_json::from_str(out).map_err(|source| DeviceError::Parse {
        command: command.to_string(),
        source,
    })
}

fn bond_add_args(config: &UplinkConfig) -> Vec<String> {
    let mut args = args(&["link", "add", "name", &config.name, "type", "bond"]);
    args.push("mode".to_string());
    args.push(config.mode.to_string());
    if let Some(miimon) = config.miimon {
        args.push("miimon".to_string());
        args.push(miimon.to_string());
    }
    args
}

fn link_attr_args(config: &UplinkConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(mtu) = config.mtu {
        args.push("mtu".to_string());
        args.push(mtu.to_string());
    }
    if let Some(tx_qlen) = config.tx_qlen {
        args.push("txqueuelen".to_string());
        args.push(tx_qlen.to_string());
    }
    if let Some(mac) = config.hardware_addr {
        args.push("address".to_string());
        args.push(mac.to_string().to_lowercase());
    }
    args
}

/// VLAN ids configured on `port` in `bridge -json vlan show` output.
fn port_vids(ports: &[BridgePort], port: &str) -> BTreeSet<u16> {
    ports
        .iter()
        .filter(|p| p.ifname == port)
        .flat_map(|p| p.vlans.iter())
        .flat_map(|v| v.vlan..=v.vlan_end.unwrap_or(v.vlan))
        .collect()
}

impl DeviceController for IpRoute2 {
    fn ensure_uplink(&self, config: &UplinkConfig) -> Result<LinkHandle, DeviceError> {
        if self.show_link(&config.name)?.is_none() {
            info!(bond = %config.name, mode = %config.mode, "creating bond");
            self.ip(bond_add_args(config))?;
        }
        for nic in &config.nics {
            self.enslave(nic, &config.name)?;
        }

        let attrs = link_attr_args(config);
        if !attrs.is_empty() {
            let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();
            self.set_link(&config.name, &attrs)?;
        }
        self.set_link(&config.name, &["up"])?;

        Ok(self.require_link(&config.name)?.handle())
    }

    fn ensure_bridge(
        &self,
        name: &str,
        uplink: &LinkHandle,
        local_areas: &[LocalArea],
    ) -> Result<BridgeHandle, DeviceError> {
        if self.show_link(name)?.is_none() {
            info!(bridge = %name, "creating bridge");
            self.ip(args(&[
                "link",
                "add",
                "name",
                name,
                "type",
                "bridge",
                "vlan_filtering",
                "1",
            ]))?;
        }
        self.set_link(name, &["up"])?;
        self.enslave(&uplink.name, name)?;

        for la in local_areas.iter().filter(|la| la.vid != 0) {
            let vid = la.vid.to_string();
            self.run(
                &self.bridge,
                &args(&["vlan", "add", "vid", &vid, "dev", &uplink.name]),
            )?;
        }

        Ok(BridgeHandle {
            link: self.require_link(name)?.handle(),
            uplink: self.require_link(&uplink.name)?.handle(),
            local_areas: local_areas.to_vec(),
        })
    }

    fn teardown(&self, cluster_network: &str) -> Result<(), DeviceError> {
        let bridge = naming::bridge_name(cluster_network);
        let bond = naming::bond_name(cluster_network);
        let bridge_exists = self.show_link(&bridge)?.is_some();
        let bond_exists = self.show_link(&bond)?.is_some();
        if !bridge_exists && !bond_exists {
            return Err(DeviceError::NotFound(bridge));
        }

        if bridge_exists {
            info!(bridge = %bridge, "deleting bridge");
            self.ip(args(&["link", "del", "dev", &bridge]))?;
        }
        if bond_exists {
            info!(bond = %bond, "deleting bond");
            self.ip(args(&["link", "del", "dev", &bond]))?;
        }
        Ok(())
    }

    fn list_local_areas(&self, bridge: &BridgeHandle) -> Result<Vec<LocalArea>, DeviceError> {
        let out = self.run(
            &self.bridge,
            &args(&["-json", "vlan", "show", "dev", &bridge.uplink.name]),
        )?;
        let ports: Vec<BridgePort> = parse_json("bridge vlan show", &out)?;
        let vids = port_vids(&ports, &bridge.uplink.name);

        let mut areas: Vec<LocalArea> = bridge
            .local_areas
            .iter()
            .filter(|la| la.vid == 0 || vids.contains(&la.vid))
            .cloned()
            .collect();
        areas.sort();
        Ok(areas)
    }

    fn link_summary(&self, link: &LinkHandle) -> Result<LinkStatus, DeviceError> {
        let found = self.require_link(&link.name)?;
        let master_index = match &found.master {
            Some(master) => self.show_link(master)?.map(|m| m.ifindex).unwrap_or(0),
            None => 0,
        };

        Ok(LinkStatus {
            name: found.ifname.clone(),
            index: found.ifindex,
            type_: found.kind().to_string(),
            mac: found.address.clone(),
            promiscuous: found.is_promiscuous(),
            state: found.operstate.to_lowercase(),
            master_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macaddr::MacAddr6;
    use netplane_core::crds::BondMode;

    const BOND_JSON: &str = r#"[{"ifindex":7,"ifname":"storage-bo","flags":["BROADCAST","MULTICAST","MASTER","UP","LOWER_UP"],
        "mtu":9000,"operstate":"UP","master":"storage-br","link_type":"ether","address":"0a:1b:2c:3d:4e:5f",
        "promiscuity":1,"linkinfo":{"info_kind":"bond","info_data":{"mode":"active-backup"}}}]"#;

    fn config() -> UplinkConfig {
        UplinkConfig {
            name: "storage-bo".to_string(),
            nics: vec!["eth1".to_string()],
            mode: BondMode::Ieee8023ad,
            miimon: Some(100),
            mtu: Some(9000),
            tx_qlen: None,
            hardware_addr: Some(MacAddr6::new(0x0a, 0x1b, 0x2c, 0x3d, 0x4e, 0x5f)),
        }
    }

    #[test]
    fn test_parse_link() {
        let links: Vec<IpLink> = parse_json("ip link show", BOND_JSON).unwrap();
        let link = &links[0];
        assert_eq!(link.handle(), LinkHandle { name: "storage-bo".to_string(), index: 7 });
        assert_eq!(link.kind(), "bond");
        assert!(link.is_promiscuous());
        assert_eq!(link.master.as_deref(), Some("storage-br"));
    }

    #[test]
    fn test_kind_falls_back_to_link_type() {
        let links: Vec<IpLink> =
            parse_json("ip link show", r#"[{"ifindex":2,"ifname":"eth1","link_type":"ether"}]"#)
                .unwrap();
        assert_eq!(links[0].kind(), "ether");
        assert!(!links[0].is_promiscuous());
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        assert!(matches!(
            parse_json::<Vec<IpLink>>("ip link show", "Device \"x\" does not exist."),
            Err(DeviceError::Parse { .. })
        ));
    }

    #[test]
    fn test_bond_args() {
        assert_eq!(
            bond_add_args(&config()).join(" "),
            "link add name storage-bo type bond mode 802.3ad miimon 100"
        );
        assert_eq!(
            link_attr_args(&config()).join(" "),
            "mtu 9000 address 0a:1b:2c:3d:4e:5f"
        );

        let defaults = UplinkConfig {
            miimon: None,
            mtu: None,
            hardware_addr: None,
            mode: BondMode::ActiveBackup,
            ..config()
        };
        assert_eq!(
            bond_add_args(&defaults).join(" "),
            "link add name storage-bo type bond mode active-backup"
        );
        assert!(link_attr_args(&defaults).is_empty());
    }

    #[test]
    fn test_port_vids_expands_ranges() {
        let ports: Vec<BridgePort> = parse_json(
            "bridge vlan show",
            r#"[{"ifname":"storage-bo","vlans":[{"vlan":1,"flags":["PVID","Egress Untagged"]},{"vlan":100},{"vlan":200,"vlanEnd":202}]},
                {"ifname":"other","vlans":[{"vlan":300}]}]"#,
        )
        .unwrap();
        let vids = port_vids(&ports, "storage-bo");
        assert_eq!(vids.into_iter().collect::<Vec<_>>(), vec![1, 100, 200, 201, 202]);
    }

    #[test]
    fn test_missing_device_detection() {
        assert!(is_missing_device("Device \"storage-br\" does not exist."));
        assert!(is_missing_device("Cannot find device \"eth9\""));
        assert!(!is_missing_device("RTNETLINK answers: Operation not permitted"));
    }
}
