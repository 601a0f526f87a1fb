//! Deterministic object and device names.

/// Kubernetes object names and label values are bounded to 63 characters.
pub const MAX_NAME_LENGTH: usize = 63;

pub const BRIDGE_SUFFIX: &str = "-br";
pub const BOND_SUFFIX: &str = "-bo";

/// Name of the VlanStatus for a (VlanConfig, node) pair:
/// `<vlanconfig>-<node>-<crc32>`, with the prefix truncated so the whole name
/// fits in [`MAX_NAME_LENGTH`] and the checksum suffix is always intact.
pub fn status_name(vlan_config: &str, node: &str) -> String {
    let mut name = format!("{vlan_config}-{node}");
    let suffix = format!("{:08x}", crc32fast::hash(name.as_bytes()));

    let mut max_prefix = MAX_NAME_LENGTH - 1 - suffix.len();
    if name.len() > max_prefix {
        while !name.is_char_boundary(max_prefix) {
            max_prefix -= 1;
        }
        name.truncate(max_prefix);
    }

    format!("{name}-{suffix}")
}

pub fn bridge_name(cluster_network: &str) -> String {
    format!("{cluster_network}{BRIDGE_SUFFIX}")
}

pub fn bond_name(cluster_network: &str) -> String {
    format!("{cluster_network}{BOND_SUFFIX}")
}
