//! NetworkAttachmentDefinition (Multus), read-only.
//!
//! Only the bridge name, VLAN id and the optional route annotation are used:
//! together they yield the local areas a cluster network's bridge must carry.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keys;
use super::vlan_status::LocalArea;

/// CNI plugin type whose attachments ride on our bridges.
pub const BRIDGE_CNI_TYPE: &str = "bridge";

/// Tagged VLAN ids; 0 marks an untagged attachment.
const VLAN_IDS: std::ops::RangeInclusive<u16> = 1..=4094;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    namespaced
)]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI configuration as a JSON document.
    #[serde(default)]
    pub config: String,
}

/// The part of a bridge CNI configuration we care about.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetConf {
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub bridge: String,
    #[serde(default)]
    pub vlan: u16,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RouteConfig {
    #[serde(default)]
    cidr: String,
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment {name} has invalid config: {source}")]
    Config {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("attachment {name} has invalid route annotation: {source}")]
    Route {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("attachment {name}: VLAN id {vid} is outside 1..=4094")]
    Vlan { name: String, vid: u16 },
}

impl NetworkAttachmentDefinition {
    /// `namespace/name`, used in log and error messages.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    pub fn net_conf(&self) -> Result<NetConf, AttachmentError> {
        serde_json::from_str(&self.spec.config).map_err(|source| AttachmentError::Config {
            name: self.qualified_name(),
            source,
        })
    }

    /// Local area carried by this attachment if it is a bridge attachment on
    /// `bridge`, `None` otherwise.
    pub fn local_area_on(&self, bridge: &str) -> Result<Option<LocalArea>, AttachmentError> {
        let conf = self.net_conf()?;
        if conf.type_ != BRIDGE_CNI_TYPE || conf.bridge != bridge {
            return Ok(None);
        }
        // 0 is untagged; anything else must be a real VLAN id.
        if conf.vlan != 0 && !VLAN_IDS.contains(&conf.vlan) {
            return Err(AttachmentError::Vlan {
                name: self.qualified_name(),
                vid: conf.vlan,
            });
        }

        let cidr = match self.annotations().get(keys::NETWORK_ROUTE) {
            Some(raw) if !raw.is_empty() => {
                let route: RouteConfig =
                    serde_json::from_str(raw).map_err(|source| AttachmentError::Route {
                        name: self.qualified_name(),
                        source,
                    })?;
                route.cidr
            }
            _ => String::new(),
        };

        Ok(Some(LocalArea {
            vid: conf.vlan,
            cidr,
        }))
    }
}
