//! Node ownership resolution
//!
//! Several VlanConfigs may target the same cluster network. The node's owner
//! label records which of them holds the devices; everyone else stands back.

use kube::ResourceExt;
use netplane_core::{keys, VlanConfig};

use crate::{controllers::ReconcileError, store::ObjectStore};

/// Result of matching a VlanConfig against the local node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMatch {
    pub matches: bool,
    /// VlanConfig named by the node's owner label, if any.
    pub current_owner: Option<String>,
}

/// What the agent should do with a VlanConfig on this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Node not selected: release anything previously built.
    NotTarget,
    /// Another VlanConfig already owns the cluster network here.
    OwnedBy(String),
    Proceed,
}

impl NodeMatch {
    pub fn decide(&self, vlan_config: &str) -> Ownership {
        if !self.matches {
            return Ownership::NotTarget;
        }
        match self.current_owner.as_deref() {
            Some(owner) if !owner.is_empty() && owner != vlan_config => {
                Ownership::OwnedBy(owner.to_string())
            }
            _ => Ownership::Proceed,
        }
    }
}

/// Match `vc` against `node`.
///
/// A missing or unparsable matched-nodes annotation is "no match", not an
/// error: the selection simply has not been computed yet.
pub async fn resolve(
    store: &dyn ObjectStore,
    vc: &VlanConfig,
    node: &str,
) -> Result<NodeMatch, ReconcileError> {
    let Some(matched) = vc.matched_nodes() else {
        return Ok(NodeMatch::default());
    };
    if !matched.iter().any(|n| n == node) {
        return Ok(NodeMatch::default());
    }

    let current = store
        .get_node(node)
        .await?
        .ok_or_else(|| ReconcileError::NodeNotFound(node.to_string()))?;
    Ok(NodeMatch {
        matches: true,
        current_owner: current.labels().get(keys::VLAN_CONFIG).cloned(),
    })
}
