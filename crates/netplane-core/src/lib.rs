//! Core shared types for netplane
//!
//! Resource definitions, status conditions, MTU rules and name derivations
//! shared by the management plane and the node agent.

pub mod condition;
pub mod crds;
pub mod mtu;
pub mod naming;

pub use condition::{Condition, ConditionStatus, Conditions};
pub use crds::{keys, ClusterNetwork, LocalArea, VlanConfig, VlanStatus};
