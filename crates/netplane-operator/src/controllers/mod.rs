//! Reconciliation handlers and their Kubernetes controllers
//!
//! Two handler sets share nothing but the object store: the node agent
//! ([`AgentHandler`]) builds devices on its own node, the management plane
//! ([`ManagerHandler`]) maintains cluster-wide ClusterNetwork state.

mod agent;
mod context;
mod error;
mod manager;
mod runtime;
#[cfg(test)]
mod testing;

pub use agent::{AgentHandler, FINALIZER_DOMAIN};
pub use context::Context;
pub use error::ReconcileError;
pub use manager::ManagerHandler;
pub use runtime::{AgentController, VlanConfigController, VlanStatusController};
