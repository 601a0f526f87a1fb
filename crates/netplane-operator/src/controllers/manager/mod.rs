//! Management plane
//!
//! Cluster-wide bookkeeping on ClusterNetworks: which VlanConfig's MTU the
//! `uplink-mtu` annotation reflects, and whether any node still serves the
//! network.

mod mtu_source;
mod readiness;

use std::sync::Arc;

use crate::store::ObjectStore;

pub struct ManagerHandler {
    store: Arc<dyn ObjectStore>,
}

impl ManagerHandler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}
