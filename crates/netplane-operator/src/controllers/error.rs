//! Reconcile errors
//!
//! One error type for both handler sets; the controller runtime logs it and
//! requeues.

use netplane_core::crds::attachment::AttachmentError;
use thiserror::Error;

use crate::{device::DeviceError, store::StoreError};

/// Failure of one handler invocation. Every variant is retried by the
/// controller runtime.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("set up VLAN failed, vlanconfig: {vlan_config}, node: {node}: {source}")]
    Setup {
        vlan_config: String,
        node: String,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("tear down VLAN failed, vlanconfig: {vlan_config}, node: {node}: {source}")]
    Teardown {
        vlan_config: String,
        node: String,
        #[source]
        source: DeviceError,
    },

    /// The status write failed; `cause` is the device error it was recording, if any.
    #[error("update vlanstatus {name} failed: {source}{}", underlying(.cause))]
    Status {
        name: String,
        #[source]
        source: StoreError,
        cause: Option<String>,
    },

    #[error("node {node}: {source}")]
    NodeLabels {
        node: String,
        #[source]
        source: StoreError,
    },

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("cluster network {0} not found")]
    ClusterNetworkNotFound(String),

    #[error("the only remaining vlanstatus {remaining} is not {removing}")]
    Inconsistent { remaining: String, removing: String },
}

fn underlying(cause: &Option<String>) -> String {
    match cause {
        Some(cause) => format!(", underlying error: {cause}"),
        None => String::new(),
    }
}
