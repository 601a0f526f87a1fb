//! Command line and environment configuration

use clap::{Args, ValueEnum};
use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::device::{DeviceController, IpRoute2, MemoryDevices};

/// Requeue timing shared by all controllers.
#[derive(Args, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Seconds before a successfully reconciled object is checked again
    #[arg(long, env = "RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,

    /// Seconds before a failed reconcile is retried
    #[arg(long, env = "ERROR_BACKOFF_SECS", default_value_t = 60)]
    pub error_backoff_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            resync_secs: 300,
            error_backoff_secs: 60,
        }
    }
}

impl ReconcileSettings {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Args, Clone, Debug)]
pub struct ManagerArgs {
    #[command(flatten)]
    pub settings: ReconcileSettings,
}

/// Backend used to program network devices.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceDriver {
    /// iproute2 `ip` and `bridge` commands
    #[default]
    Iproute2,
    /// In-memory devices, nothing touches the host
    Memory,
}

#[derive(Args, Clone, Debug)]
pub struct AgentArgs {
    /// Name of the node this agent runs on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    #[arg(long, env = "DEVICE_DRIVER", value_enum, default_value_t = DeviceDriver::Iproute2)]
    pub driver: DeviceDriver,

    /// Path to the iproute2 `ip` binary
    #[arg(long, env = "IP_BINARY", default_value = "ip")]
    pub ip_binary: PathBuf,

    /// Path to the iproute2 `bridge` binary
    #[arg(long, env = "BRIDGE_BINARY", default_value = "bridge")]
    pub bridge_binary: PathBuf,

    #[command(flatten)]
    pub settings: ReconcileSettings,
}

impl AgentArgs {
    pub fn device_controller(&self) -> Arc<dyn DeviceController> {
        match self.driver {
            DeviceDriver::Iproute2 => Arc::new(IpRoute2::new(&self.ip_binary, &self.bridge_binary)),
            DeviceDriver::Memory => Arc::new(MemoryDevices::new()),
        }
    }
}
