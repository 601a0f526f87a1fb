//! Netplane operator
//!
//! Node agent and management plane for VLAN cluster networks.

pub mod config;
pub mod controllers;
pub mod device;
pub mod store;
pub mod telemetry;
