//! MTU validation and normalization
//!
//! An MTU of `0` means "unset" and resolves to [`DEFAULT_MTU`]. Every other
//! component goes through these helpers instead of comparing raw values.

use thiserror::Error;

/// Smallest MTU accepted on an uplink (IPv4 minimum reassembly size).
pub const MIN_MTU: u32 = 576;

/// Largest MTU accepted on an uplink (jumbo frames).
pub const MAX_MTU: u32 = 9000;

/// MTU used when none is configured.
pub const DEFAULT_MTU: u32 = 1500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MtuError {
    #[error("value {0:?} is not an integer")]
    NotInteger(String),
    #[error("value {value} is not in range [0, {MIN_MTU}..{MAX_MTU}]")]
    OutOfRange { value: String },
}

/// `0` (unset) or within `[MIN_MTU, MAX_MTU]`.
pub fn is_valid_mtu(mtu: u32) -> bool {
    mtu == 0 || (MIN_MTU..=MAX_MTU).contains(&mtu)
}

pub fn is_default_mtu(mtu: u32) -> bool {
    mtu == DEFAULT_MTU
}

/// Equal as effective values: `0` and [`DEFAULT_MTU`] are the same MTU.
pub fn are_equal_mtus(a: u32, b: u32) -> bool {
    a == b || (a == 0 && is_default_mtu(b)) || (is_default_mtu(a) && b == 0)
}

/// Returns [`DEFAULT_MTU`] for `0`, otherwise the value itself.
pub fn default_if_zero(mtu: u32) -> u32 {
    if mtu == 0 {
        DEFAULT_MTU
    } else {
        mtu
    }
}

/// Parse a base-10 MTU as stored in annotations.
pub fn parse_mtu(value: &str) -> Result<u32, MtuError> {
    let mtu: u32 = value
        .parse()
        .map_err(|_| MtuError::NotInteger(value.to_string()))?;
    if !is_valid_mtu(mtu) {
        return Err(MtuError::OutOfRange {
            value: value.to_string(),
        });
    }
    Ok(mtu)
}
