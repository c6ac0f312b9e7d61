//! Hardware identifiers for attached USB devices

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A USB vendor/product pair, as reported by the device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HardwareId {
    pub vendor: u16,
    pub product: u16,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid hardware id {0:?}: expected vvvv:pppp in hex")]
pub struct ParseHardwareIdError(pub String);

impl HardwareId {
    pub const fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }

    /// Fixed-width hex token used for raw label keys (`8086_0044`)
    pub fn raw_token(&self) -> String {
        format!("{:04x}_{:04x}", self.vendor, self.product)
    }
}

impl std::fmt::Display for HardwareId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

impl FromStr for HardwareId {
    type Err = ParseHardwareIdError;

    /// Accepts `vvvv:pppp` or `vvvv_pppp`, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHardwareIdError(s.to_string());
        let (vendor, product) = s
            .trim()
            .split_once([':', '_'])
            .ok_or_else(err)?;

        if vendor.len() != 4 || product.len() != 4 {
            return Err(err());
        }

        Ok(Self {
            vendor: u16::from_str_radix(vendor, 16).map_err(|_| err())?,
            product: u16::from_str_radix(product, 16).map_err(|_| err())?,
        })
    }
}
