//! USB device enumeration from sysfs
//!
//! Every attached device (including root hubs) has a directory under
//! `/sys/bus/usb/devices` with `idVendor` and `idProduct` attribute files.
//! Interface directories such as `1-1:1.0` carry no ids and are skipped.

use nudl_core::{HardwareId, NameResolver};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::ScanError;
use crate::usbids::UsbIds;

/// Source of attached USB devices
pub trait DeviceScanner: Send + Sync {
    /// Enumerate attached devices. An empty bus is not an error.
    fn scan(&self) -> Result<Vec<HardwareId>, ScanError>;

    /// Vendor/product name lookup for human-readable keys
    fn names(&self) -> &dyn NameResolver;

    /// Human-readable description used for exclusion filters
    fn describe(&self, id: HardwareId) -> String;
}

/// Scanner reading `<root>/bus/usb/devices`
pub struct SysfsUsbScanner {
    sysfs_root: PathBuf,
    ids: UsbIds,
}

impl SysfsUsbScanner {
    pub fn new(sysfs_root: impl Into<PathBuf>, ids: UsbIds) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            ids,
        }
    }

    fn devices_dir(&self) -> PathBuf {
        self.sysfs_root.join("bus").join("usb").join("devices")
    }
}

impl DeviceScanner for SysfsUsbScanner {
    fn scan(&self) -> Result<Vec<HardwareId>, ScanError> {
        let dir = self.devices_dir();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| ScanError::ScanFailure(format!("{}: {}", dir.display(), e)))?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ScanError::ScanFailure(format!("{}: {}", dir.display(), e)))?;
            let path = entry.path();

            match read_device(&path) {
                Some(id) => {
                    trace!(path = %path.display(), device = %id, "Found USB device");
                    devices.push(id);
                }
                None => trace!(path = %path.display(), "Skipping entry without device ids"),
            }
        }

        devices.sort();
        debug!("Found {} USB devices", devices.len());
        Ok(devices)
    }

    fn names(&self) -> &dyn NameResolver {
        &self.ids
    }

    fn describe(&self, id: HardwareId) -> String {
        self.ids.describe(id)
    }
}

fn read_device(path: &Path) -> Option<HardwareId> {
    let vendor = read_hex_attr(&path.join("idVendor"))?;
    let product = read_hex_attr(&path.join("idProduct"))?;
    Some(HardwareId::new(vendor, product))
}

fn read_hex_attr(path: &Path) -> Option<u16> {
    let content = std::fs::read_to_string(path).ok()?;
    u16::from_str_radix(content.trim(), 16).ok()
}
