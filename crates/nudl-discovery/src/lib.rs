//! nudl discovery - hardware inventory of the local machine
//!
//! This crate provides:
//! - USB enumeration from sysfs, with names from the `usb.ids` database
//! - The loaded kernel module list from procfs
//! - The inventory collector that filters and encodes both into label keys

pub mod collector;
pub mod error;
pub mod modules;
pub mod usb;
pub mod usbids;

pub use collector::{
    Collection, CollectorConfig, CollectorError, InventoryCollector, ModuleMatch,
};
pub use error::ScanError;
pub use modules::{ModuleSource, ProcModules, DEFAULT_PROC_MODULES};
pub use usb::{DeviceScanner, SysfsUsbScanner};
pub use usbids::UsbIds;
