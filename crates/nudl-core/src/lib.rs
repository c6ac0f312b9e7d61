//! nudl core - label keys, inventories, merging, and patches
//!
//! This crate provides the pure building blocks of the labeler:
//! - Label key encoding for USB devices and kernel modules
//! - The per-cycle inventory and the label merge that publishes it
//! - Minimal label patches between two node snapshots
//! - The node registry abstraction the patches are applied through

pub mod device;
pub mod inventory;
pub mod key;
pub mod merge;
pub mod patch;
pub mod registry;

pub use device::{HardwareId, ParseHardwareIdError};
pub use inventory::{Inventory, Labels, ABSENT, PRESENT};
pub use key::{KeyCodec, KeyError, KeyMode, NameResolver, DEFAULT_PREFIX, MAX_KEY_LEN};
pub use merge::{managed_keys, merge, strip_managed};
pub use patch::LabelPatch;
pub use registry::{MemoryRegistry, NodeRecord, NodeRegistry, RegistryError};
