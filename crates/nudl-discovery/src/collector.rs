//! Inventory collection: scan once, filter, and encode label keys

use nudl_core::{HardwareId, Inventory, KeyCodec, KeyError, KeyMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::error::ScanError;
use crate::modules::ModuleSource;
use crate::usb::DeviceScanner;

/// Invalid collector settings, detected before the first scan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    #[error("An include list can only be used with raw label keys (disable human-readable labels)")]
    IncludeWithHumanReadable,
    #[error("Invalid kernel module filter {name:?}: {source}")]
    InvalidModule { name: String, source: KeyError },
}

/// How module filters are compared against loaded module names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleMatch {
    /// The filter must equal a loaded module name
    #[default]
    Exact,
    /// The filter may appear anywhere in a loaded module name
    Substring,
}

impl ModuleMatch {
    pub fn matches(&self, filter: &str, module: &str) -> bool {
        match self {
            ModuleMatch::Exact => module == filter,
            ModuleMatch::Substring => module.contains(filter),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    pub mode: KeyMode,
    /// Devices whose description contains any of these (case-insensitive) are ignored
    pub exclude: Vec<String>,
    /// When non-empty, only these devices are labelled, absent ones as `false`
    pub include: Vec<HardwareId>,
    /// Kernel modules to label as loaded or not
    pub modules: Vec<String>,
    pub module_match: ModuleMatch,
}

/// Result of one collection pass
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub inventory: Inventory,
    /// Number of devices seen on the bus, before filtering
    pub devices_scanned: usize,
    /// Set when the module list could not be read; device entries are still present
    pub module_error: Option<ScanError>,
}

pub struct InventoryCollector {
    codec: KeyCodec,
    mode: KeyMode,
    exclude: Vec<String>,
    include: Vec<HardwareId>,
    /// (filter, label key)
    modules: Vec<(String, String)>,
    module_match: ModuleMatch,
}

impl InventoryCollector {
    pub fn new(codec: KeyCodec, config: CollectorConfig) -> Result<Self, CollectorError> {
        if !config.include.is_empty() && config.mode == KeyMode::Human {
            return Err(CollectorError::IncludeWithHumanReadable);
        }

        let modules = config
            .modules
            .into_iter()
            .map(|name| match codec.module(&name) {
                Ok(key) => Ok((name, key)),
                Err(source) => Err(CollectorError::InvalidModule { name, source }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            codec,
            mode: config.mode,
            exclude: config.exclude.iter().map(|s| s.to_lowercase()).collect(),
            include: config.include,
            modules,
            module_match: config.module_match,
        })
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Scan devices (and modules, when configured) into a fresh inventory
    pub fn collect(
        &self,
        scanner: &dyn DeviceScanner,
        modules: Option<&dyn ModuleSource>,
    ) -> Result<Collection, ScanError> {
        let scanned = scanner.scan()?;
        let devices_scanned = scanned.len();

        let (excluded, kept): (Vec<HardwareId>, Vec<HardwareId>) = scanned
            .into_iter()
            .partition(|id| self.is_excluded(&scanner.describe(*id)));
        if !excluded.is_empty() {
            debug!(count = excluded.len(), "Excluded USB devices by description");
        }

        let mut inventory = self.device_inventory(scanner, &excluded, &kept);

        let mut module_error = None;
        if let (Some(source), false) = (modules, self.modules.is_empty()) {
            match source.active_modules() {
                Ok(active) => inventory.extend(self.module_inventory(&active)),
                Err(e) => module_error = Some(e),
            }
        }

        Ok(Collection {
            inventory,
            devices_scanned,
            module_error,
        })
    }

    fn is_excluded(&self, description: &str) -> bool {
        let description = description.to_lowercase();
        self.exclude.iter().any(|s| description.contains(s.as_str()))
    }

    fn device_inventory(
        &self,
        scanner: &dyn DeviceScanner,
        excluded: &[HardwareId],
        kept: &[HardwareId],
    ) -> Inventory {
        if self.include.is_empty() {
            return kept
                .iter()
                .map(|id| (self.codec.encode_or_raw(*id, self.mode, scanner.names()), true))
                .collect();
        }

        let excluded: BTreeSet<&HardwareId> = excluded.iter().collect();
        let kept: BTreeSet<&HardwareId> = kept.iter().collect();
        self.include
            .iter()
            .filter(|id| !excluded.contains(id))
            .map(|id| (self.codec.raw(*id), kept.contains(id)))
            .collect()
    }

    fn module_inventory(&self, active: &[String]) -> Inventory {
        self.modules
            .iter()
            .map(|(filter, key)| {
                let loaded = active.iter().any(|m| self.module_match.matches(filter, m));
                (key.clone(), loaded)
            })
            .collect()
    }
}
