//! Vendor and product names from the `usb.ids` database
//!
//! The file lists vendors at column zero and their products indented by one
//! tab:
//!
//! ```text
//! 8086  Intel Corp.
//! 	0044  CPU DRAM Controller
//! ```
//!
//! Anything after the vendor list (device classes, HID usages, ...) is ignored.

use nudl_core::{HardwareId, NameResolver};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Locations distributions install `usb.ids` to
pub const DEFAULT_USB_IDS_PATHS: &[&str] = &[
    "/usr/share/hwdata/usb.ids",
    "/usr/share/misc/usb.ids",
    "/usr/share/usb.ids",
    "/var/lib/usbutils/usb.ids",
];

#[derive(Debug, Clone, Default)]
struct Vendor {
    name: String,
    products: HashMap<u16, String>,
}

/// Parsed `usb.ids` name table
#[derive(Debug, Clone, Default)]
pub struct UsbIds {
    vendors: HashMap<u16, Vendor>,
}

impl UsbIds {
    /// Empty database; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Self {
        let mut vendors: HashMap<u16, Vendor> = HashMap::new();
        let mut current: Option<u16> = None;

        for line in content.lines() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('\t') {
                // Interface lines are indented twice
                if rest.starts_with('\t') {
                    continue;
                }
                if let (Some(vendor), Some((id, name))) = (current, parse_entry(rest)) {
                    if let Some(v) = vendors.get_mut(&vendor) {
                        v.products.insert(id, name);
                    }
                }
                continue;
            }

            current = parse_entry(line).map(|(id, name)| {
                vendors.insert(
                    id,
                    Vendor {
                        name,
                        products: HashMap::new(),
                    },
                );
                id
            });
        }

        Self { vendors }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ids = Self::parse(&content);
        info!(path = %path.display(), vendors = ids.vendors.len(), "Loaded USB id database");
        Ok(ids)
    }

    /// Load from `path` if given, else from the first default location that
    /// exists. Falls back to an empty table, which makes every key raw.
    pub fn discover(path: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => DEFAULT_USB_IDS_PATHS.iter().map(PathBuf::from).collect(),
        };

        for candidate in &candidates {
            match Self::load(candidate) {
                Ok(ids) => return ids,
                Err(e) => debug!(path = %candidate.display(), error = %e, "USB id database not readable"),
            }
        }

        info!("No USB id database found, human-readable labels will use raw ids");
        Self::empty()
    }

    pub fn vendor(&self, vendor: u16) -> Option<&str> {
        self.vendors.get(&vendor).map(|v| v.name.as_str())
    }

    pub fn product(&self, vendor: u16, product: u16) -> Option<&str> {
        self.vendors
            .get(&vendor)
            .and_then(|v| v.products.get(&product))
            .map(String::as_str)
    }

    /// `"<product> (<vendor>)"`, used for exclusion filtering
    pub fn describe(&self, id: HardwareId) -> String {
        match (self.vendor(id.vendor), self.product(id.vendor, id.product)) {
            (Some(vendor), Some(product)) => format!("{} ({})", product, vendor),
            (Some(vendor), None) => format!("Unknown product {:04x} ({})", id.product, vendor),
            _ => format!("Unknown device {}", id),
        }
    }
}

impl NameResolver for UsbIds {
    fn resolve(&self, id: HardwareId) -> Option<(String, String)> {
        let vendor = self.vendor(id.vendor)?;
        let product = self.product(id.vendor, id.product)?;
        Some((vendor.to_string(), product.to_string()))
    }
}

/// Parse `"8086  Intel Corp."` into `(0x8086, "Intel Corp.")`
fn parse_entry(line: &str) -> Option<(u16, String)> {
    let (id, name) = line.split_once(char::is_whitespace)?;
    if id.len() != 4 {
        return None;
    }
    let id = u16::from_str_radix(id, 16).ok()?;
    Some((id, name.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# usb.ids sample
1d6b  Linux Foundation
\t0002  2.0 root hub
\t0003  3.0 root hub
8086  Intel Corp.
\t0044  CPU DRAM Controller
\t\t00  interface line
abcd  Vendor Without Products

C 00  (Defined at Interface level)
\t01  Audio
";

    #[test]
    fn test_lookup() {
        let ids = UsbIds::parse(SAMPLE);
        assert_eq!(ids.vendor(0x1d6b), Some("Linux Foundation"));
        assert_eq!(ids.product(0x1d6b, 0x0003), Some("3.0 root hub"));
        assert_eq!(ids.product(0x8086, 0x0044), Some("CPU DRAM Controller"));
        assert_eq!(ids.product(0xabcd, 0x0001), None);
    }

    #[test]
    fn test_class_section_is_ignored() {
        let ids = UsbIds::parse(SAMPLE);
        assert_eq!(ids.product(0xabcd, 0x0001), None);
        assert_eq!(ids.vendors.len(), 3);
    }

    #[test]
    fn test_describe() {
        let ids = UsbIds::parse(SAMPLE);
        assert_eq!(
            ids.describe(HardwareId::new(0x8086, 0x0044)),
            "CPU DRAM Controller (Intel Corp.)"
        );
        assert_eq!(
            ids.describe(HardwareId::new(0xabcd, 0x0001)),
            "Unknown product 0001 (Vendor Without Products)"
        );
        assert_eq!(
            ids.describe(HardwareId::new(0x0bad, 0x0001)),
            "Unknown device 0bad:0001"
        );
    }

    #[test]
    fn test_resolve_requires_both_names() {
        let ids = UsbIds::parse(SAMPLE);
        assert_eq!(
            ids.resolve(HardwareId::new(0x1d6b, 0x0002)),
            Some(("Linux Foundation".to_string(), "2.0 root hub".to_string()))
        );
        assert_eq!(ids.resolve(HardwareId::new(0xabcd, 0x0001)), None);
    }

    #[test]
    fn test_discover_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ids = UsbIds::discover(Some(&dir.path().join("usb.ids")));
        assert_eq!(ids.vendor(0x8086), None);
    }
}
