//! Merging a fresh inventory into a node's existing labels
//!
//! Only keys under `<prefix>/` are ever touched. Managed keys missing from the
//! inventory are removed, every inventory entry is written, and foreign keys
//! pass through unchanged.

use crate::inventory::{Inventory, Labels};
use crate::key::is_managed_key;

/// Keys of `labels` owned by this system
pub fn managed_keys<'a>(labels: &'a Labels, prefix: &'a str) -> impl Iterator<Item = &'a String> {
    labels.keys().filter(move |k| is_managed_key(k, prefix))
}

/// Compute the new label map for a node
pub fn merge(existing: &Labels, inventory: &Inventory, prefix: &str) -> Labels {
    let mut labels: Labels = existing
        .iter()
        .filter(|(k, _)| !is_managed_key(k, prefix) || inventory.contains_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (key, value) in inventory.iter() {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Remove every managed key, leaving foreign labels alone
pub fn strip_managed(existing: &Labels, prefix: &str) -> Labels {
    merge(existing, &Inventory::new(), prefix)
}
