//! Per-cycle hardware inventory

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label map of a node, ordered for stable logs and patches
pub type Labels = BTreeMap<String, String>;

pub const PRESENT: &str = "true";
pub const ABSENT: &str = "false";

/// Label key to presence value (`"true"` / `"false"`), rebuilt every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory(Labels);

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key as present or absent; a later `true` wins over `false`
    pub fn mark(&mut self, key: String, present: bool) {
        let value = self.0.entry(key).or_insert_with(|| ABSENT.to_string());
        if present {
            *value = PRESENT.to_string();
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Combine with another inventory built in the same cycle
    pub fn extend(&mut self, other: Inventory) {
        for (key, value) in other.0 {
            self.mark(key, value == PRESENT);
        }
    }
}

impl FromIterator<(String, bool)> for Inventory {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        let mut inventory = Inventory::new();
        for (key, present) in iter {
            inventory.mark(key, present);
        }
        inventory
    }
}
