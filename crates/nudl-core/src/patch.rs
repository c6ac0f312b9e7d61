//! Minimal label patches between two snapshots of a node

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use crate::inventory::Labels;

/// Exactly the label changes between `before` and `after`.
///
/// `resource_version` is the precondition the patch is submitted under: the
/// registry rejects it if the node changed since the snapshot was read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelPatch {
    pub resource_version: Option<String>,
    /// Added keys and changed values
    pub set: Labels,
    /// Removed keys
    pub remove: BTreeSet<String>,
}

impl LabelPatch {
    pub fn diff(before: &Labels, after: &Labels) -> Self {
        let set = after
            .iter()
            .filter(|(k, v)| before.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let remove = before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect();

        Self {
            resource_version: None,
            set,
            remove,
        }
    }

    pub fn with_resource_version(mut self, resource_version: Option<String>) -> Self {
        self.resource_version = resource_version;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Number of keys touched
    pub fn len(&self) -> usize {
        self.set.len() + self.remove.len()
    }

    /// Apply to a label map, as the registry would
    pub fn apply_to(&self, labels: &mut Labels) {
        for key in &self.remove {
            labels.remove(key);
        }
        for (key, value) in &self.set {
            labels.insert(key.clone(), value.clone());
        }
    }

    /// RFC 7386 JSON merge patch on object metadata; removed keys become `null`
    pub fn to_merge_patch(&self) -> Value {
        let mut labels = Map::new();
        for key in &self.remove {
            labels.insert(key.clone(), Value::Null);
        }
        for (key, value) in &self.set {
            labels.insert(key.clone(), Value::String(value.clone()));
        }

        let mut metadata = Map::new();
        metadata.insert("labels".to_string(), Value::Object(labels));
        if let Some(rv) = &self.resource_version {
            metadata.insert("resourceVersion".to_string(), Value::String(rv.clone()));
        }

        json!({ "metadata": metadata })
    }
}
