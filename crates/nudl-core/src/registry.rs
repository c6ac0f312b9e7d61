//! Node registry abstraction
//!
//! The cluster is only ever read with [`NodeRegistry::get_node`] and written
//! with [`NodeRegistry::patch_node`]. Patches carry the resource version they
//! were computed against, so a concurrent writer surfaces as
//! [`RegistryError::Conflict`] instead of being overwritten.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::inventory::Labels;
use crate::patch::LabelPatch;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Node {0} not found")]
    NotFound(String),
    #[error("Node {0} was modified concurrently")]
    Conflict(String),
    #[error("Registry request failed: {0}")]
    Transport(String),
}

/// The labelled object as read from the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub resource_version: Option<String>,
    pub labels: Labels,
}

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, RegistryError>;

    /// Apply `patch` and return the node as stored afterwards
    async fn patch_node(&self, name: &str, patch: &LabelPatch) -> Result<NodeRecord, RegistryError>;
}

/// In-process registry with resource-version checks, for tests and dry runs
#[derive(Default)]
pub struct MemoryRegistry {
    nodes: Mutex<HashMap<String, (u64, Labels)>>,
    patches: Mutex<Vec<LabelPatch>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, name: &str, labels: Labels) -> Self {
        self.put(name, labels);
        self
    }

    /// Overwrite a node's labels, bumping its resource version like any other writer
    pub fn put(&self, name: &str, labels: Labels) {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let version = nodes.get(name).map(|(v, _)| v + 1).unwrap_or(1);
        nodes.insert(name.to_string(), (version, labels));
    }

    pub fn remove(&self, name: &str) {
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    pub fn labels(&self, name: &str) -> Option<Labels> {
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|(_, labels)| labels.clone())
    }

    /// Every patch accepted so far
    pub fn patches(&self) -> Vec<LabelPatch> {
        self.patches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NodeRegistry for MemoryRegistry {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, RegistryError> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let (version, labels) = nodes
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        Ok(NodeRecord {
            name: name.to_string(),
            resource_version: Some(version.to_string()),
            labels: labels.clone(),
        })
    }

    async fn patch_node(&self, name: &str, patch: &LabelPatch) -> Result<NodeRecord, RegistryError> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let (version, labels) = nodes
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if let Some(expected) = &patch.resource_version {
            if *expected != version.to_string() {
                return Err(RegistryError::Conflict(name.to_string()));
            }
        }

        patch.apply_to(labels);
        *version += 1;
        self.patches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(patch.clone());

        Ok(NodeRecord {
            name: name.to_string(),
            resource_version: Some(version.to_string()),
            labels: labels.clone(),
        })
    }
}
