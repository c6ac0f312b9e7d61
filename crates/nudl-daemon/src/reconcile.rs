//! One reconcile cycle: scan, merge, patch
//!
//! A cycle reads the node, merges a fresh inventory into its labels and writes
//! back only the difference, conditioned on the resource version that was read.
//! Nothing is carried over between cycles; every cycle starts from the node as
//! the API server has it.

use nudl_core::{merge, strip_managed, LabelPatch, Labels, NodeRecord, NodeRegistry, RegistryError};
use nudl_discovery::{Collection, DeviceScanner, InventoryCollector, ModuleSource, ScanError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::state::{SchedulerState, StateHandle};

/// Cleanup has no later tick to fall back on, so conflicts are retried here
const CLEANUP_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Node {0} not found")]
    RecordNotFound(String),
    #[error("Node {0} changed since it was read")]
    Conflict(String),
    #[error("{0}")]
    TransportFailure(String),
}

impl From<RegistryError> for ApplyError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(name) => ApplyError::RecordNotFound(name),
            RegistryError::Conflict(name) => ApplyError::Conflict(name),
            RegistryError::Transport(message) => ApplyError::TransportFailure(message),
        }
    }
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),
    #[error("Cycle cancelled by shutdown")]
    Cancelled,
}

/// Outcome of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub devices_scanned: usize,
    /// Entries in the inventory, i.e. managed labels after the merge
    pub labels: usize,
    /// What was written; empty on a steady-state cycle
    pub patch: LabelPatch,
}

/// A patch as submitted, with the record the API server returned
#[derive(Debug, Clone)]
pub struct Applied {
    pub record: NodeRecord,
    /// Empty when nothing had to be written
    pub patch: LabelPatch,
}

/// Writes label diffs with a resource-version precondition
pub struct PatchApplier {
    registry: Arc<dyn NodeRegistry>,
}

impl PatchApplier {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &dyn NodeRegistry {
        self.registry.as_ref()
    }

    /// Submit the difference between `before` and `after`.
    ///
    /// An empty difference is not sent and `before` is returned as is.
    pub async fn apply(&self, before: &NodeRecord, after: &Labels) -> Result<Applied, ApplyError> {
        let patch = LabelPatch::diff(&before.labels, after)
            .with_resource_version(before.resource_version.clone());

        if patch.is_empty() {
            debug!(node = %before.name, "Labels up to date, nothing to patch");
            return Ok(Applied {
                record: before.clone(),
                patch,
            });
        }

        let stored = self.registry.patch_node(&before.name, &patch).await?;
        info!(
            node = %stored.name,
            set = patch.set.len(),
            removed = patch.remove.len(),
            resource_version = stored.resource_version.as_deref().unwrap_or(""),
            "Patched node labels"
        );
        debug!(node = %stored.name, labels = ?stored.labels, "Labels after patch");
        Ok(Applied {
            record: stored,
            patch,
        })
    }
}

/// Everything a cycle needs, built once at startup
pub struct Reconciler {
    node: String,
    collector: Arc<InventoryCollector>,
    scanner: Arc<dyn DeviceScanner>,
    modules: Option<Arc<dyn ModuleSource>>,
    applier: PatchApplier,
    metrics: Metrics,
}

impl Reconciler {
    pub fn new(
        node: impl Into<String>,
        collector: InventoryCollector,
        scanner: Arc<dyn DeviceScanner>,
        registry: Arc<dyn NodeRegistry>,
        metrics: Metrics,
    ) -> Self {
        Self {
            node: node.into(),
            collector: Arc::new(collector),
            scanner,
            modules: None,
            applier: PatchApplier::new(registry),
            metrics,
        }
    }

    pub fn with_modules(mut self, modules: Arc<dyn ModuleSource>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn prefix(&self) -> &str {
        self.collector.codec().prefix()
    }

    /// Read the node once, e.g. to verify access at startup
    pub async fn probe(&self) -> Result<NodeRecord, ApplyError> {
        Ok(self.applier.registry().get_node(&self.node).await?)
    }

    /// Run a single cycle.
    ///
    /// `cancel` is checked before every registry call; a call already in
    /// flight is allowed to finish.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
        state: &StateHandle,
    ) -> Result<CycleReport, CycleError> {
        state.set(SchedulerState::Scanning);
        let collection = self.collect().await?;
        if let Some(e) = collection.module_error {
            return Err(e.into());
        }
        debug!(
            devices = collection.devices_scanned,
            labels = collection.inventory.len(),
            "Collected inventory"
        );

        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        let before = self.probe().await?;

        state.set(SchedulerState::Merging);
        let after = merge(&before.labels, &collection.inventory, self.prefix());
        self.metrics.set_labels(collection.inventory.len());

        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        state.set(SchedulerState::Patching);
        let applied = self.applier.apply(&before, &after).await?;

        Ok(CycleReport {
            devices_scanned: collection.devices_scanned,
            labels: collection.inventory.len(),
            patch: applied.patch,
        })
    }

    /// Remove every managed label from the node. Not subject to cancellation.
    pub async fn cleanup(&self) -> Result<NodeRecord, ApplyError> {
        let mut attempt = 1;
        loop {
            let before = self.probe().await?;
            let after = strip_managed(&before.labels, self.prefix());

            match self.applier.apply(&before, &after).await {
                Err(ApplyError::Conflict(node)) if attempt < CLEANUP_ATTEMPTS => {
                    warn!(node = %node, attempt, "Conflict while cleaning up, retrying");
                    attempt += 1;
                }
                result => return result.map(|applied| applied.record),
            }
        }
    }

    async fn collect(&self) -> Result<Collection, ScanError> {
        let collector = self.collector.clone();
        let scanner = self.scanner.clone();
        let modules = self.modules.clone();

        let result = tokio::task::spawn_blocking(move || {
            collector.collect(scanner.as_ref(), modules.as_deref())
        })
        .await
        .map_err(|e| ScanError::ScanFailure(format!("scan task failed: {}", e)))?;

        if matches!(result, Err(ScanError::ScanFailure(_))) {
            self.metrics.scan_error();
        }
        result
    }
}
