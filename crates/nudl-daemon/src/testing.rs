//! In-memory collaborators for reconciler and scheduler tests

use async_trait::async_trait;
use nudl_core::{
    HardwareId, KeyCodec, LabelPatch, Labels, MemoryRegistry, NameResolver, NodeRecord,
    NodeRegistry, RegistryError, DEFAULT_PREFIX,
};
use nudl_discovery::{
    CollectorConfig, DeviceScanner, InventoryCollector, ModuleSource, ScanError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::metrics::Metrics;
use crate::reconcile::Reconciler;

pub const NODE: &str = "node-1";

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Reconciler with human-readable keys and a `wireguard`/`fantasy` module filter
pub fn reconciler(bus: FakeBus, registry: Arc<FakeRegistry>) -> Reconciler {
    let config = CollectorConfig {
        modules: vec!["wireguard".to_string(), "fantasy".to_string()],
        ..Default::default()
    };
    let collector = InventoryCollector::new(KeyCodec::new(DEFAULT_PREFIX).unwrap(), config).unwrap();
    Reconciler::new(
        NODE,
        collector,
        Arc::new(bus),
        registry,
        Metrics::new().unwrap(),
    )
}

pub struct FakeBus {
    devices: Mutex<Result<Vec<HardwareId>, ScanError>>,
}

impl FakeBus {
    pub fn with(devices: &[(u16, u16)]) -> Self {
        Self {
            devices: Mutex::new(Ok(devices
                .iter()
                .map(|&(v, p)| HardwareId::new(v, p))
                .collect())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            devices: Mutex::new(Err(ScanError::ScanFailure(message.to_string()))),
        }
    }
}

impl NameResolver for FakeBus {
    fn resolve(&self, id: HardwareId) -> Option<(String, String)> {
        match (id.vendor, id.product) {
            (0x8086, 0x0044) => Some(("Intel Corp.".into(), "CPU DRAM Controller".into())),
            (0x1d6b, 0x0002) => Some(("Linux Foundation".into(), "2.0 root hub".into())),
            _ => None,
        }
    }
}

impl DeviceScanner for FakeBus {
    fn scan(&self) -> Result<Vec<HardwareId>, ScanError> {
        self.devices.lock().unwrap().clone()
    }

    fn names(&self) -> &dyn NameResolver {
        self
    }

    fn describe(&self, id: HardwareId) -> String {
        match self.resolve(id) {
            Some((vendor, product)) => format!("{} ({})", product, vendor),
            None => format!("Unknown device {}", id),
        }
    }
}

pub struct FakeModules(Result<Vec<String>, ScanError>);

impl FakeModules {
    pub fn with(modules: &[&str]) -> Self {
        Self(Ok(modules.iter().map(|m| m.to_string()).collect()))
    }

    pub fn failing() -> Self {
        Self(Err(ScanError::ModuleSourceUnavailable(
            "/proc/modules: permission denied".to_string(),
        )))
    }
}

impl ModuleSource for FakeModules {
    fn active_modules(&self) -> Result<Vec<String>, ScanError> {
        self.0.clone()
    }
}

/// Memory registry for a single node that can hold reads at a gate and
/// inject conflicts on patch
pub struct FakeRegistry {
    inner: MemoryRegistry,
    gate: Option<Semaphore>,
    conflicts: AtomicUsize,
    gets: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(labels: Labels) -> Self {
        Self {
            inner: MemoryRegistry::new().with_node(NODE, labels),
            gate: None,
            conflicts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    /// Reads block until [`FakeRegistry::open`] hands out permits
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open(&self, reads: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(reads);
        }
    }

    /// Reject the next `n` patches with a conflict
    pub fn with_conflicts(self, n: usize) -> Self {
        self.conflicts.store(n, Ordering::SeqCst);
        self
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn patch_count(&self) -> usize {
        self.inner.patches().len()
    }

    /// Every patch accepted so far
    pub fn submitted(&self) -> Vec<LabelPatch> {
        self.inner.patches()
    }

    pub fn labels(&self) -> Labels {
        self.inner.labels(NODE).unwrap_or_default()
    }

    /// Wait until at least `n` reads have started
    pub async fn wait_for_gets(&self, n: usize) {
        while self.gets() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl NodeRegistry for FakeRegistry {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, RegistryError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| RegistryError::Transport(e.to_string()))?
                .forget();
        }
        self.inner.get_node(name).await
    }

    async fn patch_node(&self, name: &str, patch: &LabelPatch) -> Result<NodeRecord, RegistryError> {
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RegistryError::Conflict(name.to_string()));
        }
        self.inner.patch_node(name, patch).await
    }
}
