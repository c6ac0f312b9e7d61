//! Loaded kernel modules from `/proc/modules`

use std::path::PathBuf;
use tracing::debug;

use crate::error::ScanError;

pub const DEFAULT_PROC_MODULES: &str = "/proc/modules";

/// Source of currently loaded kernel module names
pub trait ModuleSource: Send + Sync {
    fn active_modules(&self) -> Result<Vec<String>, ScanError>;
}

/// Reads the module list the kernel exposes in procfs
pub struct ProcModules {
    path: PathBuf,
}

impl ProcModules {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcModules {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_MODULES)
    }
}

impl ModuleSource for ProcModules {
    fn active_modules(&self) -> Result<Vec<String>, ScanError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ScanError::ModuleSourceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        let modules = parse_proc_modules(&content);
        debug!("Found {} loaded kernel modules", modules.len());
        Ok(modules)
    }
}

/// First column of every line, e.g.
/// `wireguard 98304 0 - Live 0x0000000000000000`
fn parse_proc_modules(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
