use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Enumeration itself failed; the cycle cannot publish anything
    #[error("USB scan failed: {0}")]
    ScanFailure(String),
    /// The kernel module list could not be read
    #[error("Kernel module source unavailable: {0}")]
    ModuleSourceUnavailable(String),
}
