//! API server location and credentials

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Where the service account token and CA are mounted inside a pod
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum KubeError {
    #[error("Not running inside a cluster (KUBERNETES_SERVICE_HOST/PORT unset); pass an API server address")]
    NotInCluster,
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid CA certificate {path}: {message}")]
    InvalidCertificate { path: PathBuf, message: String },
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// How to reach the API server
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL, e.g. `https://10.96.0.1:443`
    pub server: String,
    /// Bearer token file, re-read on every request so rotated tokens are picked up
    pub token_file: Option<PathBuf>,
    /// PEM bundle used to verify the API server
    pub ca_file: Option<PathBuf>,
    pub timeout: Duration,
}

impl ClusterConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token_file: None,
            ca_file: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Configuration from the pod environment and mounted service account
    pub fn in_cluster() -> Result<Self, KubeError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| KubeError::NotInCluster)?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").map_err(|_| KubeError::NotInCluster)?;
        Ok(Self::from_service(&host, &port, Path::new(SERVICE_ACCOUNT_DIR)))
    }

    fn from_service(host: &str, port: &str, account_dir: &Path) -> Self {
        // IPv6 service addresses need brackets
        let server = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        Self {
            server,
            token_file: Some(account_dir.join("token")),
            ca_file: Some(account_dir.join("ca.crt")),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.token_file = path;
        }
        self
    }

    pub fn with_ca_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.ca_file = path;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
