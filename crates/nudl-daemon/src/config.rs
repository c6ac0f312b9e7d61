//! Configuration loading and validation
//!
//! The TOML file supplies defaults, command line flags override it, and
//! [`Config::settings`] turns the result into the immutable [`Settings`] every
//! component is built from. Anything invalid is rejected here, before the
//! first cycle runs.

use nudl_core::{HardwareId, KeyCodec, KeyMode, DEFAULT_PREFIX};
use nudl_discovery::{CollectorConfig, CollectorError, InventoryCollector, ModuleMatch};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid label prefix: {0}")]
    Prefix(#[from] nudl_core::KeyError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error("Invalid include entry: {0}")]
    Include(#[from] nudl_core::ParseHardwareIdError),
    #[error("Invalid duration {value:?} for {field}")]
    Duration { field: &'static str, value: String },
    #[error("Invalid listen address {0:?}")]
    ListenAddress(String),
    #[error("Could not determine the node name; pass --hostname or set NODE_NAME")]
    NoHostname,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub labeler: LabelerConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelerConfig {
    /// Use vendor/product names instead of hex ids where possible
    #[serde(default = "default_true")]
    pub human_readable: bool,
    #[serde(default = "default_prefix")]
    pub label_prefix: String,
    /// Time between reconcile cycles, e.g. "10s"
    #[serde(default = "default_update_time")]
    pub update_time: String,
    /// Devices whose description contains one of these are never labelled
    #[serde(default)]
    pub no_contain: Vec<String>,
    /// Restrict labels to these `vvvv:pppp` ids (raw keys only)
    #[serde(default)]
    pub include: Vec<String>,
    /// Node to label; defaults to $NODE_NAME, then the system hostname
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            human_readable: true,
            label_prefix: default_prefix(),
            update_time: default_update_time(),
            no_contain: Vec::new(),
            include: Vec::new(),
            hostname: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Kernel modules to label as loaded (`true`) or not (`false`)
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default, rename = "match")]
    pub match_mode: ModuleMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// API server URL; the in-cluster service is used when unset
    #[serde(default)]
    pub apiserver: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub timeout: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            apiserver: None,
            token_file: None,
            ca_file: None,
            timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Explicit usb.ids path; the usual system locations are searched when unset
    #[serde(default)]
    pub usb_ids: Option<PathBuf>,
    #[serde(default = "default_proc_modules")]
    pub proc_modules: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            usb_ids: None,
            proc_modules: default_proc_modules(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_update_time() -> String {
    "10s".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_proc_modules() -> PathBuf {
    PathBuf::from(nudl_discovery::DEFAULT_PROC_MODULES)
}

/// Validated, immutable runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub node_name: String,
    pub update_interval: Duration,
    pub listen_address: SocketAddr,
    pub codec: KeyCodec,
    pub collector: CollectorConfig,
    pub kubernetes: KubernetesConfig,
    pub request_timeout: Duration,
    pub scanner: ScannerConfig,
}

impl Settings {
    pub fn prefix(&self) -> &str {
        self.codec.prefix()
    }

    pub fn collector(&self) -> Result<InventoryCollector, ConfigError> {
        Ok(InventoryCollector::new(self.codec.clone(), self.collector.clone())?)
    }
}

impl Config {
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let codec = KeyCodec::new(&self.labeler.label_prefix)?;

        let include = self
            .labeler
            .include
            .iter()
            .map(|s| s.parse::<HardwareId>())
            .collect::<Result<Vec<_>, _>>()?;

        let collector = CollectorConfig {
            mode: if self.labeler.human_readable {
                KeyMode::Human
            } else {
                KeyMode::Raw
            },
            exclude: self.labeler.no_contain.clone(),
            include,
            modules: self.modules.names.clone(),
            module_match: self.modules.match_mode,
        };

        let update_interval = parse_interval("update-time", &self.labeler.update_time)?;
        let request_timeout = parse_interval("kubernetes timeout", &self.kubernetes.timeout)?;

        let settings = Settings {
            node_name: resolve_node_name(self.labeler.hostname.as_deref())?,
            update_interval,
            listen_address: parse_listen_address(&self.metrics.listen_address)?,
            codec,
            collector,
            kubernetes: self.kubernetes.clone(),
            request_timeout,
            scanner: self.scanner.clone(),
        };

        // Reject bad module filters and include/human-readable conflicts now
        settings.collector()?;
        Ok(settings)
    }
}

/// Load configuration from file; a missing file means defaults
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Humantime durations such as `10s`, `500ms`, `100us` or `1m 30s`; zero is rejected
fn parse_interval(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim())
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| ConfigError::Duration {
            field,
            value: value.to_string(),
        })
}

/// Accepts `host:port`, and `:port` for all interfaces
fn parse_listen_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    normalized
        .parse()
        .map_err(|_| ConfigError::ListenAddress(value.to_string()))
}

fn resolve_node_name(configured: Option<&str>) -> Result<String, ConfigError> {
    let from_env = || std::env::var("NODE_NAME").ok();
    let from_system = || {
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .or_else(|_| std::fs::read_to_string("/etc/hostname"))
            .ok()
    };

    configured
        .map(str::to_string)
        .or_else(from_env)
        .or_else(from_system)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or(ConfigError::NoHostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(node: &str) -> Config {
        let mut config = Config::default();
        config.labeler.hostname = Some(node.to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let settings = config_for("node-1").settings().unwrap();
        assert_eq!(settings.node_name, "node-1");
        assert_eq!(settings.prefix(), "nudl.squat.ai");
        assert_eq!(settings.update_interval, Duration::from_secs(10));
        assert_eq!(settings.listen_address, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.collector.mode, KeyMode::Human);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
[labeler]
human_readable = false
label_prefix = "hw.example.com"
update_time = "1m 30s"
no_contain = ["hub"]
include = ["8086:0044"]
hostname = "worker-3"

[modules]
names = ["wireguard"]
match = "substring"

[metrics]
listen_address = ":9090"
"#;
        let config: Config = toml::from_str(content).unwrap();
        let settings = config.settings().unwrap();

        assert_eq!(settings.node_name, "worker-3");
        assert_eq!(settings.prefix(), "hw.example.com");
        assert_eq!(settings.update_interval, Duration::from_secs(90));
        assert_eq!(settings.listen_address, "0.0.0.0:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.collector.include, vec![HardwareId::new(0x8086, 0x0044)]);
        assert_eq!(settings.collector.module_match, ModuleMatch::Substring);
        assert_eq!(settings.scanner.sysfs_root, PathBuf::from("/sys"));
    }

    #[test]
    fn test_include_requires_raw_keys() {
        let mut config = config_for("node-1");
        config.labeler.include = vec!["8086:0044".to_string()];
        assert!(matches!(
            config.settings(),
            Err(ConfigError::Collector(CollectorError::IncludeWithHumanReadable))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = config_for("node-1");
        config.labeler.label_prefix = "bad prefix".to_string();
        assert!(matches!(config.settings(), Err(ConfigError::Prefix(_))));

        let mut config = config_for("node-1");
        config.labeler.update_time = "0s".to_string();
        assert!(matches!(config.settings(), Err(ConfigError::Duration { .. })));

        let mut config = config_for("node-1");
        config.labeler.human_readable = false;
        config.labeler.include = vec!["not-an-id".to_string()];
        assert!(matches!(config.settings(), Err(ConfigError::Include(_))));

        let mut config = config_for("node-1");
        config.modules.names = vec!["  ".to_string()];
        assert!(matches!(config.settings(), Err(ConfigError::Collector(_))));

        let mut config = config_for("node-1");
        config.metrics.listen_address = "nowhere".to_string();
        assert!(matches!(config.settings(), Err(ConfigError::ListenAddress(_))));
    }

    #[test]
    fn test_parse_interval() {
        let parse = |v: &str| parse_interval("update-time", v).ok();
        assert_eq!(parse("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse("100us"), Some(Duration::from_micros(100)));
        assert_eq!(parse("10sec"), Some(Duration::from_secs(10)));
        assert_eq!(parse("1m 30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse("2h 37min"), Some(Duration::from_secs(2 * 3600 + 37 * 60)));
        assert_eq!(parse("0s"), None);
        assert_eq!(parse("10"), None);
        assert_eq!(parse("5 fortnights"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_update_time_accepts_sub_second_units() {
        let mut config = config_for("node-1");
        config.labeler.update_time = "1s 500ms".to_string();
        config.kubernetes.timeout = "250ms".to_string();

        let settings = config.settings().unwrap();
        assert_eq!(settings.update_interval, Duration::from_millis(1500));
        assert_eq!(settings.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nudl.toml")).unwrap();
        assert!(config.labeler.human_readable);
        assert!(config.modules.names.is_empty());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nudl.toml");
        std::fs::write(&path, "[labeler\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }
}
