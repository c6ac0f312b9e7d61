//! nudl - Node USB and module labeler
//!
//! Periodically scans the USB bus and the loaded kernel modules and mirrors
//! what it finds into labels on this machine's Kubernetes node. On shutdown
//! every label it manages is removed again.

mod config;
mod metrics;
mod reconcile;
mod scheduler;
mod server;
mod state;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use nudl_discovery::{ModuleMatch, ProcModules, SysfsUsbScanner, UsbIds};
use nudl_kube::{ClusterConfig, KubeClient};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, Settings};
use crate::metrics::Metrics;
use crate::reconcile::Reconciler;
use crate::scheduler::Scheduler;
use crate::state::StateHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    All,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    None,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::All | LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::None => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MatchMode {
    Exact,
    Substring,
}

impl From<MatchMode> for ModuleMatch {
    fn from(mode: MatchMode) -> Self {
        match mode {
            MatchMode::Exact => ModuleMatch::Exact,
            MatchMode::Substring => ModuleMatch::Substring,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "nudl")]
#[command(about = "Labels Kubernetes nodes with their USB devices and kernel modules")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "nudl.toml")]
    config: PathBuf,

    /// Use vendor/product names instead of hex ids in label keys
    #[arg(long)]
    human_readable: Option<bool>,

    /// Prefix of every label this labeler manages
    #[arg(long)]
    label_prefix: Option<String>,

    /// Time between reconcile cycles, e.g. 10s, 500ms, 2m
    #[arg(long)]
    update_time: Option<String>,

    /// Ignore devices whose description contains this string
    #[arg(long, value_delimiter = ',')]
    no_contain: Vec<String>,

    /// Only label these devices (vvvv:pppp); requires --human-readable=false
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Kernel modules to label as loaded or not
    #[arg(long, value_delimiter = ',')]
    modules: Vec<String>,

    /// How module names are matched
    #[arg(long, value_enum)]
    module_match: Option<MatchMode>,

    /// Address of the metrics endpoint
    #[arg(long)]
    listen_address: Option<String>,

    /// Name of the node to label; the system hostname when unset
    #[arg(long, env = "NODE_NAME")]
    hostname: Option<String>,

    /// Kubernetes API server URL; the in-cluster service when unset
    #[arg(long)]
    apiserver: Option<String>,

    /// Bearer token file for the API server
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// CA bundle for the API server
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Path to the usb.ids database
    #[arg(long)]
    usb_ids: Option<PathBuf>,

    /// Root of the sysfs mount
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Run a single cycle, print the applied change and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    /// Command line values win over the configuration file
    fn apply(&self, config: &mut Config) {
        let labeler = &mut config.labeler;
        if let Some(v) = self.human_readable {
            labeler.human_readable = v;
        }
        if let Some(v) = &self.label_prefix {
            labeler.label_prefix = v.clone();
        }
        if let Some(v) = &self.update_time {
            labeler.update_time = v.clone();
        }
        if !self.no_contain.is_empty() {
            labeler.no_contain = self.no_contain.clone();
        }
        if !self.include.is_empty() {
            labeler.include = self.include.clone();
        }
        if let Some(v) = &self.hostname {
            labeler.hostname = Some(v.clone());
        }

        if !self.modules.is_empty() {
            config.modules.names = self.modules.clone();
        }
        if let Some(v) = self.module_match {
            config.modules.match_mode = v.into();
        }
        if let Some(v) = &self.listen_address {
            config.metrics.listen_address = v.clone();
        }

        let kube = &mut config.kubernetes;
        if self.apiserver.is_some() {
            kube.apiserver = self.apiserver.clone();
        }
        if self.token_file.is_some() {
            kube.token_file = self.token_file.clone();
        }
        if self.ca_file.is_some() {
            kube.ca_file = self.ca_file.clone();
        }

        if self.usb_ids.is_some() {
            config.scanner.usb_ids = self.usb_ids.clone();
        }
        if let Some(v) = &self.sysfs_root {
            config.scanner.sysfs_root = v.clone();
        }
    }
}

fn init_logging(level: LogLevel, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

fn build_client(settings: &Settings) -> Result<KubeClient> {
    let kube = &settings.kubernetes;
    let cluster = match &kube.apiserver {
        Some(server) => ClusterConfig::new(server.clone()),
        None => ClusterConfig::in_cluster()?,
    }
    .with_token_file(kube.token_file.clone())
    .with_ca_file(kube.ca_file.clone())
    .with_timeout(settings.request_timeout);

    Ok(KubeClient::new(cluster)?)
}

fn build_reconciler(settings: &Settings, metrics: Metrics) -> Result<Reconciler> {
    let client = build_client(settings)?;
    info!(server = %client.server(), "Using Kubernetes API server");

    let ids = UsbIds::discover(settings.scanner.usb_ids.as_deref());
    let scanner = SysfsUsbScanner::new(settings.scanner.sysfs_root.clone(), ids);
    let modules = ProcModules::new(settings.scanner.proc_modules.clone());

    Ok(Reconciler::new(
        settings.node_name.clone(),
        settings.collector()?,
        Arc::new(scanner),
        Arc::new(client),
        metrics,
    )
    .with_modules(Arc::new(modules)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = quit.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.log_level, args.log_format)?;

    info!("nudl v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Command line overrides
    args.apply(&mut config);
    let settings = config.settings().context("Invalid configuration")?;

    info!(
        node = %settings.node_name,
        prefix = %settings.prefix(),
        interval = ?settings.update_interval,
        mode = ?settings.collector.mode,
        "Configuration loaded"
    );

    // Build the reconciler
    let metrics = Metrics::new().context("Failed to register metrics")?;
    let reconciler = build_reconciler(&settings, metrics.clone())?;

    // Verify the node is reachable
    let node = reconciler
        .probe()
        .await
        .with_context(|| format!("Cannot read node {}", settings.node_name))?;
    info!(
        node = %node.name,
        labels = node.labels.len(),
        "Connected to the API server"
    );

    if args.once {
        // Single cycle mode
        info!("Running a single reconcile cycle");
        let report = reconciler
            .run_cycle(&CancellationToken::new(), &StateHandle::new())
            .await?;
        println!("{}", serde_json::to_string_pretty(&report.patch)?);
        return Ok(ExitCode::SUCCESS);
    }

    // Daemon mode - metrics endpoint and reconcile loop
    let listener = TcpListener::bind(settings.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_address))?;
    let stop = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, metrics, stop.clone()));

    let scheduler = Scheduler::new(Arc::new(reconciler), settings.update_interval)
        .with_endpoint(stop);

    // Log state transitions
    let mut states = scheduler.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            debug!(state = %state, "Scheduler state changed");
        }
    });

    // Run until a shutdown signal
    let report = scheduler.run(shutdown_signal()).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
        Err(e) => error!(error = %e, "Metrics server task failed"),
    }

    info!(cleaned = report.cleaned, "Exiting");
    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
}
