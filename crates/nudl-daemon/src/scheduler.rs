//! Periodic, single-flight reconciliation with an orderly shutdown
//!
//! Every tick tries to take the in-flight lock without waiting. If a cycle is
//! still running the tick is dropped, so cycles never overlap and never queue
//! up. Shutdown takes the same lock with waiting, which drains the cycle in
//! flight before the node is cleaned up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::reconcile::{CycleError, CycleReport, Reconciler};
use crate::state::{SchedulerState, StateHandle};

/// Result of a deliberate shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether every managed label was removed from the node
    pub cleaned: bool,
}

impl ShutdownReport {
    /// Conventional status for a process stopped by a signal
    pub const EXIT_CODE: i32 = 130;

    pub fn exit_code(&self) -> i32 {
        Self::EXIT_CODE
    }
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    in_flight: Arc<Mutex<()>>,
    cancel: CancellationToken,
    state: StateHandle,
    endpoint: Option<CancellationToken>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            in_flight: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
            state: StateHandle::new(),
            endpoint: None,
        }
    }

    /// Token that stops the metrics endpoint once cleanup is done
    pub fn with_endpoint(mut self, stop: CancellationToken) -> Self {
        self.endpoint = Some(stop);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Start a cycle unless one is already running or shutdown has begun
    pub fn try_start_cycle(&self) -> Option<JoinHandle<()>> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let guard = match self.in_flight.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(state = %self.state.get(), "Previous cycle still running, skipping tick");
                self.reconciler.metrics().skipped();
                return None;
            }
        };

        let reconciler = self.reconciler.clone();
        let cancel = self.cancel.clone();
        let state = self.state.clone();
        Some(tokio::spawn(async move {
            let result = reconciler.run_cycle(&cancel, &state).await;
            record_outcome(reconciler.metrics(), reconciler.node(), &result);
            state.set(SchedulerState::Idle);
            drop(guard);
        }))
    }

    /// Tick until `shutdown` resolves, then shut down.
    ///
    /// The first cycle starts immediately.
    pub async fn run<F>(&self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            node = %self.reconciler.node(),
            interval = ?self.interval,
            "Starting reconcile loop"
        );

        // Tick until a shutdown signal
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.try_start_cycle();
                }
            }
        }

        self.shutdown().await
    }

    /// Stop new work, wait for the running cycle, remove managed labels and
    /// stop the metrics endpoint
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down");

        // Stop new cycles
        self.cancel.cancel();
        self.state.set(SchedulerState::ShuttingDown);

        // Wait for the cycle in flight
        let _guard = self.in_flight.clone().lock_owned().await;
        debug!("No cycle in flight, cleaning up");

        // Remove managed labels
        let cleaned = match self.reconciler.cleanup().await {
            Ok(record) => {
                info!(node = %record.name, "Removed managed labels");
                true
            }
            Err(e) => {
                error!(node = %self.reconciler.node(), error = %e, "Failed to clean up node labels");
                false
            }
        };

        // Stop the metrics endpoint
        if let Some(stop) = &self.endpoint {
            stop.cancel();
        }

        ShutdownReport { cleaned }
    }
}

fn record_outcome(metrics: &Metrics, node: &str, result: &Result<CycleReport, CycleError>) {
    match result {
        Ok(report) => {
            metrics.record_cycle(true);
            debug!(
                node = %node,
                devices = report.devices_scanned,
                labels = report.labels,
                changes = report.patch.len(),
                "Reconcile cycle finished"
            );
        }
        Err(CycleError::Cancelled) => {
            info!(node = %node, "Reconcile cycle cancelled by shutdown");
        }
        Err(e) => {
            metrics.record_cycle(false);
            warn!(node = %node, error = %e, "Reconcile cycle failed");
        }
    }
}
