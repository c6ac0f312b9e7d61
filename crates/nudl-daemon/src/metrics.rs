//! Prometheus metrics for reconcile outcomes

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters and gauges shared between the scheduler and the `/metrics` handler
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciling: IntCounterVec,
    labels: IntGauge,
    scan_errors: IntCounter,
    skipped: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciling = IntCounterVec::new(
            Opts::new(
                "reconciling_counter",
                "Number of reconcile cycles, by outcome",
            ),
            &["success"],
        )?;
        registry.register(Box::new(reconciling.clone()))?;

        let labels = IntGauge::new(
            "number_labels",
            "Number of labels managed on the node after the last merge",
        )?;
        registry.register(Box::new(labels.clone()))?;

        let scan_errors = IntCounter::new(
            "usb_scan_errors_total",
            "Number of failed USB bus scans",
        )?;
        registry.register(Box::new(scan_errors.clone()))?;

        let skipped = IntCounter::new(
            "reconcile_skipped_total",
            "Number of ticks skipped because a cycle was still running",
        )?;
        registry.register(Box::new(skipped.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        // Both outcome series exist from the first scrape
        reconciling.with_label_values(&["true"]);
        reconciling.with_label_values(&["false"]);

        Ok(Self {
            registry,
            reconciling,
            labels,
            scan_errors,
            skipped,
        })
    }

    pub fn record_cycle(&self, success: bool) {
        let outcome = if success { "true" } else { "false" };
        self.reconciling.with_label_values(&[outcome]).inc();
    }

    pub fn set_labels(&self, count: usize) {
        self.labels.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn scan_error(&self) {
        self.scan_errors.inc();
    }

    pub fn skipped(&self) {
        self.skipped.inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
impl Metrics {
    pub fn cycles(&self, success: bool) -> u64 {
        let outcome = if success { "true" } else { "false" };
        self.reconciling.with_label_values(&[outcome]).get()
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped.get()
    }

    pub fn scan_error_count(&self) -> u64 {
        self.scan_errors.get()
    }

    pub fn label_count(&self) -> i64 {
        self.labels.get()
    }
}
