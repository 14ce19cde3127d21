//! Prometheus metrics registration and export.
//!
//! Defines the metrics recorded during evaluations and functions for
//! initializing and exporting them.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// The registry and every metric recorded during evaluations.
///
/// Installed as a whole, so a reader never sees metrics from one
/// initialization next to a registry from another.
#[derive(Debug)]
pub struct ConsistencyMetrics {
    /// Registry all metrics below are registered with.
    pub registry: Registry,
    /// Total benchmark runs, labeled by framework and status (success/failure).
    pub runs_total: CounterVec,
    /// Run duration in seconds, labeled by framework.
    pub run_duration: HistogramVec,
    /// Total retry attempts, labeled by framework.
    pub run_retries_total: CounterVec,
    /// Total timed-out runs, labeled by framework.
    pub run_timeouts_total: CounterVec,
    /// Latest reliability score, labeled by framework and task.
    pub reliability_score: GaugeVec,
    /// Total evaluations, labeled by framework and reliability label.
    pub evaluations_total: CounterVec,
}

static METRICS: OnceLock<ConsistencyMetrics> = OnceLock::new();

/// Returns the installed metrics, or `None` before `init_metrics()`.
pub fn metrics() -> Option<&'static ConsistencyMetrics> {
    METRICS.get()
}

/// Initialize all metrics and register them with the registry.
///
/// Calling it again after a successful initialization is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("consistency_runs_total", "Total benchmark runs executed"),
        &["framework", "status"],
    )?;

    let run_duration = HistogramVec::new(
        HistogramOpts::new(
            "consistency_run_duration_seconds",
            "Benchmark run duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["framework"],
    )?;

    let run_retries_total = CounterVec::new(
        Opts::new("consistency_run_retries_total", "Total run retry attempts"),
        &["framework"],
    )?;

    let run_timeouts_total = CounterVec::new(
        Opts::new("consistency_run_timeouts_total", "Total runs that timed out"),
        &["framework"],
    )?;

    let reliability_score = GaugeVec::new(
        Opts::new(
            "consistency_reliability_score",
            "Reliability score of the latest evaluation",
        ),
        &["framework", "task"],
    )?;

    let evaluations_total = CounterVec::new(
        Opts::new("consistency_evaluations_total", "Total evaluations completed"),
        &["framework", "label"],
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(run_retries_total.clone()))?;
    registry.register(Box::new(run_timeouts_total.clone()))?;
    registry.register(Box::new(reliability_score.clone()))?;
    registry.register(Box::new(evaluations_total.clone()))?;

    // A concurrent initializer may have won; its set stays in place.
    let _ = METRICS.set(ConsistencyMetrics {
        registry,
        runs_total,
        run_duration,
        run_retries_total,
        run_timeouts_total,
        reliability_score,
        evaluations_total,
    });

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of failing when metrics are not initialized
/// or encoding fails.
pub fn export_metrics() -> String {
    let Some(installed) = metrics() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = installed.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
