//! High-level metric recording for evaluations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with consistent
//! labeling. Every method is a no-op until `init_metrics()` has run, so
//! library users that never export metrics pay nothing.

use super::prometheus::metrics;

/// Records run and evaluation metrics.
///
/// # Example
///
/// ```ignore
/// use consistency_bench::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_run("langgraph", true, 12.5);
/// collector.record_evaluation("langgraph", "fizzbuzz", 0.91, "High");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Creates a collector.
    pub fn new() -> Self {
        Self
    }

    /// Records a finished run.
    pub fn record_run(&self, framework: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "failure" };

        if let Some(m) = metrics() {
            m.runs_total.with_label_values(&[framework, status]).inc();
            if duration_secs.is_finite() && duration_secs > 0.0 {
                m.run_duration
                    .with_label_values(&[framework])
                    .observe(duration_secs);
            }
        }

        tracing::trace!(
            framework = framework,
            status = status,
            duration_secs = duration_secs,
            "Recorded run metric"
        );
    }

    /// Records one retry attempt.
    pub fn record_retry(&self, framework: &str) {
        if let Some(m) = metrics() {
            m.run_retries_total.with_label_values(&[framework]).inc();
        }
    }

    /// Records a timed-out run.
    pub fn record_timeout(&self, framework: &str) {
        if let Some(m) = metrics() {
            m.run_timeouts_total.with_label_values(&[framework]).inc();
        }
    }

    /// Records a completed evaluation.
    pub fn record_evaluation(&self, framework: &str, task: &str, reliability_score: f64, label: &str) {
        if let Some(m) = metrics() {
            m.reliability_score
                .with_label_values(&[framework, task])
                .set(reliability_score);
            m.evaluations_total
                .with_label_values(&[framework, label])
                .inc();
        }

        tracing::trace!(
            framework = framework,
            task = task,
            reliability_score = reliability_score,
            label = label,
            "Recorded evaluation metric"
        );
    }
}
