//! Dispersion statistics and reliability scoring across runs.
//!
//! [`VarianceCalculator`] turns a batch of [`RunOutcome`](crate::runner::RunOutcome)s
//! into [`VarianceMetrics`]: success rate with a Wilson interval, mean / std /
//! CV and a t interval for duration, tokens and quality, Tukey outliers, and a
//! composite reliability score with a `High` / `Medium` / `Low` label.

pub mod calculator;
pub mod stats;

pub use calculator::{
    reliability_score, MetricStats, ReliabilityLabel, VarianceCalculator, VarianceMetrics,
    DEFAULT_CONFIDENCE_LEVEL, HIGH_RELIABILITY_THRESHOLD, MEDIUM_RELIABILITY_THRESHOLD,
};
pub use stats::ConfidenceInterval;
