//! Dispersion metrics and the composite reliability score.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runner::RunOutcome;

use super::stats::{
    coefficient_of_variation, mean, mean_interval, sample_std, tukey_outliers, wilson_interval,
    ConfidenceInterval,
};

/// Default confidence level for intervals.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Weight of the success rate in the reliability score.
const SUCCESS_RATE_WEIGHT: f64 = 0.6;

/// Weight of the duration stability term.
const DURATION_WEIGHT: f64 = 0.2;

/// Weight of the token stability term.
const TOKENS_WEIGHT: f64 = 0.2;

/// Score at or above which a batch is labelled `High`.
pub const HIGH_RELIABILITY_THRESHOLD: f64 = 0.8;

/// Score at or above which a batch is labelled `Medium`.
pub const MEDIUM_RELIABILITY_THRESHOLD: f64 = 0.6;

/// Coarse reliability bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReliabilityLabel {
    High,
    Medium,
    Low,
}

impl ReliabilityLabel {
    /// Label for a reliability score.
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_RELIABILITY_THRESHOLD {
            ReliabilityLabel::High
        } else if score >= MEDIUM_RELIABILITY_THRESHOLD {
            ReliabilityLabel::Medium
        } else {
            ReliabilityLabel::Low
        }
    }

    /// Label name as written in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReliabilityLabel::High => "High",
            ReliabilityLabel::Medium => "Medium",
            ReliabilityLabel::Low => "Low",
        }
    }
}

impl fmt::Display for ReliabilityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics of one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub samples: usize,
    pub mean: f64,
    pub std: f64,
    /// Coefficient of variation, 0 when the mean is not positive.
    pub cv: f64,
    pub min: f64,
    pub max: f64,
    pub confidence_interval: ConfidenceInterval,
}

impl MetricStats {
    /// Computes stats for a non-empty series.
    pub fn from_values(values: &[f64], confidence: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let m = mean(values);
        let std = sample_std(values);
        Some(Self {
            samples: values.len(),
            mean: m,
            std,
            cv: coefficient_of_variation(m, std),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            confidence_interval: mean_interval(values, confidence),
        })
    }
}

/// Dispersion and reliability summary for a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceMetrics {
    pub total_runs: usize,
    pub successful_runs: usize,
    /// Computed over all runs.
    pub success_rate: f64,
    pub success_rate_ci: ConfidenceInterval,
    /// Over successful runs with a positive duration.
    pub duration: Option<MetricStats>,
    /// Over successful runs reporting tokens.
    pub tokens: Option<MetricStats>,
    /// Over successful runs reporting a quality score.
    pub quality: Option<MetricStats>,
    pub reliability_score: f64,
    pub reliability_label: ReliabilityLabel,
    /// Indices into the successful-runs subsequence.
    pub outliers: Vec<usize>,
    pub confidence_level: f64,
}

impl VarianceMetrics {
    /// All-zero metrics labelled `Low`.
    pub fn empty(total_runs: usize, confidence_level: f64) -> Self {
        Self {
            total_runs,
            successful_runs: 0,
            success_rate: 0.0,
            success_rate_ci: wilson_interval(0, total_runs, confidence_level),
            duration: None,
            tokens: None,
            quality: None,
            reliability_score: 0.0,
            reliability_label: ReliabilityLabel::Low,
            outliers: Vec::new(),
            confidence_level,
        }
    }
}

/// Composite reliability score in `[0, 1]`.
///
/// `0.6 * success_rate + 0.2 * (1 - cv_duration) + 0.2 * (1 - cv_tokens)` with
/// both CVs clamped to `[0, 1]`. A missing CV contributes its full weight.
pub fn reliability_score(success_rate: f64, duration_cv: Option<f64>, tokens_cv: Option<f64>) -> f64 {
    let stability = |cv: Option<f64>| 1.0 - cv.unwrap_or(0.0).clamp(0.0, 1.0);
    let score = SUCCESS_RATE_WEIGHT * success_rate
        + DURATION_WEIGHT * stability(duration_cv)
        + TOKENS_WEIGHT * stability(tokens_cv);
    score.clamp(0.0, 1.0)
}

/// Computes [`VarianceMetrics`] from run outcomes.
#[derive(Debug, Clone, Copy)]
pub struct VarianceCalculator {
    confidence_level: f64,
}

impl Default for VarianceCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_LEVEL)
    }
}

impl VarianceCalculator {
    /// Creates a calculator for the given confidence level.
    pub fn new(confidence_level: f64) -> Self {
        Self { confidence_level }
    }

    /// Confidence level used for intervals.
    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Calculates metrics. Pure: the same outcomes always give the same result.
    pub fn calculate(&self, outcomes: &[RunOutcome]) -> VarianceMetrics {
        let total = outcomes.len();
        let successful: Vec<&RunOutcome> = outcomes.iter().filter(|o| o.success).collect();

        if successful.is_empty() {
            return VarianceMetrics::empty(total, self.confidence_level);
        }

        let success_rate = successful.len() as f64 / total as f64;
        let success_rate_ci = wilson_interval(successful.len(), total, self.confidence_level);

        // (position in successful subsequence, value)
        let durations: Vec<(usize, f64)> = successful
            .iter()
            .enumerate()
            .filter(|(_, o)| o.has_timing())
            .map(|(i, o)| (i, o.duration))
            .collect();
        let tokens: Vec<f64> = successful
            .iter()
            .filter_map(|o| o.tokens_used.map(|t| t as f64))
            .collect();
        let quality: Vec<(usize, f64)> = successful
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.quality_score.map(|q| (i, q)))
            .collect();

        let duration_values: Vec<f64> = durations.iter().map(|(_, v)| *v).collect();
        let quality_values: Vec<f64> = quality.iter().map(|(_, v)| *v).collect();

        let duration = MetricStats::from_values(&duration_values, self.confidence_level);
        let tokens = MetricStats::from_values(&tokens, self.confidence_level);
        let quality_stats = MetricStats::from_values(&quality_values, self.confidence_level);

        let mut outliers = BTreeSet::new();
        for i in tukey_outliers(&duration_values) {
            outliers.insert(durations[i].0);
        }
        for i in tukey_outliers(&quality_values) {
            outliers.insert(quality[i].0);
        }

        let score = reliability_score(
            success_rate,
            duration.as_ref().map(|d| d.cv),
            tokens.as_ref().map(|t| t.cv),
        );
        let label = ReliabilityLabel::from_score(score);

        debug!(
            total_runs = total,
            successful_runs = successful.len(),
            success_rate,
            reliability_score = score,
            reliability_label = %label,
            "Variance metrics calculated"
        );

        VarianceMetrics {
            total_runs: total,
            successful_runs: successful.len(),
            success_rate,
            success_rate_ci,
            duration,
            tokens,
            quality: quality_stats,
            reliability_score: score,
            reliability_label: label,
            outliers: outliers.into_iter().collect(),
            confidence_level: self.confidence_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn run(index: usize, success: bool, duration: f64, tokens: Option<u64>) -> RunOutcome {
        RunOutcome {
            run_index: index,
            seed: 42 + index as u64,
            temperature: None,
            success,
            verified_pass: success,
            quality_score: None,
            duration,
            tokens_used: tokens,
            error: if success { None } else { Some("boom".to_string()) },
            attempts: 1,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_label_thresholds() {
        assert_eq!(ReliabilityLabel::from_score(0.8), ReliabilityLabel::High);
        assert_eq!(ReliabilityLabel::from_score(0.79), ReliabilityLabel::Medium);
        assert_eq!(ReliabilityLabel::from_score(0.6), ReliabilityLabel::Medium);
        assert_eq!(ReliabilityLabel::from_score(0.59), ReliabilityLabel::Low);
        assert_eq!(ReliabilityLabel::High.to_string(), "High");
    }

    #[test]
    fn test_reliability_score_formula() {
        assert!((reliability_score(1.0, Some(0.0), Some(0.0)) - 1.0).abs() < 1e-12);
        assert!((reliability_score(0.5, Some(0.5), None) - 0.6).abs() < 1e-12);
        assert!((reliability_score(0.5, Some(0.5), Some(0.25)) - 0.55).abs() < 1e-12);
        // CVs above 1 are clamped.
        assert!((reliability_score(1.0, Some(3.0), Some(3.0)) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_is_low() {
        let metrics = VarianceCalculator::default().calculate(&[]);
        assert_eq!(metrics.total_runs, 0);
        assert_eq!(metrics.reliability_score, 0.0);
        assert_eq!(metrics.reliability_label, ReliabilityLabel::Low);
        assert!(metrics.duration.is_none());
    }

    #[test]
    fn test_all_failed_is_low() {
        let outcomes = vec![run(0, false, 1.0, None), run(1, false, 2.0, None)];
        let metrics = VarianceCalculator::default().calculate(&outcomes);
        assert_eq!(metrics.successful_runs, 0);
        assert_eq!(metrics.reliability_label, ReliabilityLabel::Low);
        assert!(metrics.success_rate_ci.lower < 1e-12);
        assert!(metrics.success_rate_ci.upper > 0.0);
    }

    #[test]
    fn test_stable_runs_are_high() {
        let outcomes: Vec<RunOutcome> = (0..5)
            .map(|i| run(i, true, 10.0 + i as f64 * 0.01, Some(1000)))
            .collect();
        let metrics = VarianceCalculator::default().calculate(&outcomes);

        assert_eq!(metrics.success_rate, 1.0);
        assert!(metrics.reliability_score > 0.8);
        assert_eq!(metrics.reliability_label, ReliabilityLabel::High);
        assert_eq!(metrics.tokens.as_ref().unwrap().cv, 0.0);
    }

    #[test]
    fn test_one_of_three_is_not_high() {
        let outcomes = vec![
            run(0, true, 5.0, None),
            run(1, false, 1.0, None),
            run(2, false, 1.0, None),
        ];
        let metrics = VarianceCalculator::default().calculate(&outcomes);
        assert!((metrics.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_ne!(metrics.reliability_label, ReliabilityLabel::High);
        assert!(metrics.tokens.is_none());
    }

    #[test]
    fn test_zero_durations_excluded_from_timing() {
        let outcomes = vec![run(0, true, 0.0, None), run(1, true, 4.0, None)];
        let metrics = VarianceCalculator::default().calculate(&outcomes);
        assert_eq!(metrics.duration.as_ref().unwrap().samples, 1);
        assert_eq!(metrics.duration.as_ref().unwrap().mean, 4.0);
    }

    #[test]
    fn test_outliers_index_successful_subsequence() {
        let mut outcomes = vec![run(0, false, 1.0, None)];
        outcomes.extend((1..6).map(|i| run(i, true, 10.0, None)));
        outcomes.push(run(6, true, 95.0, None));

        let metrics = VarianceCalculator::default().calculate(&outcomes);
        // Run 6 is the sixth successful run.
        assert_eq!(metrics.outliers, vec![5]);
    }

    #[test]
    fn test_quality_outliers_are_unioned() {
        let mut outcomes: Vec<RunOutcome> = (0..5).map(|i| run(i, true, 10.0, None)).collect();
        for o in outcomes.iter_mut() {
            o.quality_score = Some(0.9);
        }
        outcomes[1].quality_score = Some(0.1);
        outcomes[3].duration = 80.0;

        let metrics = VarianceCalculator::default().calculate(&outcomes);
        assert_eq!(metrics.outliers, vec![1, 3]);
        assert!(metrics.quality.is_some());
    }

    #[test]
    fn test_calculation_is_idempotent() {
        let outcomes = vec![
            run(0, true, 10.0, Some(500)),
            run(1, true, 12.5, Some(640)),
            run(2, false, 3.0, None),
            run(3, true, 9.1, Some(480)),
        ];
        let calc = VarianceCalculator::new(0.99);
        let first = calc.calculate(&outcomes);
        let second = calc.calculate(&outcomes);
        assert_eq!(first, second);
        assert_eq!(
            first.reliability_score.to_bits(),
            second.reliability_score.to_bits()
        );
    }
}
