//! Cross-report aggregation for dashboards.
//!
//! Pure functions over already-parsed reports; no I/O.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::variance::stats::{mean, sample_std, wilson_interval};
use crate::variance::ReliabilityLabel;

use super::schema::ConsistencyReport;

/// Reliability overview of one framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSummary {
    pub framework: String,
    pub evaluations: usize,
    pub mean_reliability: f64,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Durations of successful runs for one framework and task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationDistribution {
    pub framework: String,
    pub task: String,
    pub durations: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

/// Pooled success rate for one framework and task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRatePoint {
    pub framework: String,
    pub task: String,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub success_rate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// Everything a dashboard needs to plot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub total_reports: usize,
    pub frameworks: Vec<String>,
    pub tasks: Vec<String>,
    pub framework_summaries: Vec<FrameworkSummary>,
    pub duration_distributions: Vec<DurationDistribution>,
    pub success_rates: Vec<SuccessRatePoint>,
}

#[derive(Default)]
struct PairAccumulator {
    durations: Vec<f64>,
    total_runs: usize,
    successful_runs: usize,
    confidence_level: f64,
}

/// Aggregates reports into dashboard series, sorted by framework then task.
pub fn aggregate_dashboard(reports: &[ConsistencyReport]) -> DashboardData {
    let mut frameworks = BTreeSet::new();
    let mut tasks = BTreeSet::new();
    let mut by_framework: BTreeMap<&str, Vec<&ConsistencyReport>> = BTreeMap::new();
    let mut by_pair: BTreeMap<(&str, &str), PairAccumulator> = BTreeMap::new();

    for report in reports {
        frameworks.insert(report.framework.clone());
        tasks.insert(report.task.clone());
        by_framework
            .entry(report.framework.as_str())
            .or_default()
            .push(report);

        let acc = by_pair
            .entry((report.framework.as_str(), report.task.as_str()))
            .or_default();
        acc.durations.extend(report.successful_durations());
        acc.total_runs += report.run_summary.total_runs;
        acc.successful_runs += report.run_summary.successful_runs;
        acc.confidence_level = report.variance.confidence_level;
    }

    let framework_summaries = by_framework
        .into_iter()
        .map(|(framework, group)| {
            let scores: Vec<f64> = group.iter().map(|r| r.reliability.score).collect();
            let count = |label: ReliabilityLabel| {
                group.iter().filter(|r| r.reliability.label == label).count()
            };
            FrameworkSummary {
                framework: framework.to_string(),
                evaluations: group.len(),
                mean_reliability: mean(&scores),
                high: count(ReliabilityLabel::High),
                medium: count(ReliabilityLabel::Medium),
                low: count(ReliabilityLabel::Low),
            }
        })
        .collect();

    let mut duration_distributions = Vec::with_capacity(by_pair.len());
    let mut success_rates = Vec::with_capacity(by_pair.len());

    for ((framework, task), acc) in by_pair {
        duration_distributions.push(DurationDistribution {
            framework: framework.to_string(),
            task: task.to_string(),
            mean: mean(&acc.durations),
            std: sample_std(&acc.durations),
            durations: acc.durations,
        });

        let ci = wilson_interval(acc.successful_runs, acc.total_runs, acc.confidence_level);
        success_rates.push(SuccessRatePoint {
            framework: framework.to_string(),
            task: task.to_string(),
            total_runs: acc.total_runs,
            successful_runs: acc.successful_runs,
            success_rate: if acc.total_runs == 0 {
                0.0
            } else {
                acc.successful_runs as f64 / acc.total_runs as f64
            },
            ci_lower: ci.lower,
            ci_upper: ci.upper,
        });
    }

    DashboardData {
        total_reports: reports.len(),
        frameworks: frameworks.into_iter().collect(),
        tasks: tasks.into_iter().collect(),
        framework_summaries,
        duration_distributions,
        success_rates,
    }
}
