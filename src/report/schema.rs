//! Versioned report schema.
//!
//! A [`ConsistencyReport`] is the append-only record of one evaluation. Its
//! JSON layout is stable within a `schema_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::consensus::{AgreementMetrics, ConsensusResult, VotingStrategy};
use crate::runner::{BatchResult, ExecutionMode, RunOutcome, SeedStrategy};
use crate::variance::{ConfidenceInterval, MetricStats, ReliabilityLabel, VarianceMetrics};

/// Current report schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Counts and seeds of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    /// Seeds in run order.
    pub seeds: Vec<u64>,
    pub seed_strategy: SeedStrategy,
    pub base_seed: u64,
    /// `local`, `external` or `local_fallback`.
    pub seed_source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed_notes: Vec<String>,
    pub execution_mode: ExecutionMode,
    pub workers: usize,
    pub wall_time_secs: f64,
    #[serde(default)]
    pub batch_timed_out: bool,
}

/// Consensus decision and vote breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSection {
    pub decision: bool,
    pub confidence: f64,
    pub strategy: VotingStrategy,
    pub requested_strategy: VotingStrategy,
    pub total_votes: usize,
    pub pass_votes: usize,
    pub fail_votes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_run: Option<usize>,
    pub outliers_excluded: Vec<usize>,
    pub agreement: AgreementMetrics,
}

impl From<&ConsensusResult> for ConsensusSection {
    fn from(result: &ConsensusResult) -> Self {
        Self {
            decision: result.consensus_pass,
            confidence: result.confidence,
            strategy: result.strategy,
            requested_strategy: result.requested_strategy,
            total_votes: result.total_votes,
            pass_votes: result.pass_votes,
            fail_votes: result.fail_votes,
            weighted_score: result.weighted_score,
            threshold: result.threshold,
            best_run: result.best_run,
            outliers_excluded: result.outliers_excluded.clone(),
            agreement: result.agreement,
        }
    }
}

/// Success rate and per-series statistics. Series without data are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceSection {
    pub success_rate: f64,
    pub success_rate_ci: ConfidenceInterval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<MetricStats>,
    pub confidence_level: f64,
}

/// Composite reliability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilitySection {
    pub score: f64,
    pub label: ReliabilityLabel,
    /// Indices into the successful-runs subsequence.
    pub outliers: Vec<usize>,
}

/// One formatted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_index: usize,
    pub seed: u64,
    pub success: bool,
    pub verified_pass: bool,
    pub duration: f64,
    pub tokens_used: Option<u64>,
    pub quality_score: Option<f64>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl From<&RunOutcome> for RunRecord {
    fn from(outcome: &RunOutcome) -> Self {
        Self {
            run_index: outcome.run_index,
            seed: outcome.seed,
            success: outcome.success,
            verified_pass: outcome.verified_pass,
            duration: outcome.duration,
            tokens_used: outcome.tokens_used,
            quality_score: outcome.quality_score,
            error: outcome.error.clone(),
            temperature: outcome.temperature,
            attempts: outcome.attempts,
            metadata: outcome.metadata.clone(),
        }
    }
}

/// The persisted result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub schema_version: String,
    /// Unique id, also used to disambiguate filenames.
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub framework: String,
    pub task: String,
    pub run_summary: RunSummary,
    pub consensus: ConsensusSection,
    pub variance: VarianceSection,
    pub reliability: ReliabilitySection,
    /// One record per run, in run index order.
    pub individual_runs: Vec<RunRecord>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConsistencyReport {
    /// Assembles a report from a batch and its analyses.
    pub fn assemble(
        framework: &str,
        task: &str,
        batch: &BatchResult,
        consensus: &ConsensusResult,
        variance: &VarianceMetrics,
        metadata: Map<String, Value>,
    ) -> Self {
        let mut individual_runs: Vec<RunRecord> = batch.outcomes.iter().map(RunRecord::from).collect();
        individual_runs.sort_by_key(|r| r.run_index);

        let seed_notes = batch.seed_plan.provenance.note().into_iter().collect();

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            framework: framework.to_string(),
            task: task.to_string(),
            run_summary: RunSummary {
                total_runs: batch.outcomes.len(),
                successful_runs: batch.successful_runs(),
                failed_runs: batch.failed_runs(),
                seeds: batch.seeds(),
                seed_strategy: batch.seed_plan.strategy,
                base_seed: batch.seed_plan.base_seed,
                seed_source: batch.seed_plan.provenance.label().to_string(),
                seed_notes,
                execution_mode: batch.mode,
                workers: batch.workers,
                wall_time_secs: batch.wall_time_secs,
                batch_timed_out: batch.batch_timed_out,
            },
            consensus: ConsensusSection::from(consensus),
            variance: VarianceSection {
                success_rate: variance.success_rate,
                success_rate_ci: variance.success_rate_ci,
                duration: variance.duration.clone(),
                tokens: variance.tokens.clone(),
                quality: variance.quality.clone(),
                confidence_level: variance.confidence_level,
            },
            reliability: ReliabilitySection {
                score: variance.reliability_score,
                label: variance.reliability_label,
                outliers: variance.outliers.clone(),
            },
            individual_runs,
            metadata,
        }
    }

    /// First eight hex characters of the report id.
    pub fn short_id(&self) -> String {
        self.report_id.simple().to_string()[..8].to_string()
    }

    /// Durations of successful runs with usable timing.
    pub fn successful_durations(&self) -> Vec<f64> {
        self.individual_runs
            .iter()
            .filter(|r| r.success && r.duration.is_finite() && r.duration > 0.0)
            .map(|r| r.duration)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusAnalyzer;
    use crate::runner::{SeedPlan, SeedProvenance};
    use crate::variance::VarianceCalculator;

    fn outcome(index: usize, success: bool, duration: f64) -> RunOutcome {
        RunOutcome {
            run_index: index,
            seed: 42 + index as u64,
            temperature: None,
            success,
            verified_pass: success,
            quality_score: None,
            duration,
            tokens_used: Some(100),
            error: (!success).then(|| "boom".to_string()),
            attempts: 1,
            metadata: Map::new(),
        }
    }

    fn sample_batch() -> BatchResult {
        let outcomes = vec![outcome(0, true, 10.0), outcome(1, false, 0.0), outcome(2, true, 11.0)];
        BatchResult {
            seed_plan: SeedPlan {
                strategy: SeedStrategy::Sequential,
                base_seed: 42,
                seeds: vec![42, 43, 44],
                provenance: SeedProvenance::LocalFallback {
                    source: "seed-service".to_string(),
                    reason: "timeout".to_string(),
                },
            },
            outcomes,
            mode: ExecutionMode::Parallel,
            workers: 3,
            started_at: Utc::now(),
            wall_time_secs: 11.2,
            batch_timed_out: false,
        }
    }

    #[test]
    fn test_assemble_report() {
        let batch = sample_batch();
        let consensus = ConsensusAnalyzer::default().analyze(&batch.outcomes);
        let variance = VarianceCalculator::default().calculate(&batch.outcomes);
        let report = ConsistencyReport::assemble("haystack", "qa", &batch, &consensus, &variance, Map::new());

        assert_eq!(report.schema_version, "1.0");
        assert_eq!(report.run_summary.total_runs, 3);
        assert_eq!(report.run_summary.failed_runs, 1);
        assert_eq!(report.run_summary.seeds, vec![42, 43, 44]);
        assert_eq!(report.run_summary.seed_source, "local_fallback");
        assert_eq!(report.run_summary.seed_notes.len(), 1);
        assert_eq!(report.individual_runs.len(), 3);
        assert_eq!(report.consensus.decision, consensus.consensus_pass);
        assert_eq!(report.reliability.score, variance.reliability_score);
        assert_eq!(report.successful_durations(), vec![10.0, 11.0]);
        assert_eq!(report.short_id().len(), 8);
    }

    #[test]
    fn test_optional_sections_omitted() {
        let mut batch = sample_batch();
        for o in batch.outcomes.iter_mut() {
            o.tokens_used = None;
        }
        let consensus = ConsensusAnalyzer::default().analyze(&batch.outcomes);
        let variance = VarianceCalculator::default().calculate(&batch.outcomes);
        let report = ConsistencyReport::assemble("f", "t", &batch, &consensus, &variance, Map::new());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["variance"].get("tokens").is_none());
        assert!(json["variance"].get("quality").is_none());
        assert!(json["variance"].get("duration").is_some());
        assert!(json["consensus"].get("weighted_score").is_none());
        assert_eq!(json["reliability"]["label"], "Medium");
    }
}
