//! Consensus over run verdicts.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::runner::RunOutcome;
use crate::variance::stats::{tukey_outliers, MIN_OUTLIER_SAMPLES};

use super::agreement::AgreementMetrics;
use super::strategy::VotingStrategy;

/// Default pass fraction for the threshold strategy.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Weighted score above which the weighted strategy passes.
const WEIGHTED_DECISION_BOUNDARY: f64 = 0.5;

/// Aggregate decision over a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_pass: bool,
    /// Strength of the verdict in `[0, 1]`.
    pub confidence: f64,
    pub total_votes: usize,
    pub pass_votes: usize,
    pub fail_votes: usize,
    /// Present only when the weighted strategy was applied.
    pub weighted_score: Option<f64>,
    /// Run indices removed before voting.
    pub outliers_excluded: Vec<usize>,
    /// Strategy actually applied.
    pub strategy: VotingStrategy,
    /// Strategy that was asked for; differs when quality data was missing.
    pub requested_strategy: VotingStrategy,
    /// Cutoff, for the threshold strategy.
    pub threshold: Option<f64>,
    /// Run index whose verdict decided a best-of-N vote.
    pub best_run: Option<usize>,
    pub agreement: AgreementMetrics,
}

impl ConsensusResult {
    /// Fraction of pass votes, 0 without votes.
    pub fn pass_ratio(&self) -> f64 {
        if self.total_votes == 0 {
            0.0
        } else {
            self.pass_votes as f64 / self.total_votes as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    run_index: usize,
    pass: bool,
    quality: Option<f64>,
}

impl Vote {
    fn weight(&self) -> f64 {
        self.quality.unwrap_or(1.0)
    }

    fn tukey_value(&self) -> f64 {
        self.quality
            .unwrap_or(if self.pass { 1.0 } else { 0.0 })
    }
}

/// Turns run outcomes into a [`ConsensusResult`].
#[derive(Debug, Clone, Copy)]
pub struct ConsensusAnalyzer {
    strategy: VotingStrategy,
    threshold: f64,
    exclude_outliers: bool,
}

impl Default for ConsensusAnalyzer {
    fn default() -> Self {
        Self {
            strategy: VotingStrategy::Majority,
            threshold: DEFAULT_THRESHOLD,
            exclude_outliers: true,
        }
    }
}

impl ConsensusAnalyzer {
    /// Creates an analyzer for a strategy with default threshold and outlier exclusion.
    pub fn new(strategy: VotingStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Sets the threshold used by [`VotingStrategy::Threshold`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidThreshold` outside `[0, 1]`.
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        self.threshold = threshold;
        Ok(self)
    }

    /// Enables or disables Tukey outlier exclusion.
    pub fn with_outlier_exclusion(mut self, enabled: bool) -> Self {
        self.exclude_outliers = enabled;
        self
    }

    pub fn strategy(&self) -> VotingStrategy {
        self.strategy
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Analyzes a batch.
    ///
    /// Failed runs vote fail. Outlier exclusion only considers successful
    /// runs and needs at least three of them.
    pub fn analyze(&self, outcomes: &[RunOutcome]) -> ConsensusResult {
        let (valid, failed): (Vec<&RunOutcome>, Vec<&RunOutcome>) =
            outcomes.iter().partition(|o| o.success);

        if valid.is_empty() {
            return self.no_valid_runs(outcomes.len());
        }

        let mut valid_votes: Vec<Vote> = valid
            .iter()
            .map(|o| Vote {
                run_index: o.run_index,
                pass: o.verified_pass,
                quality: o.quality_score,
            })
            .collect();

        let mut outliers_excluded = Vec::new();
        if self.exclude_outliers && valid_votes.len() >= MIN_OUTLIER_SAMPLES {
            let values: Vec<f64> = valid_votes.iter().map(Vote::tukey_value).collect();
            let flagged = tukey_outliers(&values);
            if !flagged.is_empty() {
                outliers_excluded = flagged.iter().map(|&i| valid_votes[i].run_index).collect();
                valid_votes = valid_votes
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !flagged.contains(i))
                    .map(|(_, v)| v)
                    .collect();
            }
        }

        let has_quality = valid_votes.iter().any(|v| v.quality.is_some());

        let mut votes = valid_votes;
        votes.extend(failed.iter().map(|o| Vote {
            run_index: o.run_index,
            pass: false,
            quality: None,
        }));
        votes.sort_by_key(|v| v.run_index);

        let total = votes.len();
        let pass_votes = votes.iter().filter(|v| v.pass).count();
        let fail_votes = total - pass_votes;
        let verdicts: Vec<bool> = votes.iter().map(|v| v.pass).collect();

        let mut result = ConsensusResult {
            consensus_pass: false,
            confidence: 0.0,
            total_votes: total,
            pass_votes,
            fail_votes,
            weighted_score: None,
            outliers_excluded,
            strategy: self.strategy,
            requested_strategy: self.strategy,
            threshold: None,
            best_run: None,
            agreement: AgreementMetrics::from_verdicts(&verdicts),
        };

        if total == 0 {
            return result;
        }

        let effective = if self.strategy.uses_quality() && !has_quality {
            debug!(
                requested = %self.strategy,
                "No quality scores present, falling back to majority vote"
            );
            VotingStrategy::Majority
        } else {
            self.strategy
        };
        result.strategy = effective;

        let agreeing = |decision: bool| {
            let n = if decision { pass_votes } else { fail_votes };
            n as f64 / total as f64
        };

        match effective {
            VotingStrategy::Majority => {
                result.consensus_pass = pass_votes > fail_votes;
                result.confidence = pass_votes.max(fail_votes) as f64 / total as f64;
            }
            VotingStrategy::Weighted => {
                let total_weight: f64 = votes.iter().map(Vote::weight).sum();
                let pass_weight: f64 = votes.iter().filter(|v| v.pass).map(Vote::weight).sum();
                let score = if total_weight > 0.0 {
                    pass_weight / total_weight
                } else {
                    0.0
                };
                result.weighted_score = Some(score);
                result.consensus_pass = score > WEIGHTED_DECISION_BOUNDARY;
                result.confidence = ((score - WEIGHTED_DECISION_BOUNDARY).abs() * 2.0).min(1.0);
            }
            VotingStrategy::Unanimous => {
                result.consensus_pass = fail_votes == 0;
                result.confidence = agreeing(result.consensus_pass);
            }
            VotingStrategy::Threshold => {
                result.threshold = Some(self.threshold);
                result.consensus_pass = pass_votes as f64 / total as f64 >= self.threshold;
                result.confidence = agreeing(result.consensus_pass);
            }
            VotingStrategy::BestOfN => {
                // Ties keep the lowest run index.
                let best = votes
                    .iter()
                    .filter_map(|v| v.quality.map(|q| (v, OrderedFloat(q))))
                    .fold(None::<(&Vote, OrderedFloat<f64>)>, |best, (v, q)| match best {
                        Some((_, bq)) if bq >= q => best,
                        _ => Some((v, q)),
                    });
                if let Some((vote, _)) = best {
                    result.best_run = Some(vote.run_index);
                    result.consensus_pass = vote.pass;
                    result.confidence = agreeing(vote.pass);
                }
            }
        }

        debug!(
            strategy = %result.strategy,
            consensus_pass = result.consensus_pass,
            confidence = result.confidence,
            pass_votes,
            fail_votes,
            outliers = result.outliers_excluded.len(),
            "Consensus analyzed"
        );

        result
    }

    fn no_valid_runs(&self, runs: usize) -> ConsensusResult {
        ConsensusResult {
            consensus_pass: false,
            confidence: 0.0,
            total_votes: runs,
            pass_votes: 0,
            fail_votes: runs,
            weighted_score: None,
            outliers_excluded: Vec::new(),
            strategy: self.strategy,
            requested_strategy: self.strategy,
            threshold: (self.strategy == VotingStrategy::Threshold).then_some(self.threshold),
            best_run: None,
            agreement: AgreementMetrics::from_verdicts(&vec![false; runs]),
        }
    }
}
