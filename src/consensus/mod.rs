//! Consensus over repeated run verdicts.
//!
//! [`ConsensusAnalyzer`] reduces a batch of outcomes to one pass/fail decision
//! with a confidence in `[0, 1]`:
//!
//! 1. failed runs become fail votes,
//! 2. successful runs vote their `verified_pass`, optionally after Tukey
//!    outlier exclusion on quality (or the 1/0 verdict when quality is absent),
//! 3. a [`VotingStrategy`] turns the votes into a decision.
//!
//! [`AgreementMetrics`] (pairwise agreement and binary Fleiss' kappa) are
//! attached for diagnostics and never influence the decision.

pub mod agreement;
pub mod analyzer;
pub mod strategy;

pub use agreement::{fleiss_kappa, pairwise_agreement, AgreementMetrics};
pub use analyzer::{ConsensusAnalyzer, ConsensusResult, DEFAULT_THRESHOLD};
pub use strategy::VotingStrategy;
