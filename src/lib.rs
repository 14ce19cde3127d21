//! consistency-bench: self-consistency evaluation for AI agent frameworks.
//!
//! Runs a benchmark N times under controlled seeds, aggregates the per-run
//! verdicts by voting, measures dispersion of duration, tokens and quality,
//! and writes a versioned JSON report that dashboards can fold together.

// Core modules
pub mod cli;
pub mod consensus;
pub mod error;
pub mod evaluation;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod variance;

// Re-export commonly used types
pub use consensus::{ConsensusAnalyzer, ConsensusResult, VotingStrategy};
pub use error::{BenchmarkError, ConfigError, ReportError, SeedError};
pub use evaluation::{ConsistencyEvaluator, EvaluationConfig, EvaluationOutcome};
pub use report::{aggregate_dashboard, ConsistencyReport, ConsistencyReporter, DashboardData};
pub use runner::{
    Benchmark, BenchmarkOutput, CommandBenchmark, FnBenchmark, MultiRunConfig, MultiRunExecutor,
    RunContext, RunOutcome, SeedGenerator,
};
pub use variance::{ReliabilityLabel, VarianceCalculator, VarianceMetrics};
