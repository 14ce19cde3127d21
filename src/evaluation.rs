//! End-to-end consistency evaluation.
//!
//! Wires the executor, the two analyses and the reporter together:
//!
//! ```text
//! EvaluationConfig -> MultiRunExecutor -> BatchResult
//!                                           |-> ConsensusAnalyzer  -> ConsensusResult
//!                                           |-> VarianceCalculator -> VarianceMetrics
//!                                           `-> ConsistencyReport -> ConsistencyReporter::write
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::consensus::{ConsensusAnalyzer, ConsensusResult, VotingStrategy, DEFAULT_THRESHOLD};
use crate::error::{ConfigError, ReportError};
use crate::metrics::MetricsCollector;
use crate::report::{ConsistencyReport, ConsistencyReporter, DEFAULT_OUTPUT_DIR};
use crate::runner::config::parse_env_value;
use crate::runner::{BatchResult, Benchmark, MultiRunConfig, MultiRunExecutor, SeedSource};
use crate::variance::{VarianceCalculator, VarianceMetrics, DEFAULT_CONFIDENCE_LEVEL};

/// Environment variable overriding the number of runs.
pub const ENV_RUNS: &str = "CONSISTENCY_RUNS";

/// Environment variable overriding the report output directory.
pub const ENV_OUTPUT_DIR: &str = "CONSISTENCY_OUTPUT_DIR";

/// Environment variable overriding the base seed.
pub const ENV_BASE_SEED: &str = "CONSISTENCY_BASE_SEED";

/// Voting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub strategy: VotingStrategy,
    /// Pass fraction required by the threshold strategy.
    pub threshold: f64,
    /// Drop Tukey outliers among successful runs before voting.
    pub exclude_outliers: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            strategy: VotingStrategy::Majority,
            threshold: DEFAULT_THRESHOLD,
            exclude_outliers: true,
        }
    }
}

/// Dispersion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarianceConfig {
    pub confidence_level: f64,
}

impl Default for VarianceConfig {
    fn default() -> Self {
        Self {
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

/// Report persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub output_dir: PathBuf,
    /// Persist the report after the evaluation.
    pub write_report: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            write_report: true,
        }
    }
}

/// Full configuration of one evaluation.
///
/// # Example
///
/// ```yaml
/// framework: langgraph
/// task: fizzbuzz
/// run:
///   num_runs: 10
///   seed_strategy: random
///   timeout_per_run_secs: 120
/// consensus:
///   strategy: threshold
///   threshold: 0.7
/// reporter:
///   output_dir: ./reports
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub framework: String,
    pub task: String,
    pub run: MultiRunConfig,
    pub consensus: ConsensusConfig,
    pub variance: VarianceConfig,
    pub reporter: ReporterConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            framework: "unknown".to_string(),
            task: "unknown".to_string(),
            run: MultiRunConfig::default(),
            consensus: ConsensusConfig::default(),
            variance: VarianceConfig::default(),
            reporter: ReporterConfig::default(),
        }
    }
}

impl EvaluationConfig {
    /// Creates a configuration for one framework and task with defaults elsewhere.
    pub fn new(framework: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
            task: task.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the run configuration.
    pub fn with_run(mut self, run: MultiRunConfig) -> Self {
        self.run = run;
        self
    }

    /// Builder method to set the voting strategy.
    pub fn with_strategy(mut self, strategy: VotingStrategy) -> Self {
        self.consensus.strategy = strategy;
        self
    }

    /// Builder method to set the threshold strategy cutoff.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.consensus.threshold = threshold;
        self
    }

    /// Builder method to toggle outlier exclusion.
    pub fn with_outlier_exclusion(mut self, enabled: bool) -> Self {
        self.consensus.exclude_outliers = enabled;
        self
    }

    /// Builder method to set the confidence level.
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.variance.confidence_level = level;
        self
    }

    /// Builder method to set the report output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reporter.output_dir = dir.into();
        self
    }

    /// Builder method to toggle report persistence.
    pub fn with_write_report(mut self, write: bool) -> Self {
        self.reporter.write_report = write;
        self
    }

    /// Loads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` or `ConfigError::Yaml` when the file cannot
    /// be read or parsed. The result is not validated.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `CONSISTENCY_RUNS`: number of runs
    /// - `CONSISTENCY_OUTPUT_DIR`: report output directory
    /// - `CONSISTENCY_BASE_SEED`: base seed
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_RUNS) {
            self.run.num_runs = parse_env_value(&val, ENV_RUNS)?;
        }

        if let Some(val) = lookup(ENV_OUTPUT_DIR) {
            self.reporter.output_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup(ENV_BASE_SEED) {
            self.run.base_seed = parse_env_value(&val, ENV_BASE_SEED)?;
        }

        Ok(())
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.framework.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "framework".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.task.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "task".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        self.run.validate()?;

        let threshold = self.consensus.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        let level = self.variance.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(ConfigError::InvalidConfidenceLevel(level));
        }

        Ok(())
    }
}

/// Everything produced by one evaluation.
#[derive(Debug)]
pub struct EvaluationOutcome {
    pub report: ConsistencyReport,
    pub batch: BatchResult,
    pub consensus: ConsensusResult,
    pub variance: VarianceMetrics,
    /// Where the report was written, if it was.
    pub report_path: Option<PathBuf>,
    /// Why writing failed. The report above is still complete.
    pub write_error: Option<ReportError>,
}

impl EvaluationOutcome {
    /// True when persistence was requested and failed.
    pub fn write_failed(&self) -> bool {
        self.write_error.is_some()
    }
}

/// Runs a benchmark N times and produces a consistency report.
///
/// # Example
///
/// ```ignore
/// let config = EvaluationConfig::new("langgraph", "fizzbuzz")
///     .with_run(MultiRunConfig::new(10))
///     .with_strategy(VotingStrategy::Weighted);
/// let evaluator = ConsistencyEvaluator::new(config)?;
/// let outcome = evaluator.evaluate(Arc::new(CommandBenchmark::new("python run.py")), Map::new()).await?;
/// println!("{}", outcome.report.reliability.label);
/// ```
pub struct ConsistencyEvaluator {
    config: EvaluationConfig,
    executor: MultiRunExecutor,
    analyzer: ConsensusAnalyzer,
    calculator: VarianceCalculator,
    reporter: ConsistencyReporter,
    metrics: MetricsCollector,
}

impl ConsistencyEvaluator {
    /// Validates the configuration and builds every component.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` before any run is executed.
    pub fn new(config: EvaluationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let executor = MultiRunExecutor::new(config.run.clone())?;
        let analyzer = ConsensusAnalyzer::new(config.consensus.strategy)
            .with_threshold(config.consensus.threshold)?
            .with_outlier_exclusion(config.consensus.exclude_outliers);
        let calculator = VarianceCalculator::new(config.variance.confidence_level);
        let reporter = ConsistencyReporter::new(config.reporter.output_dir.clone());

        Ok(Self {
            config,
            executor,
            analyzer,
            calculator,
            reporter,
            metrics: MetricsCollector::new(),
        })
    }

    /// Builder method to query seeds from an external source.
    pub fn with_seed_source(mut self, source: Arc<dyn SeedSource>) -> Self {
        self.executor = self.executor.with_seed_source(source);
        self
    }

    /// The evaluation configuration.
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// The underlying executor.
    pub fn executor(&self) -> &MultiRunExecutor {
        &self.executor
    }

    /// Runs the batch, analyzes it and writes the report if enabled.
    ///
    /// `params` is forwarded to every run and stored as report metadata.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` only when seeds cannot be planned. A failed
    /// report write is reported through [`EvaluationOutcome::write_error`].
    pub async fn evaluate(
        &self,
        benchmark: Arc<dyn Benchmark>,
        params: Map<String, Value>,
    ) -> Result<EvaluationOutcome, ConfigError> {
        let framework = self.config.framework.as_str();
        let task = self.config.task.as_str();

        let batch = self
            .executor
            .run(benchmark, framework, task, params.clone())
            .await?;

        let consensus = self.analyzer.analyze(&batch.outcomes);
        let variance = self.calculator.calculate(&batch.outcomes);
        let report =
            ConsistencyReport::assemble(framework, task, &batch, &consensus, &variance, params);

        self.metrics.record_evaluation(
            framework,
            task,
            variance.reliability_score,
            variance.reliability_label.as_str(),
        );

        info!(
            framework,
            task,
            consensus_pass = consensus.consensus_pass,
            confidence = consensus.confidence,
            strategy = %consensus.strategy,
            success_rate = variance.success_rate,
            reliability_score = variance.reliability_score,
            reliability_label = %variance.reliability_label,
            "Evaluation complete"
        );

        let mut outcome = EvaluationOutcome {
            report,
            batch,
            consensus,
            variance,
            report_path: None,
            write_error: None,
        };

        if self.config.reporter.write_report {
            match self.reporter.write(&outcome.report).await {
                Ok(path) => outcome.report_path = Some(path),
                Err(e) => {
                    warn!(
                        framework,
                        task,
                        output_dir = %self.reporter.output_dir().display(),
                        error = %e,
                        "Failed to write consistency report"
                    );
                    outcome.write_error = Some(e);
                }
            }
        }

        Ok(outcome)
    }

    /// Writes a report with this evaluator's reporter.
    ///
    /// Used to retry persistence after [`EvaluationOutcome::write_error`].
    pub async fn write_report(&self, report: &ConsistencyReport) -> Result<PathBuf, ReportError> {
        self.reporter.write(report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchmarkError;
    use crate::runner::{BenchmarkOutput, FnBenchmark, RunContext};
    use crate::variance::ReliabilityLabel;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn quick_run(runs: usize) -> MultiRunConfig {
        MultiRunConfig::new(runs)
            .with_timeout(Duration::from_secs(5))
            .with_retry_backoff(Duration::from_millis(1))
    }

    fn four_of_five() -> Arc<dyn Benchmark> {
        Arc::new(FnBenchmark::new(|ctx: RunContext| async move {
            let durations = [10.0, 11.0, 12.0, 10.0, 11.0];
            if ctx.run_index == 4 {
                return Ok::<_, BenchmarkError>(BenchmarkOutput::failure("assertion failed"));
            }
            Ok(BenchmarkOutput::success()
                .with_duration(durations[ctx.run_index])
                .with_verified_pass(true))
        }))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EvaluationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.num_runs, 5);
        assert_eq!(config.consensus.strategy, VotingStrategy::Majority);
        assert!(config.consensus.exclude_outliers);
        assert_eq!(config.variance.confidence_level, 0.95);
        assert_eq!(config.reporter.output_dir, PathBuf::from("./consistency_reports"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EvaluationConfig::new("fw", "task").with_threshold(1.5);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));

        let config = EvaluationConfig::new("fw", "task").with_confidence_level(1.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfidenceLevel(_))));

        let config = EvaluationConfig::new("", "task");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let config = EvaluationConfig::new("fw", "task").with_run(MultiRunConfig::new(0));
        assert!(matches!(config.validate(), Err(ConfigError::ZeroRuns)));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_RUNS, "7"),
            (ENV_OUTPUT_DIR, "/tmp/reports"),
            (ENV_BASE_SEED, "1000"),
        ]
        .into_iter()
        .collect();

        let mut config = EvaluationConfig::new("fw", "task");
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.run.num_runs, 7);
        assert_eq!(config.run.base_seed, 1000);
        assert_eq!(config.reporter.output_dir, PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn test_override_parse_error_names_key() {
        let mut config = EvaluationConfig::default();
        let err = config
            .apply_overrides_from(|key| (key == ENV_RUNS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_RUNS));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eval.yaml");
        std::fs::write(
            &path,
            "framework: langroid\n\
             task: summarize\n\
             run:\n  num_runs: 3\n  seed_strategy: random\n  timeout_per_run_secs: 30\n\
             consensus:\n  strategy: threshold\n  threshold: 0.7\n",
        )
        .unwrap();

        let config = EvaluationConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.framework, "langroid");
        assert_eq!(config.run.num_runs, 3);
        assert_eq!(config.run.timeout_per_run, Duration::from_secs(30));
        assert_eq!(config.consensus.strategy, VotingStrategy::Threshold);
        assert_eq!(config.consensus.threshold, 0.7);
        assert!(config.reporter.write_report);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file_missing() {
        let result = EvaluationConfig::from_yaml_file("/nonexistent/eval.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_evaluate_writes_report() {
        let dir = TempDir::new().unwrap();
        let config = EvaluationConfig::new("haystack", "qa")
            .with_run(quick_run(5))
            .with_output_dir(dir.path());
        let evaluator = ConsistencyEvaluator::new(config).unwrap();

        let outcome = evaluator.evaluate(four_of_five(), Map::new()).await.unwrap();

        assert!(outcome.consensus.consensus_pass);
        assert!((outcome.variance.success_rate - 0.8).abs() < 1e-12);
        assert_ne!(outcome.variance.reliability_label, ReliabilityLabel::Low);
        assert_eq!(outcome.report.individual_runs.len(), 5);
        assert!(!outcome.write_failed());

        let path = outcome.report_path.unwrap();
        assert!(path.exists());
        let loaded = ConsistencyReporter::load_report(&path).await.unwrap();
        assert_eq!(loaded.report_id, outcome.report.report_id);
    }

    #[tokio::test]
    async fn test_evaluate_without_report() {
        let dir = TempDir::new().unwrap();
        let config = EvaluationConfig::new("haystack", "qa")
            .with_run(quick_run(3))
            .with_output_dir(dir.path().join("reports"))
            .with_write_report(false);
        let evaluator = ConsistencyEvaluator::new(config).unwrap();

        let outcome = evaluator.evaluate(four_of_five(), Map::new()).await.unwrap();
        assert!(outcome.report_path.is_none());
        assert!(!dir.path().join("reports").exists());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_report() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let config = EvaluationConfig::new("haystack", "qa")
            .with_run(quick_run(3))
            .with_output_dir(blocker.join("reports"));
        let evaluator = ConsistencyEvaluator::new(config).unwrap();

        let outcome = evaluator.evaluate(four_of_five(), Map::new()).await.unwrap();
        assert!(outcome.write_failed());
        assert!(outcome.report_path.is_none());
        assert_eq!(outcome.report.individual_runs.len(), 3);

        let retry = ConsistencyReporter::new(dir.path().join("retry"))
            .write(&outcome.report)
            .await
            .unwrap();
        assert!(retry.exists());
    }

    #[tokio::test]
    async fn test_params_become_metadata() {
        let config = EvaluationConfig::new("strands", "plan")
            .with_run(quick_run(2))
            .with_write_report(false);
        let evaluator = ConsistencyEvaluator::new(config).unwrap();

        let mut params = Map::new();
        params.insert("model".to_string(), Value::from("gpt-4o"));
        let outcome = evaluator.evaluate(four_of_five(), params).await.unwrap();

        assert_eq!(outcome.report.metadata["model"], "gpt-4o");
    }
}
