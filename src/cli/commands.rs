//! CLI command definitions for consistency-bench.
//!
//! Three commands:
//! - `evaluate` runs a shell command N times and writes a consistency report
//! - `dashboard` aggregates previously written reports
//! - `seeds` prints the seed list a configuration would use

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{Map, Value};
use tracing::info;

use crate::consensus::VotingStrategy;
use crate::evaluation::{ConsistencyEvaluator, EvaluationConfig, EvaluationOutcome};
use crate::metrics::{export_metrics, init_metrics};
use crate::report::{aggregate_dashboard, ConsistencyReporter, DashboardData, DEFAULT_OUTPUT_DIR};
use crate::runner::{
    CommandBenchmark, ExecutionMode, SeedGenerator, SeedStrategy, TemperatureRange,
    DEFAULT_BASE_SEED, DEFAULT_NUM_RUNS,
};

/// Self-consistency benchmarking for AI agent frameworks.
#[derive(Parser)]
#[command(name = "consistency-bench")]
#[command(about = "Run a task N times and measure how consistent the results are")]
#[command(version)]
#[command(
    long_about = "consistency-bench executes a benchmark command repeatedly with controlled seeds, \
aggregates the verdicts by voting, computes dispersion statistics and a reliability score, \
and writes a versioned JSON report.\n\nExample usage:\n  consistency-bench evaluate --framework langgraph --task fizzbuzz --command 'python run.py' --runs 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a benchmark command repeatedly and report its consistency.
    #[command(alias = "eval")]
    Evaluate(Box<EvaluateArgs>),

    /// Aggregate written reports into dashboard series.
    Dashboard(DashboardArgs),

    /// Print the seeds a run configuration resolves to.
    Seeds(SeedsArgs),
}

/// Arguments for `consistency-bench evaluate`.
///
/// Values are layered: `--config` file, then `CONSISTENCY_*` environment
/// variables, then these flags.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Framework under evaluation.
    #[arg(short, long)]
    pub framework: Option<String>,

    /// Task name.
    #[arg(short, long)]
    pub task: Option<String>,

    /// Shell command executing one run.
    #[arg(short, long)]
    pub command: String,

    /// Working directory for the command.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Number of runs.
    #[arg(short = 'n', long)]
    pub runs: Option<usize>,

    /// Voting strategy (majority, weighted, unanimous, threshold, best_of_n).
    #[arg(short, long)]
    pub strategy: Option<VotingStrategy>,

    /// Pass fraction required by the threshold strategy.
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Run one at a time instead of in a worker pool.
    #[arg(long)]
    pub sequential: bool,

    /// Maximum concurrent runs.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seed strategy (sequential, random, user).
    #[arg(long)]
    pub seed_strategy: Option<SeedStrategy>,

    /// Base seed.
    #[arg(long)]
    pub base_seed: Option<u64>,

    /// Explicit comma-separated seeds; selects the user strategy.
    #[arg(long, value_delimiter = ',')]
    pub seeds: Option<Vec<u64>>,

    /// Linear temperature ramp as MIN:MAX.
    #[arg(long)]
    pub temperature: Option<TemperatureRange>,

    /// Timeout per run in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries after a crashed attempt.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Keep outlier runs in the vote.
    #[arg(long)]
    pub no_outlier_exclusion: bool,

    /// Confidence level for intervals.
    #[arg(long)]
    pub confidence: Option<f64>,

    /// Directory reports are written to.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Skip writing the report file.
    #[arg(long)]
    pub no_report: bool,

    /// YAML evaluation config.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extra KEY=VALUE parameters passed to every run and stored as report metadata.
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Print the full report as JSON instead of a summary.
    #[arg(short, long)]
    pub json: bool,

    /// Print Prometheus metrics after the evaluation.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `consistency-bench dashboard`.
#[derive(Parser, Debug)]
pub struct DashboardArgs {
    /// Directory holding consistency_*.json reports.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub reports_dir: PathBuf,

    /// Print dashboard data as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `consistency-bench seeds`.
#[derive(Parser, Debug)]
pub struct SeedsArgs {
    /// Number of seeds.
    #[arg(short = 'n', long, default_value_t = DEFAULT_NUM_RUNS)]
    pub runs: usize,

    /// Seed strategy (sequential or random).
    #[arg(long, default_value = "sequential")]
    pub seed_strategy: SeedStrategy,

    /// Base seed.
    #[arg(long, default_value_t = DEFAULT_BASE_SEED)]
    pub base_seed: u64,

    /// Print seeds as a JSON array.
    #[arg(short, long)]
    pub json: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Evaluate(args) => run_evaluate_command(*args).await,
        Commands::Dashboard(args) => run_dashboard_command(args).await,
        Commands::Seeds(args) => run_seeds_command(args),
    }
}

// ============================================================================
// Evaluate
// ============================================================================

/// Builds the evaluation config: YAML file, then environment, then flags.
fn build_evaluation_config(args: &EvaluateArgs) -> anyhow::Result<EvaluationConfig> {
    let mut config = match &args.config {
        Some(path) => EvaluationConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EvaluationConfig::default(),
    };

    config
        .apply_env_overrides()
        .context("Invalid CONSISTENCY_* environment variable")?;

    if let Some(framework) = &args.framework {
        config.framework = framework.clone();
    }
    if let Some(task) = &args.task {
        config.task = task.clone();
    }

    let run = &mut config.run;
    if let Some(runs) = args.runs {
        run.num_runs = runs;
    }
    if args.sequential {
        run.mode = ExecutionMode::Sequential;
    }
    if let Some(workers) = args.workers {
        run.max_workers = workers;
    }
    if let Some(strategy) = args.seed_strategy {
        run.seed_strategy = strategy;
    }
    if let Some(base_seed) = args.base_seed {
        run.base_seed = base_seed;
    }
    if let Some(seeds) = &args.seeds {
        run.seeds = Some(seeds.clone());
        run.seed_strategy = SeedStrategy::User;
    }
    if let Some(range) = args.temperature {
        run.temperature = Some(range);
    }
    if let Some(secs) = args.timeout {
        run.timeout_per_run = Duration::from_secs(secs);
    }
    if let Some(retries) = args.max_retries {
        run.max_retries = retries;
    }

    if let Some(strategy) = args.strategy {
        config.consensus.strategy = strategy;
    }
    if let Some(threshold) = args.threshold {
        config.consensus.threshold = threshold;
    }
    if args.no_outlier_exclusion {
        config.consensus.exclude_outliers = false;
    }
    if let Some(level) = args.confidence {
        config.variance.confidence_level = level;
    }
    if let Some(dir) = &args.output_dir {
        config.reporter.output_dir = dir.clone();
    }
    if args.no_report {
        config.reporter.write_report = false;
    }

    config.validate().context("Invalid evaluation configuration")?;
    Ok(config)
}

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    let config = build_evaluation_config(&args)?;

    if args.print_metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    let mut benchmark = CommandBenchmark::new(&args.command);
    if let Some(dir) = &args.working_dir {
        benchmark = benchmark.with_working_dir(dir);
    }

    let params: Map<String, Value> = args
        .params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    info!(
        framework = %config.framework,
        task = %config.task,
        command = %args.command,
        runs = config.run.num_runs,
        "Starting consistency evaluation"
    );

    let evaluator = ConsistencyEvaluator::new(config)?;
    let outcome = evaluator.evaluate(Arc::new(benchmark), params).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&outcome.report)
            .context("Failed to serialize report")?;
        println!("{}", json);
    } else {
        print_evaluation_summary(&outcome);
    }

    if args.print_metrics {
        print!("{}", export_metrics());
    }

    if let Some(err) = outcome.write_error {
        return Err(anyhow::Error::new(err)
            .context("Evaluation finished but the report could not be written"));
    }

    Ok(())
}

fn print_evaluation_summary(outcome: &EvaluationOutcome) {
    let report = &outcome.report;
    let summary = &report.run_summary;
    let consensus = &report.consensus;
    let variance = &report.variance;

    println!("\nConsistency Evaluation");
    println!("======================");
    println!("Framework: {}", report.framework);
    println!("Task: {}", report.task);
    println!(
        "Runs: {} ({} succeeded, {} failed) [{} x{}]",
        summary.total_runs,
        summary.successful_runs,
        summary.failed_runs,
        summary.execution_mode,
        summary.workers
    );
    println!(
        "Seeds ({}, {}): {:?}",
        summary.seed_strategy, summary.seed_source, summary.seeds
    );
    for note in &summary.seed_notes {
        println!("  ⚠ {}", note);
    }
    if summary.batch_timed_out {
        println!("  ⚠ batch timeout reached; unfinished runs were recorded as failures");
    }
    println!();

    let icon = if consensus.decision { "✓" } else { "✗" };
    println!(
        "Consensus: {} {} ({} strategy, confidence {:.3}, {} pass / {} fail)",
        icon,
        if consensus.decision { "PASS" } else { "FAIL" },
        consensus.strategy,
        consensus.confidence,
        consensus.pass_votes,
        consensus.fail_votes
    );
    if consensus.strategy != consensus.requested_strategy {
        println!(
            "  requested {} but no quality scores were reported",
            consensus.requested_strategy
        );
    }
    if let Some(score) = consensus.weighted_score {
        println!("  weighted score: {:.3}", score);
    }
    if !consensus.outliers_excluded.is_empty() {
        println!("  outliers excluded: {:?}", consensus.outliers_excluded);
    }
    println!(
        "  agreement: {:.3}, kappa: {:.3}",
        consensus.agreement.pairwise_agreement, consensus.agreement.fleiss_kappa
    );
    println!();

    println!(
        "Success rate: {:.1}% (CI {:.1}%..{:.1}% at {:.0}%)",
        variance.success_rate * 100.0,
        variance.success_rate_ci.lower * 100.0,
        variance.success_rate_ci.upper * 100.0,
        variance.confidence_level * 100.0
    );
    if let Some(d) = &variance.duration {
        println!(
            "Duration: mean {:.2}s, std {:.2}s, cv {:.3}",
            d.mean, d.std, d.cv
        );
    }
    if let Some(t) = &variance.tokens {
        println!("Tokens: mean {:.0}, std {:.1}, cv {:.3}", t.mean, t.std, t.cv);
    }
    if let Some(q) = &variance.quality {
        println!("Quality: mean {:.3}, std {:.3}", q.mean, q.std);
    }
    println!(
        "Reliability: {:.3} ({})",
        report.reliability.score, report.reliability.label
    );

    for run in report.individual_runs.iter().filter(|r| !r.success) {
        if let Some(err) = &run.error {
            println!("  run {} (seed {}): {}", run.run_index, run.seed, err);
        }
    }

    if let Some(path) = &outcome.report_path {
        println!("\nReport: {}", path.display());
    }
}

// ============================================================================
// Dashboard
// ============================================================================

async fn run_dashboard_command(args: DashboardArgs) -> anyhow::Result<()> {
    let reports = ConsistencyReporter::load_reports(&args.reports_dir)
        .await
        .with_context(|| format!("Failed to load reports from {}", args.reports_dir.display()))?;

    info!(count = reports.len(), dir = %args.reports_dir.display(), "Loaded reports");

    let data = aggregate_dashboard(&reports);

    if args.json {
        let json = serde_json::to_string_pretty(&data)
            .context("Failed to serialize dashboard data")?;
        println!("{}", json);
    } else {
        print_dashboard(&data);
    }

    Ok(())
}

fn print_dashboard(data: &DashboardData) {
    println!("\nConsistency Dashboard");
    println!("=====================");
    println!("Reports: {}", data.total_reports);

    if data.total_reports == 0 {
        return;
    }

    println!("\nFrameworks:");
    for summary in &data.framework_summaries {
        println!(
            "  {:<20} {:>3} evals  mean reliability {:.3}  (High {}, Medium {}, Low {})",
            summary.framework,
            summary.evaluations,
            summary.mean_reliability,
            summary.high,
            summary.medium,
            summary.low
        );
    }

    println!("\nSuccess rates:");
    for point in &data.success_rates {
        println!(
            "  {:<20} {:<20} {:>5.1}%  [{:.1}%, {:.1}%]  ({}/{})",
            point.framework,
            point.task,
            point.success_rate * 100.0,
            point.ci_lower * 100.0,
            point.ci_upper * 100.0,
            point.successful_runs,
            point.total_runs
        );
    }

    println!("\nDurations:");
    for dist in &data.duration_distributions {
        println!(
            "  {:<20} {:<20} n={:<4} mean {:.2}s  std {:.2}s",
            dist.framework,
            dist.task,
            dist.durations.len(),
            dist.mean,
            dist.std
        );
    }
}

// ============================================================================
// Seeds
// ============================================================================

fn run_seeds_command(args: SeedsArgs) -> anyhow::Result<()> {
    if args.runs == 0 {
        anyhow::bail!("--runs must be greater than 0");
    }
    if args.seed_strategy == SeedStrategy::User {
        anyhow::bail!("the user seed strategy takes its seeds from --seeds on evaluate");
    }

    let seeds = SeedGenerator::new(args.seed_strategy, args.base_seed).generate(args.runs);

    if args.json {
        println!("{}", serde_json::to_string(&seeds)?);
    } else {
        for seed in seeds {
            println!("{}", seed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_evaluate_minimal() {
        let cli = Cli::try_parse_from([
            "consistency-bench",
            "evaluate",
            "--framework",
            "langgraph",
            "--task",
            "fizzbuzz",
            "--command",
            "python run.py",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Evaluate(args) => {
                assert_eq!(args.framework.as_deref(), Some("langgraph"));
                assert_eq!(args.command, "python run.py");
                assert!(args.runs.is_none());
                assert!(!args.sequential);
                assert!(!args.json);

                let config = build_evaluation_config(&args).unwrap();
                assert_eq!(config.task, "fizzbuzz");
                assert_eq!(config.consensus.strategy, VotingStrategy::Majority);
            }
            _ => panic!("Expected Evaluate command"),
        }
    }

    #[test]
    fn test_evaluate_all_options() {
        let cli = Cli::try_parse_from([
            "consistency-bench",
            "eval",
            "-f",
            "haystack",
            "-t",
            "qa",
            "-c",
            "./bench.sh",
            "-n",
            "3",
            "--strategy",
            "threshold",
            "--threshold",
            "0.7",
            "--sequential",
            "--seeds",
            "7,8,9",
            "--temperature",
            "0.2:0.8",
            "--timeout",
            "60",
            "--max-retries",
            "1",
            "--no-outlier-exclusion",
            "--confidence",
            "0.99",
            "--no-report",
            "-p",
            "model=gpt-4o",
            "--json",
            "--print-metrics",
        ])
        .expect("should parse");

        let Commands::Evaluate(args) = cli.command else {
            panic!("Expected Evaluate command");
        };
        assert_eq!(args.params, vec![("model".to_string(), "gpt-4o".to_string())]);
        assert!(args.print_metrics);

        let config = build_evaluation_config(&args).unwrap();
        assert_eq!(config.run.num_runs, 3);
        assert_eq!(config.run.mode, ExecutionMode::Sequential);
        assert_eq!(config.run.seed_strategy, SeedStrategy::User);
        assert_eq!(config.run.seeds, Some(vec![7, 8, 9]));
        assert_eq!(config.run.temperature, Some(TemperatureRange::new(0.2, 0.8)));
        assert_eq!(config.run.timeout_per_run, Duration::from_secs(60));
        assert_eq!(config.run.max_retries, 1);
        assert_eq!(config.consensus.strategy, VotingStrategy::Threshold);
        assert_eq!(config.consensus.threshold, 0.7);
        assert!(!config.consensus.exclude_outliers);
        assert_eq!(config.variance.confidence_level, 0.99);
        assert!(!config.reporter.write_report);
    }

    #[test]
    fn test_evaluate_rejects_seed_mismatch() {
        let cli = Cli::try_parse_from([
            "consistency-bench",
            "evaluate",
            "-f",
            "fw",
            "-t",
            "task",
            "-c",
            "true",
            "-n",
            "4",
            "--seeds",
            "1,2",
        ])
        .unwrap();

        let Commands::Evaluate(args) = cli.command else {
            panic!("Expected Evaluate command");
        };
        assert!(build_evaluation_config(&args).is_err());
    }

    #[test]
    fn test_evaluate_rejects_unknown_strategy() {
        let result = Cli::try_parse_from([
            "consistency-bench",
            "evaluate",
            "-c",
            "true",
            "--strategy",
            "plurality",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_param_parsing() {
        assert_eq!(
            parse_param("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_dashboard_defaults() {
        let cli = Cli::try_parse_from(["consistency-bench", "dashboard"]).unwrap();
        match cli.command {
            Commands::Dashboard(args) => {
                assert_eq!(args.reports_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
                assert!(!args.json);
            }
            _ => panic!("Expected Dashboard command"),
        }
    }

    #[test]
    fn test_seeds_command() {
        let cli = Cli::try_parse_from([
            "consistency-bench",
            "seeds",
            "--runs",
            "3",
            "--seed-strategy",
            "random",
            "--base-seed",
            "7",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");

        let Commands::Seeds(args) = cli.command else {
            panic!("Expected Seeds command");
        };
        assert_eq!(args.runs, 3);
        assert_eq!(args.seed_strategy, SeedStrategy::Random);
        assert!(run_seeds_command(args).is_ok());
    }

    #[test]
    fn test_seeds_command_rejects_user_strategy() {
        let args = SeedsArgs {
            runs: 3,
            seed_strategy: SeedStrategy::User,
            base_seed: 1,
            json: false,
        };
        assert!(run_seeds_command(args).is_err());
    }

    #[tokio::test]
    async fn test_dashboard_missing_dir_errors() {
        let args = DashboardArgs {
            reports_dir: PathBuf::from("/nonexistent/consistency-reports"),
            json: true,
        };
        assert!(run_dashboard_command(args).await.is_err());
    }
}
