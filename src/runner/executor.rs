//! Multi-run executor - runs a benchmark N times and collects ordered outcomes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{BenchmarkError, ConfigError};
use crate::metrics::MetricsCollector;

use super::benchmark::Benchmark;
use super::config::{ExecutionMode, MultiRunConfig};
use super::outcome::{RunContext, RunOutcome};
use super::pool::{PoolStats, WorkerPool};
use super::seeds::{resolve_seeds, SeedPlan, SeedSource};

/// Error recorded for runs that never finished before the batch deadline.
pub const BATCH_TIMEOUT_ERROR: &str = "run did not complete before the batch timeout";

/// Retry and timeout policy applied to every run of a batch.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub timeout_per_run: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    metrics: MetricsCollector,
}

impl RunPolicy {
    /// Builds the policy from a batch configuration.
    pub fn from_config(config: &MultiRunConfig) -> Self {
        Self {
            timeout_per_run: config.timeout_per_run,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            metrics: MetricsCollector::new(),
        }
    }

    /// Executes one run, retrying crashed attempts.
    ///
    /// Never fails: errors, panics and timeouts all become a failed
    /// `RunOutcome`. A timed-out attempt is not retried, which keeps the
    /// batch within its `timeout_per_run * N` bound.
    pub async fn execute(&self, benchmark: &dyn Benchmark, mut ctx: RunContext) -> RunOutcome {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut last_error = String::from("benchmark was not invoked");
        let mut last_elapsed = Duration::ZERO;

        for attempt in 1..=max_attempts {
            ctx.attempt = attempt;
            let start = Instant::now();
            let result = tokio::time::timeout(
                self.timeout_per_run,
                AssertUnwindSafe(benchmark.run(ctx.clone())).catch_unwind(),
            )
            .await;
            last_elapsed = start.elapsed();

            match result {
                Ok(Ok(Ok(output))) => {
                    let outcome = output.into_outcome(&ctx, last_elapsed, attempt);
                    self.metrics
                        .record_run(&ctx.framework, outcome.success, outcome.duration);
                    debug!(
                        run_index = ctx.run_index,
                        seed = ctx.seed,
                        attempt,
                        success = outcome.success,
                        duration_secs = outcome.duration,
                        "Run finished"
                    );
                    return outcome;
                }
                Ok(Ok(Err(e))) => {
                    last_error = e.to_string();
                }
                Ok(Err(panic)) => {
                    last_error = format!("benchmark panicked: {}", panic_message(panic.as_ref()));
                }
                Err(_) => {
                    warn!(
                        run_index = ctx.run_index,
                        seed = ctx.seed,
                        attempt,
                        timeout_secs = self.timeout_per_run.as_secs_f64(),
                        "Run timed out"
                    );
                    self.metrics.record_timeout(&ctx.framework);
                    self.metrics
                        .record_run(&ctx.framework, false, last_elapsed.as_secs_f64());
                    return RunOutcome::failed(
                        &ctx,
                        BenchmarkError::Timeout(self.timeout_per_run).to_string(),
                        last_elapsed,
                        attempt,
                    );
                }
            }

            if attempt < max_attempts {
                warn!(
                    run_index = ctx.run_index,
                    seed = ctx.seed,
                    attempt,
                    remaining_attempts = max_attempts - attempt,
                    error = %last_error,
                    "Run failed, retrying"
                );
                self.metrics.record_retry(&ctx.framework);
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        error!(
            run_index = ctx.run_index,
            seed = ctx.seed,
            attempts = max_attempts,
            error = %last_error,
            "Run failed after exhausting retries"
        );
        self.metrics
            .record_run(&ctx.framework, false, last_elapsed.as_secs_f64());
        RunOutcome::failed(&ctx, last_error, last_elapsed, max_attempts)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Outcomes of a batch plus the metadata needed to report on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Exactly `num_runs` outcomes, sorted by `run_index`.
    pub outcomes: Vec<RunOutcome>,
    pub seed_plan: SeedPlan,
    pub mode: ExecutionMode,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    /// Wall-clock seconds for the whole batch.
    pub wall_time_secs: f64,
    /// Whether the aggregate batch deadline was hit.
    pub batch_timed_out: bool,
}

impl BatchResult {
    /// Number of runs that completed without crashing.
    pub fn successful_runs(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Number of failed runs.
    pub fn failed_runs(&self) -> usize {
        self.outcomes.len() - self.successful_runs()
    }

    /// Seeds in run order.
    pub fn seeds(&self) -> Vec<u64> {
        self.outcomes.iter().map(|o| o.seed).collect()
    }
}

/// Runs a benchmark N times with seed/temperature variation.
pub struct MultiRunExecutor {
    config: MultiRunConfig,
    seed_source: Option<Arc<dyn SeedSource>>,
    last_pool_stats: std::sync::Mutex<Option<PoolStats>>,
}

impl MultiRunExecutor {
    /// Creates an executor, validating the configuration up front.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration is invalid.
    pub fn new(config: MultiRunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            seed_source: None,
            last_pool_stats: std::sync::Mutex::new(None),
        })
    }

    /// Uses an external seed source, falling back to local generation if it fails.
    pub fn with_seed_source(mut self, source: Arc<dyn SeedSource>) -> Self {
        self.seed_source = Some(source);
        self
    }

    /// The batch configuration.
    pub fn config(&self) -> &MultiRunConfig {
        &self.config
    }

    /// Worker pool statistics from the most recent parallel batch.
    pub fn last_pool_stats(&self) -> Option<PoolStats> {
        self.last_pool_stats
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or(None)
    }

    /// Resolves seeds without running anything.
    pub async fn plan_seeds(&self) -> Result<SeedPlan, ConfigError> {
        resolve_seeds(&self.config, self.seed_source.as_deref()).await
    }

    /// Runs the benchmark `num_runs` times.
    ///
    /// Per-run failures never propagate; the result always holds exactly
    /// `num_runs` outcomes ordered by `run_index`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` only for configuration problems detected
    /// before any run starts.
    pub async fn run(
        &self,
        benchmark: Arc<dyn Benchmark>,
        framework: &str,
        task: &str,
        params: Map<String, Value>,
    ) -> Result<BatchResult, ConfigError> {
        let seed_plan = self.plan_seeds().await?;
        let contexts = self.build_contexts(&seed_plan, framework, task, &params);
        let policy = RunPolicy::from_config(&self.config);
        let batch_timeout = self.config.batch_timeout();
        let parallel = self.config.runs_in_parallel();
        let workers = if parallel {
            self.config.effective_workers()
        } else {
            1
        };

        info!(
            framework,
            task,
            runs = self.config.num_runs,
            mode = if parallel { "parallel" } else { "sequential" },
            workers,
            seed_strategy = %seed_plan.strategy,
            seed_source = seed_plan.provenance.label(),
            "Starting multi-run batch"
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let (collected, batch_timed_out) = if parallel {
            let pool = WorkerPool::new(workers);
            let result = pool
                .run_all(benchmark, policy, contexts.clone(), batch_timeout)
                .await;
            if let Ok(mut guard) = self.last_pool_stats.lock() {
                *guard = Some(pool.stats());
            }
            result
        } else {
            run_sequential(benchmark.as_ref(), &policy, contexts.clone(), batch_timeout).await
        };

        let outcomes = complete_and_order(collected, &contexts);
        let wall_time_secs = start.elapsed().as_secs_f64();

        let result = BatchResult {
            outcomes,
            seed_plan,
            mode: if parallel {
                ExecutionMode::Parallel
            } else {
                ExecutionMode::Sequential
            },
            workers,
            started_at,
            wall_time_secs,
            batch_timed_out,
        };

        info!(
            framework,
            task,
            successful = result.successful_runs(),
            failed = result.failed_runs(),
            wall_time_secs,
            batch_timed_out,
            "Multi-run batch finished"
        );

        Ok(result)
    }

    fn build_contexts(
        &self,
        plan: &SeedPlan,
        framework: &str,
        task: &str,
        params: &Map<String, Value>,
    ) -> Vec<RunContext> {
        plan.seeds
            .iter()
            .enumerate()
            .map(|(run_index, &seed)| RunContext {
                run_index,
                num_runs: self.config.num_runs,
                seed,
                temperature: self.config.temperature_for(run_index),
                framework: framework.to_string(),
                task: task.to_string(),
                attempt: 1,
                params: params.clone(),
            })
            .collect()
    }
}

/// Runs each context in index order, stopping new runs once the batch deadline passes.
async fn run_sequential(
    benchmark: &dyn Benchmark,
    policy: &RunPolicy,
    contexts: Vec<RunContext>,
    batch_timeout: Duration,
) -> (Vec<RunOutcome>, bool) {
    let deadline = Instant::now() + batch_timeout;
    let mut outcomes = Vec::with_capacity(contexts.len());

    for ctx in contexts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(run_index = ctx.run_index, "Batch deadline reached, skipping remaining runs");
            return (outcomes, true);
        }

        match tokio::time::timeout(remaining, policy.execute(benchmark, ctx)).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(_) => {
                warn!("Batch deadline reached during a run");
                return (outcomes, true);
            }
        }
    }

    (outcomes, false)
}

/// Fills missing slots with failed outcomes and sorts by `run_index`.
fn complete_and_order(mut collected: Vec<RunOutcome>, contexts: &[RunContext]) -> Vec<RunOutcome> {
    collected.sort_by_key(|o| o.run_index);
    collected.dedup_by_key(|o| o.run_index);

    let mut outcomes = Vec::with_capacity(contexts.len());
    let mut iter = collected.into_iter().peekable();

    for ctx in contexts {
        match iter.peek() {
            Some(outcome) if outcome.run_index == ctx.run_index => {
                if let Some(outcome) = iter.next() {
                    outcomes.push(outcome);
                }
            }
            _ => outcomes.push(RunOutcome::failed(ctx, BATCH_TIMEOUT_ERROR, Duration::ZERO, 0)),
        }
    }

    outcomes
}
