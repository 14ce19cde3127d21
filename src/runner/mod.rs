//! Multi-run execution of a benchmark.
//!
//! # Architecture
//!
//! ```text
//! MultiRunConfig -> resolve_seeds -> RunContext x N -> WorkerPool / sequential loop
//!                                                          |
//!                                   Benchmark::run  <- RunPolicy (timeout, retries)
//!                                                          |
//!                                    BatchResult { outcomes ordered by run_index }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use consistency_bench::runner::{CommandBenchmark, MultiRunConfig, MultiRunExecutor};
//!
//! let executor = MultiRunExecutor::new(MultiRunConfig::new(5))?;
//! let bench = Arc::new(CommandBenchmark::new("python run_task.py"));
//! let batch = executor.run(bench, "langgraph", "fizzbuzz", Map::new()).await?;
//! assert_eq!(batch.outcomes.len(), 5);
//! ```

pub mod benchmark;
pub mod config;
pub mod executor;
pub mod outcome;
pub mod pool;
pub mod seeds;

pub use benchmark::{Benchmark, CommandBenchmark, FnBenchmark};
pub use config::{
    ExecutionMode, MultiRunConfig, SeedStrategy, TemperatureRange, DEFAULT_BASE_SEED,
    DEFAULT_MAX_WORKERS, DEFAULT_NUM_RUNS,
};
pub use executor::{BatchResult, MultiRunExecutor, RunPolicy, BATCH_TIMEOUT_ERROR};
pub use outcome::{BenchmarkOutput, RunContext, RunOutcome, Verification};
pub use pool::{PoolStats, WorkerPool};
pub use seeds::{resolve_seeds, SeedGenerator, SeedPlan, SeedProvenance, SeedSource};
