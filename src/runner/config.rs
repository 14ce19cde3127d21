//! Configuration for multi-run execution.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of repeated runs per task.
pub const DEFAULT_NUM_RUNS: usize = 5;

/// Default upper bound on concurrently executing runs.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default base seed.
pub const DEFAULT_BASE_SEED: u64 = 42;

/// How the runs of a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs execute concurrently in a bounded worker pool.
    #[default]
    Parallel,
    /// Runs execute one at a time in index order.
    Sequential,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Ok(ExecutionMode::Parallel),
            "sequential" => Ok(ExecutionMode::Sequential),
            other => Err(ConfigError::UnknownExecutionMode(other.to_string())),
        }
    }
}

/// Strategy for deriving one seed per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// `base_seed + i` for each run index `i`.
    #[default]
    Sequential,
    /// Pseudo-random sequence derived deterministically from `base_seed`.
    Random,
    /// Explicit seed list supplied by the caller.
    User,
}

impl fmt::Display for SeedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedStrategy::Sequential => write!(f, "sequential"),
            SeedStrategy::Random => write!(f, "random"),
            SeedStrategy::User => write!(f, "user"),
        }
    }
}

impl FromStr for SeedStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(SeedStrategy::Sequential),
            "random" => Ok(SeedStrategy::Random),
            "user" => Ok(SeedStrategy::User),
            other => Err(ConfigError::UnknownSeedStrategy(other.to_string())),
        }
    }
}

/// Temperature ramp applied linearly across run indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
}

impl TemperatureRange {
    /// Creates a new temperature range.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Temperature for `run_index` out of `num_runs`.
    ///
    /// `min + (max - min) * i / (n - 1)` for `n > 1`, otherwise `min`.
    pub fn temperature_for(&self, run_index: usize, num_runs: usize) -> f64 {
        if num_runs <= 1 {
            return self.min;
        }
        self.min + (self.max - self.min) * run_index as f64 / (num_runs - 1) as f64
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid = self.min.is_finite()
            && self.max.is_finite()
            && self.min >= 0.0
            && self.min <= self.max;
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidTemperatureRange {
                min: self.min,
                max: self.max,
            })
        }
    }
}

impl FromStr for TemperatureRange {
    type Err = ConfigError;

    /// Parses `"MIN:MAX"` (e.g. `"0.0:1.0"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            key: "temperature".to_string(),
            message: format!("expected MIN:MAX, got '{}'", s),
        };
        let (min, max) = s.split_once(':').ok_or_else(invalid)?;
        let min: f64 = min.trim().parse().map_err(|_| invalid())?;
        let max: f64 = max.trim().parse().map_err(|_| invalid())?;
        let range = Self::new(min, max);
        range.validate()?;
        Ok(range)
    }
}

/// Configuration for executing a benchmark N times.
///
/// All fields are explicit; nothing is read from global state during a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiRunConfig {
    /// Number of runs to execute.
    pub num_runs: usize,
    /// Parallel or sequential scheduling.
    pub mode: ExecutionMode,
    /// Upper bound on concurrently executing runs.
    pub max_workers: usize,
    /// How seeds are derived.
    pub seed_strategy: SeedStrategy,
    /// Base seed for the sequential and random strategies.
    pub base_seed: u64,
    /// Explicit seeds, required for the user strategy.
    pub seeds: Option<Vec<u64>>,
    /// Optional linear temperature ramp.
    pub temperature: Option<TemperatureRange>,
    /// Timeout for a single run attempt.
    #[serde(rename = "timeout_per_run_secs", with = "duration_secs")]
    pub timeout_per_run: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay between retry attempts.
    #[serde(rename = "retry_backoff_ms", with = "duration_millis")]
    pub retry_backoff: Duration,
}

impl Default for MultiRunConfig {
    fn default() -> Self {
        Self {
            num_runs: DEFAULT_NUM_RUNS,
            mode: ExecutionMode::Parallel,
            max_workers: DEFAULT_MAX_WORKERS,
            seed_strategy: SeedStrategy::Sequential,
            base_seed: DEFAULT_BASE_SEED,
            seeds: None,
            temperature: None,
            timeout_per_run: Duration::from_secs(300),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl MultiRunConfig {
    /// Creates a configuration for `num_runs` runs with defaults elsewhere.
    pub fn new(num_runs: usize) -> Self {
        Self {
            num_runs,
            ..Default::default()
        }
    }

    /// Sets the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Forces sequential execution.
    pub fn sequential(self) -> Self {
        self.with_mode(ExecutionMode::Sequential)
    }

    /// Sets the maximum worker count.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets the seed strategy.
    pub fn with_seed_strategy(mut self, strategy: SeedStrategy) -> Self {
        self.seed_strategy = strategy;
        self
    }

    /// Sets the base seed.
    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    /// Supplies an explicit seed list and switches to the user strategy.
    pub fn with_seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = Some(seeds);
        self.seed_strategy = SeedStrategy::User;
        self
    }

    /// Enables a linear temperature ramp.
    pub fn with_temperature(mut self, min: f64, max: f64) -> Self {
        self.temperature = Some(TemperatureRange::new(min, max));
        self
    }

    /// Sets the per-run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_run = timeout;
        self
    }

    /// Sets the retry budget per run.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the delay between retries.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Number of workers actually spawned in parallel mode.
    pub fn effective_workers(&self) -> usize {
        self.num_runs
            .min(self.max_workers)
            .min(DEFAULT_MAX_WORKERS)
            .max(1)
    }

    /// Whether the batch will run through the worker pool.
    pub fn runs_in_parallel(&self) -> bool {
        self.mode == ExecutionMode::Parallel && self.num_runs > 1 && self.effective_workers() > 1
    }

    /// Upper bound on the wall-clock time of a whole batch.
    pub fn batch_timeout(&self) -> Duration {
        self.timeout_per_run
            .saturating_mul(self.num_runs.max(1) as u32)
    }

    /// Temperature for a run, if a ramp is configured.
    pub fn temperature_for(&self, run_index: usize) -> Option<f64> {
        self.temperature
            .map(|range| range.temperature_for(run_index, self.num_runs))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for zero runs/workers/timeout, an invalid
    /// temperature ramp, or a missing or mismatched user seed list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_runs == 0 {
            return Err(ConfigError::ZeroRuns);
        }

        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        if self.timeout_per_run.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if let Some(range) = &self.temperature {
            range.validate()?;
        }

        match (&self.seed_strategy, &self.seeds) {
            (SeedStrategy::User, None) => return Err(ConfigError::MissingSeedList),
            (_, Some(seeds)) if seeds.len() != self.num_runs => {
                return Err(ConfigError::SeedCountMismatch {
                    expected: self.num_runs,
                    provided: seeds.len(),
                });
            }
            _ => {}
        }

        Ok(())
    }
}

/// Parses an environment variable value into the target type.
pub(crate) fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot parse '{}'", value),
    })
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
