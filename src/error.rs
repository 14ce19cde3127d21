//! Error types for consistency-bench operations.
//!
//! Defines error types for each subsystem:
//! - Evaluation configuration (fail fast before any run executes)
//! - Benchmark callables (converted to failed run outcomes, never propagated)
//! - Seed sources (degrade to the local generator)
//! - Report persistence

use std::time::Duration;

use thiserror::Error;

/// Errors raised while validating or loading an evaluation configuration.
///
/// These are always surfaced before any benchmark run is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Number of runs must be greater than 0")]
    ZeroRuns,

    #[error("max_workers must be greater than 0")]
    ZeroWorkers,

    #[error("timeout_per_run must be greater than 0")]
    ZeroTimeout,

    #[error("Seed list length ({provided}) does not match the number of runs ({expected})")]
    SeedCountMismatch { expected: usize, provided: usize },

    #[error("Seed strategy 'user' requires an explicit seed list")]
    MissingSeedList,

    #[error("Invalid temperature range [{min}, {max}]: values must be finite, non-negative and min <= max")]
    InvalidTemperatureRange { min: f64, max: f64 },

    #[error("Invalid consensus threshold {0}: must be within [0, 1]")]
    InvalidThreshold(f64),

    #[error("Invalid confidence level {0}: must be within (0, 1)")]
    InvalidConfidenceLevel(f64),

    #[error("Unknown voting strategy '{0}': expected majority, weighted, unanimous, threshold or best_of_n")]
    UnknownStrategy(String),

    #[error("Unknown seed strategy '{0}': expected sequential, random or user")]
    UnknownSeedStrategy(String),

    #[error("Unknown execution mode '{0}': expected parallel or sequential")]
    UnknownExecutionMode(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors a benchmark callable can report for a single run attempt.
#[derive(Debug, Clone, Error)]
pub enum BenchmarkError {
    #[error("Benchmark failed: {0}")]
    Failed(String),

    #[error("Run timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn benchmark process: {0}")]
    Spawn(String),

    #[error("Benchmark produced invalid output: {0}")]
    InvalidOutput(String),
}

/// Errors that can occur while obtaining seeds from an external source.
#[derive(Debug, Clone, Error)]
pub enum SeedError {
    #[error("Seed source unavailable: {0}")]
    Unavailable(String),

    #[error("Seed source returned {provided} seeds, expected {expected}")]
    WrongCount { expected: usize, provided: usize },
}

/// Errors that can occur while persisting or loading consistency reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to create report directory {path}: {reason}")]
    DirectoryCreationFailed { path: String, reason: String },

    #[error("Invalid report file '{path}': {reason}")]
    InvalidReport { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::SeedCountMismatch {
            expected: 5,
            provided: 3,
        };
        assert!(err.to_string().contains("(3)"));
        assert!(err.to_string().contains("(5)"));

        let err = ConfigError::UnknownStrategy("plurality".to_string());
        assert!(err.to_string().contains("plurality"));
    }

    #[test]
    fn test_benchmark_error_display() {
        let err = BenchmarkError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));

        let err = BenchmarkError::Failed("agent crashed".to_string());
        assert_eq!(err.to_string(), "Benchmark failed: agent crashed");
    }
}
