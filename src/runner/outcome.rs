//! Per-run inputs and outcomes.
//!
//! Benchmarks hand back a loosely shaped [`BenchmarkOutput`]; the executor
//! converts it exactly once into a typed, immutable [`RunOutcome`] that every
//! downstream component consumes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything a benchmark needs to know about the run it is executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Ordinal position in the batch, `0..num_runs`.
    pub run_index: usize,
    /// Total number of runs in the batch.
    pub num_runs: usize,
    /// Seed assigned to this run.
    pub seed: u64,
    /// Temperature assigned to this run, when a ramp is configured.
    pub temperature: Option<f64>,
    /// Framework under evaluation.
    pub framework: String,
    /// Task identifier.
    pub task: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Caller-supplied parameters passed through untouched.
    pub params: Map<String, Value>,
}

/// Verification block reported by a benchmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default, rename = "pass", alias = "passed")]
    pub passed: Option<bool>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Raw result of one benchmark invocation.
///
/// Any field other than `success` may be absent; absence means "unknown".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkOutput {
    /// Whether execution completed without crashing.
    #[serde(default)]
    pub success: bool,
    /// Self-reported duration in seconds.
    #[serde(default, alias = "execution_time")]
    pub duration: Option<f64>,
    /// LLM tokens consumed.
    #[serde(default, alias = "total_tokens")]
    pub tokens_used: Option<u64>,
    /// Explicit correctness verdict.
    #[serde(default)]
    pub verified_pass: Option<bool>,
    /// Graded output quality in `[0, 1]`.
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// Nested verification result.
    #[serde(default)]
    pub verification: Option<Verification>,
    /// Error description when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl BenchmarkOutput {
    /// A successful execution with no further detail.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A failed execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Sets the self-reported duration in seconds.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    /// Sets the token count.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    /// Sets the explicit verdict.
    pub fn with_verified_pass(mut self, pass: bool) -> Self {
        self.verified_pass = Some(pass);
        self
    }

    /// Sets the quality score.
    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    /// Sets a nested verification block.
    pub fn with_verification(mut self, passed: bool, score: Option<f64>) -> Self {
        self.verification = Some(Verification {
            passed: Some(passed),
            score,
            details: None,
        });
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Resolves the correctness verdict.
    ///
    /// First present value wins: `verified_pass`, `verification.pass`,
    /// `metadata.verification.pass`, then `success`.
    pub fn resolve_verified_pass(&self) -> bool {
        self.verified_pass
            .or_else(|| self.verification.as_ref().and_then(|v| v.passed))
            .or_else(|| {
                self.metadata
                    .get("verification")
                    .and_then(|v| v.get("pass"))
                    .and_then(Value::as_bool)
            })
            .unwrap_or(self.success)
    }

    /// Resolves the quality score: `quality_score`, then `verification.score`.
    ///
    /// Non-finite values are dropped and the result is clamped to `[0, 1]`.
    pub fn resolve_quality(&self) -> Option<f64> {
        self.quality_score
            .or_else(|| self.verification.as_ref().and_then(|v| v.score))
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 1.0))
    }

    /// Converts into a typed outcome.
    ///
    /// `measured` is the wall-clock time of the final attempt and is used
    /// when the benchmark does not report a usable duration.
    pub fn into_outcome(self, ctx: &RunContext, measured: Duration, attempts: u32) -> RunOutcome {
        let verified_pass = self.resolve_verified_pass();
        let quality_score = self.resolve_quality();
        let duration = self
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or_else(|| measured.as_secs_f64());
        let error = if self.success { None } else { self.error };

        RunOutcome {
            run_index: ctx.run_index,
            seed: ctx.seed,
            temperature: ctx.temperature,
            success: self.success,
            verified_pass,
            quality_score,
            duration,
            tokens_used: self.tokens_used,
            error,
            attempts,
            metadata: self.metadata,
        }
    }
}

/// Result of one trial. Immutable once returned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_index: usize,
    pub seed: u64,
    pub temperature: Option<f64>,
    /// Execution completed without crashing.
    pub success: bool,
    /// Task output passed verification.
    pub verified_pass: bool,
    pub quality_score: Option<f64>,
    /// Wall-clock seconds.
    pub duration: f64,
    pub tokens_used: Option<u64>,
    pub error: Option<String>,
    /// Attempts consumed, including retries.
    pub attempts: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RunOutcome {
    /// A run that failed after exhausting its attempts.
    pub fn failed(ctx: &RunContext, error: impl Into<String>, duration: Duration, attempts: u32) -> Self {
        Self {
            run_index: ctx.run_index,
            seed: ctx.seed,
            temperature: ctx.temperature,
            success: false,
            verified_pass: false,
            quality_score: None,
            duration: duration.as_secs_f64(),
            tokens_used: None,
            error: Some(error.into()),
            attempts,
            metadata: Map::new(),
        }
    }

    /// Whether the duration is usable for timing statistics.
    pub fn has_timing(&self) -> bool {
        self.duration.is_finite() && self.duration > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(run_index: usize) -> RunContext {
        RunContext {
            run_index,
            num_runs: 3,
            seed: 42 + run_index as u64,
            temperature: Some(0.5),
            framework: "langroid".to_string(),
            task: "fizzbuzz".to_string(),
            attempt: 1,
            params: Map::new(),
        }
    }

    #[test]
    fn test_verified_pass_direct_field_wins() {
        let output = BenchmarkOutput::success()
            .with_verified_pass(false)
            .with_verification(true, None);
        assert!(!output.resolve_verified_pass());
    }

    #[test]
    fn test_verified_pass_from_verification_block() {
        let output = BenchmarkOutput::success().with_verification(false, Some(0.2));
        assert!(!output.resolve_verified_pass());
    }

    #[test]
    fn test_verified_pass_from_metadata() {
        let output =
            BenchmarkOutput::success().with_metadata("verification", json!({ "pass": false }));
        assert!(!output.resolve_verified_pass());
    }

    #[test]
    fn test_verified_pass_defaults_to_success() {
        assert!(BenchmarkOutput::success().resolve_verified_pass());
        assert!(!BenchmarkOutput::failure("boom").resolve_verified_pass());
    }

    #[test]
    fn test_quality_resolution_and_clamping() {
        assert_eq!(BenchmarkOutput::success().with_quality(1.4).resolve_quality(), Some(1.0));
        assert_eq!(
            BenchmarkOutput::success()
                .with_verification(true, Some(0.7))
                .resolve_quality(),
            Some(0.7)
        );
        assert_eq!(
            BenchmarkOutput::success().with_quality(f64::NAN).resolve_quality(),
            None
        );
    }

    #[test]
    fn test_into_outcome_prefers_reported_duration() {
        let outcome = BenchmarkOutput::success()
            .with_duration(12.5)
            .with_tokens(900)
            .into_outcome(&ctx(1), Duration::from_secs(3), 1);

        assert_eq!(outcome.run_index, 1);
        assert_eq!(outcome.seed, 43);
        assert_eq!(outcome.duration, 12.5);
        assert_eq!(outcome.tokens_used, Some(900));
        assert!(outcome.verified_pass);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_into_outcome_falls_back_to_measured_duration() {
        let outcome = BenchmarkOutput::failure("assertion failed").into_outcome(
            &ctx(0),
            Duration::from_millis(1500),
            2,
        );
        assert_eq!(outcome.duration, 1.5);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error.as_deref(), Some("assertion failed"));
    }

    #[test]
    fn test_deserialize_aliases() {
        let raw = json!({
            "success": true,
            "execution_time": 4.0,
            "total_tokens": 1200,
            "verification": { "pass": true, "score": 0.8 },
        });
        let output: BenchmarkOutput = serde_json::from_value(raw).unwrap();
        assert_eq!(output.duration, Some(4.0));
        assert_eq!(output.tokens_used, Some(1200));
        assert_eq!(output.resolve_quality(), Some(0.8));
        assert!(output.resolve_verified_pass());
    }

    #[test]
    fn test_failed_outcome() {
        let outcome = RunOutcome::failed(&ctx(2), "timed out", Duration::ZERO, 3);
        assert!(!outcome.success);
        assert!(!outcome.verified_pass);
        assert!(!outcome.has_timing());
        assert_eq!(outcome.attempts, 3);
    }
}
