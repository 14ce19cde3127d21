//! Benchmark callables.
//!
//! A [`Benchmark`] executes one trial for a given [`RunContext`]. Two adapters
//! are provided:
//!
//! - [`FnBenchmark`] wraps an async closure, for in-process framework adapters.
//! - [`CommandBenchmark`] runs a shell command per trial and reads its result
//!   from the last JSON object printed on stdout.
//!
//! # Command protocol
//!
//! The command receives the run parameters as environment variables:
//!
//! ```text
//! CONSISTENCY_SEED         seed for this run
//! CONSISTENCY_RUN_INDEX    0-based run index
//! CONSISTENCY_NUM_RUNS     batch size
//! CONSISTENCY_TEMPERATURE  temperature (only when a ramp is configured)
//! CONSISTENCY_FRAMEWORK    framework name
//! CONSISTENCY_TASK         task name
//! CONSISTENCY_ATTEMPT      attempt number, starting at 1
//! CONSISTENCY_PARAMS       caller parameters as a JSON object
//! ```
//!
//! and may print e.g. `{"success": true, "duration": 3.2, "tokens_used": 812,
//! "verification": {"pass": true, "score": 0.9}}`. Without JSON the exit
//! status decides success.

use std::future::Future;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::BenchmarkError;

use super::outcome::{BenchmarkOutput, RunContext};

/// Maximum number of stderr characters kept in error messages.
const STDERR_TAIL_CHARS: usize = 2000;

/// A benchmark that can be executed repeatedly.
#[async_trait]
pub trait Benchmark: Send + Sync {
    /// Executes one trial.
    ///
    /// Returning `Err` counts as a crashed attempt and is retried by the
    /// executor. Returning `Ok` with `success == false` is a completed but
    /// unsuccessful run and is not retried.
    async fn run(&self, ctx: RunContext) -> Result<BenchmarkOutput, BenchmarkError>;
}

/// Adapter turning an async closure into a [`Benchmark`].
pub struct FnBenchmark<F> {
    f: F,
}

impl<F> FnBenchmark<F> {
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Benchmark for FnBenchmark<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BenchmarkOutput, BenchmarkError>> + Send,
{
    async fn run(&self, ctx: RunContext) -> Result<BenchmarkOutput, BenchmarkError> {
        (self.f)(ctx).await
    }
}

/// Runs a shell command once per trial.
#[derive(Debug, Clone)]
pub struct CommandBenchmark {
    command: String,
    shell: String,
    working_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
}

impl CommandBenchmark {
    /// Creates a benchmark running `command` through `sh -c`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: "sh".to_string(),
            working_dir: None,
            env_vars: Vec::new(),
        }
    }

    /// Sets the shell used to interpret the command.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self, ctx: &RunContext) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .env("CONSISTENCY_SEED", ctx.seed.to_string())
            .env("CONSISTENCY_RUN_INDEX", ctx.run_index.to_string())
            .env("CONSISTENCY_NUM_RUNS", ctx.num_runs.to_string())
            .env("CONSISTENCY_FRAMEWORK", &ctx.framework)
            .env("CONSISTENCY_TASK", &ctx.task)
            .env("CONSISTENCY_ATTEMPT", ctx.attempt.to_string())
            .env("CONSISTENCY_PARAMS", Value::Object(ctx.params.clone()).to_string())
            .kill_on_drop(true);

        if let Some(temperature) = ctx.temperature {
            cmd.env("CONSISTENCY_TEMPERATURE", temperature.to_string());
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl Benchmark for CommandBenchmark {
    async fn run(&self, ctx: RunContext) -> Result<BenchmarkOutput, BenchmarkError> {
        let output = self
            .build_command(&ctx)
            .output()
            .await
            .map_err(|e| BenchmarkError::Spawn(e.to_string()))?;

        let exit_ok = output.status.success();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        debug!(
            run_index = ctx.run_index,
            exit_code = output.status.code().unwrap_or(-1),
            stdout_bytes = output.stdout.len(),
            "Benchmark command finished"
        );

        match last_json_object(&stdout) {
            Some(value) => parse_output(value, exit_ok),
            None if exit_ok => Ok(BenchmarkOutput::success()),
            None => Err(BenchmarkError::Failed(format!(
                "command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                tail(&stderr, STDERR_TAIL_CHARS)
            ))),
        }
    }
}

/// Finds the last line of `stdout` that is a JSON object.
fn last_json_object(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .find_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
}

/// Parses a JSON object into a `BenchmarkOutput`, defaulting `success` to the exit status.
fn parse_output(mut value: Value, exit_ok: bool) -> Result<BenchmarkOutput, BenchmarkError> {
    if let Some(obj) = value.as_object_mut() {
        obj.entry("success").or_insert(Value::Bool(exit_ok));
    }
    serde_json::from_value(value).map_err(|e| BenchmarkError::InvalidOutput(e.to_string()))
}

fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        s.trim().to_string()
    } else {
        s.chars().skip(count - max_chars).collect::<String>().trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn ctx() -> RunContext {
        RunContext {
            run_index: 2,
            num_runs: 5,
            seed: 44,
            temperature: None,
            framework: "strands".to_string(),
            task: "sum".to_string(),
            attempt: 1,
            params: Map::new(),
        }
    }

    #[test]
    fn test_last_json_object() {
        let stdout = "starting\n{\"success\": false}\nprogress 50%\n{\"success\": true, \"duration\": 2.0}\n";
        let value = last_json_object(stdout).unwrap();
        assert_eq!(value["duration"], 2.0);

        assert!(last_json_object("no json here\n[1, 2]").is_none());
    }

    #[test]
    fn test_parse_output_defaults_success_to_exit_status() {
        let value = serde_json::json!({ "tokens_used": 10 });
        let output = parse_output(value.clone(), false).unwrap();
        assert!(!output.success);

        let output = parse_output(value, true).unwrap();
        assert!(output.success);
    }

    #[test]
    fn test_parse_output_invalid() {
        let value = serde_json::json!({ "success": "yes" });
        assert!(matches!(
            parse_output(value, true),
            Err(BenchmarkError::InvalidOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_fn_benchmark() {
        let bench = FnBenchmark::new(|ctx: RunContext| async move {
            Ok::<_, BenchmarkError>(BenchmarkOutput::success().with_tokens(ctx.seed))
        });
        let output = bench.run(ctx()).await.unwrap();
        assert_eq!(output.tokens_used, Some(44));
    }

    #[tokio::test]
    async fn test_command_benchmark_reads_env_and_json() {
        let bench = CommandBenchmark::new(
            r#"echo "{\"success\": true, \"tokens_used\": $CONSISTENCY_SEED, \"metadata\": {\"task\": \"$CONSISTENCY_TASK\"}}""#,
        );
        let output = bench.run(ctx()).await.unwrap();
        assert!(output.success);
        assert_eq!(output.tokens_used, Some(44));
        assert_eq!(output.metadata["task"], "sum");
    }

    #[tokio::test]
    async fn test_command_benchmark_exit_status_without_json() {
        let ok = CommandBenchmark::new("true").run(ctx()).await.unwrap();
        assert!(ok.success);

        let err = CommandBenchmark::new("echo broken >&2; exit 3")
            .run(ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("code 3"));
        assert!(err.to_string().contains("broken"));
    }
}
