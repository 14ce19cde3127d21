//! Command-line interface for consistency-bench.
//!
//! Provides commands for running consistency evaluations, aggregating
//! written reports and inspecting seed plans.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
