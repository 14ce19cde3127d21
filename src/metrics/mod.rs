//! Prometheus metrics for evaluations.
//!
//! # Example
//!
//! ```ignore
//! use consistency_bench::metrics::{init_metrics, export_metrics};
//!
//! init_metrics()?;
//! // ... run evaluations ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics, ConsistencyMetrics};
