//! Consistency reports: schema, persistence and dashboard aggregation.
//!
//! # Example
//!
//! ```ignore
//! let report = ConsistencyReport::assemble("haystack", "qa", &batch, &consensus, &variance, Map::new());
//! let path = ConsistencyReporter::new("./consistency_reports").write(&report).await?;
//!
//! let reports = ConsistencyReporter::load_reports("./consistency_reports").await?;
//! let dashboard = aggregate_dashboard(&reports);
//! ```

pub mod dashboard;
pub mod reporter;
pub mod schema;

pub use dashboard::{
    aggregate_dashboard, DashboardData, DurationDistribution, FrameworkSummary, SuccessRatePoint,
};
pub use reporter::{report_filename, ConsistencyReporter, DEFAULT_OUTPUT_DIR, REPORT_FILE_PREFIX};
pub use schema::{
    ConsensusSection, ConsistencyReport, ReliabilitySection, RunRecord, RunSummary,
    VarianceSection, SCHEMA_VERSION,
};
