//! Report persistence.
//!
//! Reports are written as pretty-printed JSON. Each write goes to a hidden
//! temporary file in the target directory which is synced and then renamed,
//! so readers never observe a truncated report.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::ReportError;

use super::schema::{ConsistencyReport, SCHEMA_VERSION};

/// Default directory for written reports.
pub const DEFAULT_OUTPUT_DIR: &str = "./consistency_reports";

/// Prefix shared by every report filename.
pub const REPORT_FILE_PREFIX: &str = "consistency_";

static UNSAFE_FILENAME_CHARS: OnceLock<Regex> = OnceLock::new();

fn sanitize_component(value: &str) -> String {
    let re = UNSAFE_FILENAME_CHARS
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9-]+").expect("Invalid regex for filename sanitizing"));
    let cleaned = re.replace_all(value.trim(), "-");
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_lowercase()
    }
}

/// Deterministic filename for a report:
/// `consistency_{framework}_{task}_{YYYYmmdd_HHMMSS}_{id8}.json`.
pub fn report_filename(report: &ConsistencyReport) -> String {
    format!(
        "{}{}_{}_{}_{}.json",
        REPORT_FILE_PREFIX,
        sanitize_component(&report.framework),
        sanitize_component(&report.task),
        report.generated_at.format("%Y%m%d_%H%M%S"),
        report.short_id()
    )
}

/// Writes and reads consistency reports under an output directory.
#[derive(Debug, Clone)]
pub struct ConsistencyReporter {
    output_dir: PathBuf,
}

impl Default for ConsistencyReporter {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl ConsistencyReporter {
    /// Creates a reporter writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// The output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path a report will be written to.
    pub fn report_path(&self, report: &ConsistencyReport) -> PathBuf {
        self.output_dir.join(report_filename(report))
    }

    async fn ensure_directory(&self) -> Result<(), ReportError> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir)
                .await
                .map_err(|e| ReportError::DirectoryCreationFailed {
                    path: self.output_dir.display().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Writes a report and returns its path.
    ///
    /// # Errors
    ///
    /// Returns a `ReportError` if the directory cannot be created or the file
    /// cannot be written. The report itself is untouched and can be written
    /// again.
    pub async fn write(&self, report: &ConsistencyReport) -> Result<PathBuf, ReportError> {
        self.ensure_directory().await?;

        let path = self.report_path(report);
        let json = serde_json::to_string_pretty(report)?;
        let tmp_path = self
            .output_dir
            .join(format!(".{}.{}.tmp", report_filename(report), Uuid::new_v4().simple()));

        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                debug!(path = %tmp_path.display(), error = %cleanup, "Temporary report file not removed");
            }
            return Err(e.into());
        }

        info!(
            path = %path.display(),
            framework = %report.framework,
            task = %report.task,
            "Consistency report written"
        );

        Ok(path)
    }

    /// Loads one report file.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidReport` for unparseable files or an
    /// unsupported schema major version.
    pub async fn load_report(path: impl AsRef<Path>) -> Result<ConsistencyReport, ReportError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let report: ConsistencyReport =
            serde_json::from_str(&contents).map_err(|e| ReportError::InvalidReport {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if !same_major_version(&report.schema_version, SCHEMA_VERSION) {
            return Err(ReportError::InvalidReport {
                path: path.display().to_string(),
                reason: format!(
                    "unsupported schema version {} (expected {})",
                    report.schema_version, SCHEMA_VERSION
                ),
            });
        }

        Ok(report)
    }

    /// Loads every `consistency_*.json` report under `dir`, recursively.
    ///
    /// Unreadable or invalid files are skipped with a warning. Reports are
    /// returned sorted by generation time.
    pub async fn load_reports(dir: impl AsRef<Path>) -> Result<Vec<ConsistencyReport>, ReportError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ReportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("report directory not found: {}", dir.display()),
            )));
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_report_file(path))
            .collect();
        paths.sort();

        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load_report(&path).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid report"),
            }
        }

        reports.sort_by_key(|r| r.generated_at);
        debug!(dir = %dir.display(), count = reports.len(), "Loaded reports");
        Ok(reports)
    }
}

fn is_report_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with(REPORT_FILE_PREFIX) && name.ends_with(".json"))
}

fn same_major_version(found: &str, expected: &str) -> bool {
    found.split('.').next() == expected.split('.').next()
}
