//! CSV and cache artifact export.
//!
//! One run produces up to three artifacts:
//! - a dated CSV appended to on every run (history),
//! - a fixed-path CSV overwritten on every run (latest state),
//! - an optional JSON summary, also overwritten.
//!
//! A failing artifact is logged and does not stop the others.

use crate::config::ExportConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::logging::LogManager;
use crate::models::{AggregationBatch, BatchSummary, HostFailure, SessionRecord};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SOURCE: &str = "Export";

/// Column order of every CSV artifact.
pub const CSV_HEADER: [&str; 5] = ["Host", "Name", "Session", "State", "Logon"];

/// File name of the JSON summary cache.
pub const SUMMARY_FILE: &str = "latest_summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Overwrite,
}

/// One output file of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub format: ArtifactFormat,
    pub mode: WriteMode,
}

/// What an export pass achieved.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub written: Vec<ReportArtifact>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ExportOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    generated_at: DateTime<Local>,
    summary: &'a BatchSummary,
    reachable: &'a [String],
    unreachable: &'a [String],
    failed: &'a [HostFailure],
}

pub struct ReportExporter {
    config: ExportConfig,
    log: Arc<LogManager>,
}

impl ReportExporter {
    pub fn new(config: ExportConfig, log: Arc<LogManager>) -> Self {
        Self { config, log }
    }

    /// Artifacts a run at `at` writes, in write order.
    pub fn artifacts(&self, at: DateTime<Local>) -> Vec<ReportArtifact> {
        let dated = self
            .config
            .dated_pattern
            .replace("{date}", &at.format("%Y-%m-%d").to_string());

        let mut artifacts = vec![
            ReportArtifact {
                path: self.config.directory.join(dated),
                format: ArtifactFormat::Csv,
                mode: WriteMode::Append,
            },
            ReportArtifact {
                path: self.config.directory.join(&self.config.latest_file),
                format: ArtifactFormat::Csv,
                mode: WriteMode::Overwrite,
            },
        ];
        if self.config.json_summary {
            artifacts.push(ReportArtifact {
                path: self.config.directory.join(SUMMARY_FILE),
                format: ArtifactFormat::Json,
                mode: WriteMode::Overwrite,
            });
        }
        artifacts
    }

    /// Write every artifact for `batch`.
    pub fn export(&self, batch: &AggregationBatch, summary: &BatchSummary) -> ExportOutcome {
        let mut outcome = ExportOutcome::default();

        for artifact in self.artifacts(batch.created_at) {
            let result = match artifact.format {
                ArtifactFormat::Csv => write_csv(&artifact, &batch.records),
                ArtifactFormat::Json => write_summary(&artifact.path, batch, summary),
            };

            match result {
                Ok(()) => {
                    self.log.success(
                        SOURCE,
                        format!(
                            "Wrote {} ({} records)",
                            artifact.path.display(),
                            batch.records.len()
                        ),
                    );
                    outcome.written.push(artifact);
                }
                Err(e) => {
                    self.log.error(SOURCE, e.to_string());
                    outcome.failed.push((artifact.path, e.to_string()));
                }
            }
        }

        outcome
    }
}

fn ensure_parent(path: &Path) -> MonitorResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| MonitorError::Export {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Write `records` as CSV. Append mode adds the header only to a new file.
pub fn write_csv(artifact: &ReportArtifact, records: &[SessionRecord]) -> MonitorResult<()> {
    let path = &artifact.path;
    ensure_parent(path)?;

    let export_err = |source| MonitorError::Export {
        path: path.clone(),
        source,
    };

    let (file, needs_header) = match artifact.mode {
        WriteMode::Append => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(export_err)?;
            let empty = file.metadata().map_err(export_err)?.len() == 0;
            (file, empty)
        }
        WriteMode::Overwrite => (File::create(path).map_err(export_err)?, true),
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if needs_header {
        writer.write_record(CSV_HEADER)?;
    }
    for record in records {
        writer.write_record([
            record.host.as_str(),
            record.user.as_str(),
            record.session.as_str(),
            record.state.as_str(),
            record.logon.as_str(),
        ])?;
    }
    writer.flush().map_err(export_err)?;
    Ok(())
}

fn write_summary(
    path: &Path,
    batch: &AggregationBatch,
    summary: &BatchSummary,
) -> MonitorResult<()> {
    ensure_parent(path)?;
    let document = SummaryDocument {
        generated_at: batch.created_at,
        summary,
        reachable: &batch.reachable,
        unreachable: &batch.unreachable,
        failed: &batch.failed,
    };
    let json = serde_json::to_string_pretty(&document)?;
    fs::write(path, json).map_err(|source| MonitorError::Export {
        path: path.to_path_buf(),
        source,
    })
}
