//! Report artifacts.

pub mod exporter;

pub use exporter::{ExportOutcome, ReportExporter};
