//! Error taxonomy for a monitoring run.
//!
//! Only configuration errors abort a run. Everything else is scoped to a
//! single host or artifact and is turned into a log entry by the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Group file or application config missing, unparsable or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Host did not answer the probe or the session backend could not reach it.
    #[error("host {host} not reachable: {reason}")]
    Connectivity { host: String, reason: String },

    /// A session line that could not be mapped to a record.
    #[error("malformed session line: {0:?}")]
    Parse(String),

    /// Writing an export artifact failed.
    #[error("failed to write {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connectivity(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connectivity {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
