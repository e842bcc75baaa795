//! Session retrieval for a single host.

use super::parser::parse_sessions;
use crate::config::CollectorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::logging::LogManager;
use crate::models::SessionRecord;
use crate::probe::ReachabilityProbe;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const SOURCE: &str = "Sessions";

/// Message printed by the enumeration tool when a host has no sessions.
const NO_SESSIONS_MARKER: &str = "No User exists";

/// Produces the raw session listing of a host.
#[async_trait]
pub trait SessionEnumerationBackend: Send + Sync {
    async fn enumerate(&self, host: &str) -> MonitorResult<String>;
}

/// Runs an external command (`quser /server:{host}` by default).
#[derive(Debug, Clone)]
pub struct CommandSessionBackend {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl From<&CollectorConfig> for CommandSessionBackend {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

impl CommandSessionBackend {
    fn args_for(&self, host: &str) -> Vec<String> {
        self.args.iter().map(|a| a.replace("{host}", host)).collect()
    }
}

#[async_trait]
impl SessionEnumerationBackend for CommandSessionBackend {
    async fn enumerate(&self, host: &str) -> MonitorResult<String> {
        let args = self.args_for(host);
        debug!("{} {}", self.command, args.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.command)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            MonitorError::connectivity(
                host,
                format!("{} timed out after {:?}", self.command, self.timeout),
            )
        })?
        .map_err(|e| MonitorError::connectivity(host, format!("{}: {}", self.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return Ok(stdout);
        }
        if stderr.contains(NO_SESSIONS_MARKER) || stdout.contains(NO_SESSIONS_MARKER) {
            return Ok(String::new());
        }

        Err(MonitorError::connectivity(
            host,
            format!(
                "{} exited with {}: {}",
                self.command,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        ))
    }
}

/// Requested level of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Only whether any non-waiting session exists.
    Simple,
    /// Full parsed records.
    Detailed,
}

/// Answer of [`SessionCollector::list_sessions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionListing {
    /// Simple mode: at least one non-waiting session exists.
    Activity(bool),
    /// Detailed mode.
    Records(Vec<SessionRecord>),
    /// Probe said down or the backend could not reach the host.
    HostNotReachable,
}

impl SessionListing {
    /// Shutdown-safety view: unreachable hosts count as having no activity.
    pub fn has_active_sessions(&self) -> bool {
        match self {
            SessionListing::Activity(active) => *active,
            SessionListing::Records(records) => records.iter().any(|r| !r.is_waiting()),
            SessionListing::HostNotReachable => false,
        }
    }
}

pub struct SessionCollector {
    probe: Arc<ReachabilityProbe>,
    backend: Arc<dyn SessionEnumerationBackend>,
    log: Arc<LogManager>,
}

impl SessionCollector {
    pub fn new(
        probe: Arc<ReachabilityProbe>,
        backend: Arc<dyn SessionEnumerationBackend>,
        log: Arc<LogManager>,
    ) -> Self {
        Self {
            probe,
            backend,
            log,
        }
    }

    /// Probe `host` and, if it is up, list its sessions. Never fails.
    pub async fn list_sessions(&self, host: &str, mode: SessionMode) -> SessionListing {
        if !self.probe.probe(host).await.is_up() {
            return SessionListing::HostNotReachable;
        }

        match self.collect(host).await {
            Ok(records) => match mode {
                SessionMode::Simple => {
                    SessionListing::Activity(records.iter().any(|r| !r.is_waiting()))
                }
                SessionMode::Detailed => SessionListing::Records(records),
            },
            Err(e) => {
                self.log.warning(SOURCE, e.to_string());
                SessionListing::HostNotReachable
            }
        }
    }

    /// Enumerate and parse the sessions of a host already known to be up.
    ///
    /// Malformed lines are dropped with a debug entry.
    pub async fn collect(&self, host: &str) -> MonitorResult<Vec<SessionRecord>> {
        let raw = self.backend.enumerate(host).await?;
        let parsed = parse_sessions(host, &raw);

        for line in &parsed.malformed {
            let err = MonitorError::Parse(line.clone());
            self.log.debug(SOURCE, format!("{}: {}", host, err));
        }

        if parsed.records.is_empty() {
            self.log.info(SOURCE, format!("{}: no sessions", host));
        } else {
            self.log.info(
                SOURCE,
                format!("{}: {} session(s)", host, parsed.records.len()),
            );
        }
        Ok(parsed.records)
    }
}
