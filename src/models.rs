//! Data models for a monitoring run.
//!
//! This module contains the structures that flow between the probe,
//! the session collector, the aggregator and the exporters.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session label used for sessions whose name column is only an id.
pub const WAITING_LABEL: &str = "waiting";

/// A named, ordered set of host identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<String>,
}

impl HostGroup {
    pub fn new(name: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            hosts,
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Final verdict of the two-stage probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Up,
    Down,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Up => write!(f, "Up"),
            Reachability::Down => write!(f, "Down"),
        }
    }
}

/// Outcome of a single probe stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    Failed,
    /// The stage was never attempted because an earlier one failed.
    Skipped,
}

/// Result of probing one host in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub host: String,
    pub status: Reachability,
    pub ping: StageOutcome,
    pub port_connect: StageOutcome,
    /// Human-readable reason when the host is down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub checked_at: DateTime<Local>,
}

impl ProbeResult {
    pub fn up(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: Reachability::Up,
            ping: StageOutcome::Passed,
            port_connect: StageOutcome::Passed,
            reason: None,
            checked_at: Local::now(),
        }
    }

    pub fn ping_failed(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: Reachability::Down,
            ping: StageOutcome::Failed,
            port_connect: StageOutcome::Skipped,
            reason: Some("ping failed".to_string()),
            checked_at: Local::now(),
        }
    }

    pub fn port_closed(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: Reachability::Down,
            ping: StageOutcome::Passed,
            port_connect: StageOutcome::Failed,
            reason: Some("port closed or host still booting".to_string()),
            checked_at: Local::now(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == Reachability::Up
    }
}

/// One parsed session entry for a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRecord {
    pub host: String,
    pub user: String,
    /// Session label (console, rdp-tcp#0, ..., or `waiting`).
    pub session: String,
    pub state: String,
    /// Logon time as reported by the enumeration backend (minute precision).
    pub logon: String,
}

impl SessionRecord {
    /// Composite identity used for deduplication within a batch.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}|{}|{}", self.host, self.user, self.session, self.logon)
    }

    pub fn is_waiting(&self) -> bool {
        self.session == WAITING_LABEL
    }
}

/// Why a host contributed no sessions to the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostFailure {
    pub host: String,
    pub reason: String,
}

/// Per-host outcome of the probe/collect loop, in host-list order.
#[derive(Debug, Clone)]
pub enum HostOutcome {
    /// Host is up and its sessions were collected (possibly zero).
    Collected {
        host: String,
        records: Vec<SessionRecord>,
    },
    /// Probe classified the host as down.
    Unreachable(ProbeResult),
    /// Host was up but a later stage failed.
    Failed(HostFailure),
}

impl HostOutcome {
    pub fn host(&self) -> &str {
        match self {
            HostOutcome::Collected { host, .. } => host,
            HostOutcome::Unreachable(probe) => &probe.host,
            HostOutcome::Failed(failure) => &failure.host,
        }
    }
}

/// Deduplicated result of one monitoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationBatch {
    pub records: Vec<SessionRecord>,
    pub reachable: Vec<String>,
    pub unreachable: Vec<String>,
    pub failed: Vec<HostFailure>,
    pub created_at: DateTime<Local>,
}

impl AggregationBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records belonging to one host, in batch order.
    pub fn records_for<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a SessionRecord> {
        self.records.iter().filter(move |r| r.host == host)
    }
}

/// Statistics over an aggregation batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_sessions: usize,
    pub by_state: std::collections::BTreeMap<String, usize>,
    pub reachable_hosts: usize,
    pub unreachable_hosts: usize,
    pub failed_hosts: usize,
    /// Reachable hosts with at least one non-waiting session.
    pub occupied_hosts: usize,
    /// `occupied_hosts` as a percentage of reachable hosts.
    pub occupancy_percent: f64,
    pub high_load: bool,
}
