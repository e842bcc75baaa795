//! Host-group definitions and run target resolution.
//!
//! Groups are read from a TOML file with a single `[groups]` table:
//!
//! ```toml
//! [groups]
//! lab = ["lab-pc-01", "lab-pc-02"]
//! office = ["10.0.4.11", "10.0.4.12"]
//! ```
//!
//! The file is validated eagerly: a malformed entry fails the load.

use crate::error::{MonitorError, MonitorResult};
use crate::models::HostGroup;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Name given to the temporary group built from `--hosts`.
pub const ADHOC_GROUP: &str = "adhoc";

/// What a run should monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Group(String),
    Host(String),
    List(Vec<String>),
}

impl std::fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSpec::Group(name) => write!(f, "group {}", name),
            TargetSpec::Host(host) => write!(f, "host {}", host),
            TargetSpec::List(hosts) => write!(f, "ad-hoc list ({} hosts)", hosts.len()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
}

/// Typed view of the group file.
#[derive(Debug, Clone, Default)]
pub struct HostGroupResolver {
    groups: BTreeMap<String, HostGroup>,
}

impl HostGroupResolver {
    /// Load and validate the group file. Any failure is a configuration error.
    pub fn load(path: &Path) -> MonitorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::config(format!(
                "cannot read groups file {}: {}",
                path.display(),
                e
            ))
        })?;

        let resolver = Self::from_toml_str(&content).map_err(|e| match e {
            MonitorError::Config(msg) => {
                MonitorError::config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        debug!(
            "Loaded {} host groups from {}",
            resolver.groups.len(),
            path.display()
        );
        Ok(resolver)
    }

    /// Parse and validate group definitions from TOML text.
    pub fn from_toml_str(content: &str) -> MonitorResult<Self> {
        let file: GroupFile = toml::from_str(content)
            .map_err(|e| MonitorError::config(format!("invalid groups file: {}", e)))?;

        if file.groups.is_empty() {
            return Err(MonitorError::config("no host groups defined"));
        }

        let mut groups = BTreeMap::new();
        for (name, hosts) in file.groups {
            if name.trim().is_empty() {
                return Err(MonitorError::config("group with an empty name"));
            }
            if hosts.is_empty() {
                return Err(MonitorError::config(format!("group '{}' has no hosts", name)));
            }

            let mut seen = HashSet::new();
            for host in &hosts {
                validate_host_id(host)
                    .map_err(|msg| MonitorError::config(format!("group '{}': {}", name, msg)))?;
                if !seen.insert(host.as_str()) {
                    return Err(MonitorError::config(format!(
                        "group '{}': duplicate host '{}'",
                        name, host
                    )));
                }
            }

            groups.insert(name.clone(), HostGroup::new(name, hosts));
        }

        Ok(Self { groups })
    }

    pub fn group(&self, name: &str) -> Option<&HostGroup> {
        self.groups.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Resolve the target set for a run.
    ///
    /// A single host and an ad-hoc list are materialized as temporary groups
    /// so the rest of the pipeline only ever sees a `HostGroup`.
    pub fn resolve(&self, target: &TargetSpec) -> MonitorResult<HostGroup> {
        match target {
            TargetSpec::Group(name) => self.group(name).cloned().ok_or_else(|| {
                MonitorError::config(format!(
                    "unknown host group '{}' (available: {})",
                    name,
                    self.names().collect::<Vec<_>>().join(", ")
                ))
            }),
            TargetSpec::Host(host) => {
                validate_host_id(host).map_err(MonitorError::config)?;
                Ok(HostGroup::new(host.clone(), vec![host.clone()]))
            }
            TargetSpec::List(hosts) => {
                let mut seen = HashSet::new();
                let mut ordered = Vec::with_capacity(hosts.len());
                for host in hosts {
                    validate_host_id(host).map_err(MonitorError::config)?;
                    if seen.insert(host.clone()) {
                        ordered.push(host.clone());
                    }
                }
                if ordered.is_empty() {
                    return Err(MonitorError::config("ad-hoc host list is empty"));
                }
                Ok(HostGroup::new(ADHOC_GROUP, ordered))
            }
        }
    }
}

/// Hostnames and IPv4/IPv6 literals only.
fn validate_host_id(host: &str) -> Result<(), String> {
    if host.trim().is_empty() {
        return Err("empty host identifier".to_string());
    }
    let valid = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    if !valid || host.starts_with(['-', '.']) || host.ends_with('.') {
        return Err(format!("invalid host identifier '{}'", host));
    }
    Ok(())
}
