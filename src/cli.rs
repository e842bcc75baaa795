//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::groups::TargetSpec;
use clap::Parser;
use std::path::PathBuf;

/// FleetWatch - reachability and session monitor for host groups
///
/// Probes every host of a group (echo + administrative port), collects
/// interactive sessions from the reachable ones and writes rotating logs
/// and CSV reports.
///
/// Examples:
///   fleetwatch --group lab
///   fleetwatch --group lab --export
///   fleetwatch --host lab-pc-07 --verbose
///   fleetwatch --hosts lab-pc-01,lab-pc-02 --check-idle
///   fleetwatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Host group to monitor (as defined in the groups file)
    #[arg(short, long, value_name = "NAME", conflicts_with_all = ["host", "hosts"])]
    pub group: Option<String>,

    /// Monitor a single host
    #[arg(short = 'H', long, value_name = "HOST", conflicts_with = "hosts")]
    pub host: Option<String>,

    /// Monitor an ad-hoc list of hosts (comma-separated)
    ///
    /// Example: --hosts lab-pc-01,lab-pc-02,10.0.0.12
    #[arg(long, value_name = "HOSTS", value_delimiter = ',')]
    pub hosts: Option<Vec<String>>,

    /// Write the dated CSV history, the latest cache and the JSON summary
    #[arg(short, long)]
    pub export: bool,

    /// Only report whether each host has active sessions (shutdown safety)
    #[arg(long, conflicts_with = "export")]
    pub check_idle: bool,

    /// Enable verbose output (debug lines on the console)
    #[arg(short, long)]
    pub verbose: bool,

    /// Silent mode: no console output at all
    #[arg(short, long)]
    pub silent: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .fleetwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host-group definitions file
    #[arg(long = "groups", value_name = "FILE", env = "FLEETWATCH_GROUPS")]
    pub groups_file: Option<PathBuf>,

    /// Directory for the rotating log
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Number of log archives to keep
    #[arg(long, value_name = "COUNT")]
    pub retention: Option<usize>,

    /// Directory for exported reports
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of hosts processed concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Generate a default .fleetwatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.group.is_none() && self.host.is_none() && self.hosts.is_none() {
            return Err("One of --group, --host or --hosts is required".to_string());
        }

        if let Some(ref group) = self.group {
            if group.trim().is_empty() {
                return Err("Group name must not be empty".to_string());
            }
        }

        if let Some(ref host) = self.host {
            if host.trim().is_empty() {
                return Err("Host must not be empty".to_string());
            }
        }

        if let Some(ref hosts) = self.hosts {
            if hosts.iter().all(|h| h.trim().is_empty()) {
                return Err("--hosts needs at least one host".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.silent {
            return Err("Cannot use both --verbose and --silent".to_string());
        }

        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err("Concurrency must be at least 1".to_string());
            }
        }

        Ok(())
    }

    /// The hosts this run targets.
    pub fn target(&self) -> Option<TargetSpec> {
        if let Some(ref group) = self.group {
            Some(TargetSpec::Group(group.trim().to_string()))
        } else if let Some(ref host) = self.host {
            Some(TargetSpec::Host(host.trim().to_string()))
        } else {
            self.hosts.as_ref().map(|hosts| {
                TargetSpec::List(
                    hosts
                        .iter()
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect(),
                )
            })
        }
    }
}
