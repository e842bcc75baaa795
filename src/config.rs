//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.fleetwatch.toml` files. The resulting `Config` is built once in
//! `main` and handed to every component.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".fleetwatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Reachability probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Session enumeration settings.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Rotating log settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// CSV / cache export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Alert thresholds.
    #[serde(default)]
    pub alerts: AlertConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to the host-group definitions.
    #[serde(default = "default_groups_file")]
    pub groups_file: PathBuf,

    /// Number of hosts processed concurrently (1 = strictly sequential).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Enable verbose console output by default.
    #[serde(default)]
    pub verbose: bool,

    /// Suppress all console output by default.
    #[serde(default)]
    pub silent: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            groups_file: default_groups_file(),
            concurrency: default_concurrency(),
            verbose: false,
            silent: false,
        }
    }
}

impl GeneralConfig {
    /// Diagnostic tracing level for the merged verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.silent {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        }
    }
}

fn default_groups_file() -> PathBuf {
    PathBuf::from("hostgroups.toml")
}

fn default_concurrency() -> usize {
    1
}

/// Two-stage probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Echo timeout in milliseconds.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Administrative endpoint-mapper port checked after a successful echo.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Port connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: default_ping_timeout(),
            admin_port: default_admin_port(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_ping_timeout() -> u64 {
    1000
}

fn default_admin_port() -> u16 {
    135
}

fn default_connect_timeout() -> u64 {
    1500
}

/// External session-enumeration command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Program to run.
    #[serde(default = "default_session_command")]
    pub command: String,

    /// Arguments; `{host}` is replaced by the host identifier.
    #[serde(default = "default_session_args")]
    pub args: Vec<String>,

    /// Command timeout in seconds.
    #[serde(default = "default_command_timeout")]
    pub timeout_seconds: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            command: default_session_command(),
            args: default_session_args(),
            timeout_seconds: default_command_timeout(),
        }
    }
}

fn default_session_command() -> String {
    "quser".to_string()
}

fn default_session_args() -> Vec<String> {
    vec!["/server:{host}".to_string()]
}

fn default_command_timeout() -> u64 {
    15
}

/// Rotating log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory holding the active log and the `archive/` subdirectory.
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,

    /// Logical category; the active file is `<category>.log`.
    #[serde(default = "default_category")]
    pub category: String,

    /// Size at which the active file is rotated.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Number of archives kept after pruning.
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Gzip archives on rotation.
    #[serde(default = "default_true")]
    pub compress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            category: default_category(),
            max_bytes: default_max_bytes(),
            retention: default_retention(),
            compress: true,
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_category() -> String {
    "sessions".to_string()
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_retention() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Export artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory for all artifacts.
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// Dated history file name; `{date}` is replaced by `YYYY-MM-DD`.
    #[serde(default = "default_dated_pattern")]
    pub dated_pattern: String,

    /// Fixed-path cache holding only the latest run.
    #[serde(default = "default_latest_file")]
    pub latest_file: String,

    /// Also write `latest_summary.json`.
    #[serde(default = "default_true")]
    pub json_summary: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            dated_pattern: default_dated_pattern(),
            latest_file: default_latest_file(),
            json_summary: true,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_dated_pattern() -> String {
    "sessions_{date}.csv".to_string()
}

fn default_latest_file() -> String {
    "sessions_latest.csv".to_string()
}

/// Alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Fleet occupancy (percent of reachable hosts with active sessions)
    /// at or above which a run is flagged as high load.
    #[serde(default = "default_high_load")]
    pub high_load_percent: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            high_load_percent: default_high_load(),
        }
    }
}

fn default_high_load() -> f64 {
    80.0
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            anyhow::bail!("general.concurrency must be at least 1");
        }
        if self.logging.max_bytes == 0 {
            anyhow::bail!("logging.max_bytes must be greater than 0");
        }
        if self.logging.category.trim().is_empty() {
            anyhow::bail!("logging.category must not be empty");
        }
        if !(0.0..=100.0).contains(&self.alerts.high_load_percent) {
            anyhow::bail!("alerts.high_load_percent must be between 0 and 100");
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref groups) = args.groups_file {
            self.general.groups_file = groups.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ref dir) = args.log_dir {
            self.logging.directory = dir.clone();
        }
        if let Some(retention) = args.retention {
            self.logging.retention = retention;
        }
        if let Some(ref dir) = args.output_dir {
            self.export.directory = dir.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
            self.general.silent = false;
        }
        if args.silent {
            self.general.silent = true;
            self.general.verbose = false;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.probe.admin_port, 135);
        assert_eq!(config.logging.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.alerts.high_load_percent, 80.0);
        assert_eq!(config.general.concurrency, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
groups_file = "/etc/fleetwatch/groups.toml"
concurrency = 8

[probe]
ping_timeout_ms = 500

[logging]
retention = 3
compress = false

[alerts]
high_load_percent = 70.0
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(
            config.general.groups_file,
            PathBuf::from("/etc/fleetwatch/groups.toml")
        );
        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.probe.ping_timeout_ms, 500);
        assert_eq!(config.probe.admin_port, 135);
        assert_eq!(config.logging.retention, 3);
        assert!(!config.logging.compress);
        assert_eq!(config.logging.category, "sessions");
        assert_eq!(config.alerts.high_load_percent, 70.0);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.general.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[probe]"));
        assert!(toml_str.contains("[logging]"));
        assert!(toml_str.contains("[export]"));
    }

    #[test]
    fn test_log_level_follows_merged_settings() {
        use crate::cli::Args;
        use clap::Parser;

        let mut config: Config = toml::from_str("[general]\nsilent = true\n").unwrap();
        config.merge_with_args(&Args::try_parse_from(["fleetwatch", "--group", "lab"]).unwrap());
        assert_eq!(config.general.log_level(), tracing::Level::ERROR);

        config.merge_with_args(&Args::try_parse_from(["fleetwatch", "--group", "lab", "-v"]).unwrap());
        assert_eq!(config.general.log_level(), tracing::Level::DEBUG);

        assert_eq!(Config::default().general.log_level(), tracing::Level::WARN);
    }
}
