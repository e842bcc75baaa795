//! FleetWatch - reachability and session monitor for host groups
//!
//! Probes every host of a named group (or an explicit host list), collects
//! the interactive sessions of the reachable ones, writes a rotating
//! operational log and optionally exports CSV reports.
//!
//! Exit codes:
//!   0 - Run completed (unreachable or failing hosts do not change this)
//!   1 - Invalid arguments, configuration or host-group definition

mod analysis;
mod cli;
mod config;
mod error;
mod groups;
mod logging;
mod models;
mod orchestrator;
mod probe;
mod report;
mod sessions;

use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use error::MonitorError;
use groups::{HostGroupResolver, TargetSpec};
use logging::{ConsoleMode, LogManager, LogSettings};
use orchestrator::{Orchestrator, RunReport};
use probe::SystemProbeBackend;
use sessions::{CommandSessionBackend, SessionListing, SessionMode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const SOURCE: &str = "Main";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Entries logged before the log directory is known are buffered.
    let log = Arc::new(LogManager::new());
    log.info(
        SOURCE,
        format!("FleetWatch v{} starting", env!("CARGO_PKG_VERSION")),
    );

    match run(args, log.clone()).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            let kind = match e.downcast_ref::<MonitorError>() {
                Some(err) if err.is_fatal() => "Configuration error",
                _ => "Run failed",
            };
            error!("{}: {:#}", kind, e);
            log.error(SOURCE, format!("{}: {:#}", kind, e));
            flush_startup_log(&log);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .fleetwatch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(config::DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the groups file, log directory, ports and timeouts.");
    Ok(())
}

/// Initialize diagnostic tracing from the merged verbosity settings.
fn init_logging(config: &Config) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.general.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// If the run failed before the log file was opened, write the buffered
/// entries to the default location so the failure is still on record.
fn flush_startup_log(log: &LogManager) {
    if log.active_path().is_some() {
        return;
    }
    debug!("Writing {} buffered log entries", log.pending());
    let settings = LogSettings::from(&config::LoggingConfig::default());
    if let Err(e) = log.attach(settings, ConsoleMode::Silent) {
        warn!("Could not write startup log: {}", e);
    }
}

/// Run the monitoring workflow. Returns the process exit code.
async fn run(args: Args, log: Arc<LogManager>) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args, &log)?;
    config.merge_with_args(&args);

    init_logging(&config);
    info!("FleetWatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let console = ConsoleMode::from_flags(config.general.verbose, config.general.silent);
    log.attach(LogSettings::from(&config.logging), console)
        .with_context(|| {
            format!(
                "Failed to open log directory {}",
                config.logging.directory.display()
            )
        })?;

    let target = args
        .target()
        .context("One of --group, --host or --hosts is required")?;
    let resolver = load_groups(&config, &target, &log)?;

    let orchestrator = Orchestrator::new(
        &config,
        resolver,
        Arc::new(SystemProbeBackend::new()),
        Arc::new(CommandSessionBackend::from(&config.collector)),
        log.clone(),
    );

    if args.check_idle {
        let mode = if config.general.verbose {
            SessionMode::Detailed
        } else {
            SessionMode::Simple
        };
        let results = orchestrator.check_idle(&target, mode).await?;
        if !config.general.silent {
            print_idle_report(&target, &results);
        }
        return Ok(0);
    }

    if !config.general.silent {
        println!("🔎 Monitoring {}", target);
    }

    let report = orchestrator.run(&target, args.export).await?;

    if !config.general.silent {
        print_run_report(&report, start_time.elapsed().as_secs_f64());
    }
    debug!("Log rotations this run: {}", log.rotations());

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args, log: &LogManager) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        log.info(SOURCE, format!("Loading config from {}", config_path.display()));
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            log.warning(SOURCE, format!("Ignoring invalid default config: {:#}", e));
            Ok(Config::default())
        }
    }
}

/// Load the host-group file. It is required for `--group`; explicit host
/// targets only use it when present.
fn load_groups(config: &Config, target: &TargetSpec, log: &LogManager) -> Result<HostGroupResolver> {
    let path = &config.general.groups_file;
    let needed = matches!(target, TargetSpec::Group(_));

    if !needed && !path.exists() {
        debug!("No groups file at {}, not needed", path.display());
        return Ok(HostGroupResolver::default());
    }

    let resolver = HostGroupResolver::load(path).map_err(|e| {
        log.error(SOURCE, e.to_string());
        e
    })?;
    debug!(
        "Loaded groups from {}: {}",
        path.display(),
        resolver.names().collect::<Vec<_>>().join(", ")
    );
    Ok(resolver)
}

fn print_run_report(report: &RunReport, duration: f64) {
    println!(
        "\n📋 Sessions for {} ({} hosts):",
        report.group.name,
        report.group.len()
    );

    for (host, records) in analysis::group_by_host(&report.batch) {
        if records.is_empty() {
            println!("   🟢 {}: no sessions", host);
            continue;
        }
        println!("   🔵 {}:", host);
        for record in records {
            println!(
                "      {} | {} | {} | {}",
                record.user, record.session, record.state, record.logon
            );
        }
    }
    for host in &report.batch.unreachable {
        println!("   ⚪ {}: not reachable", host);
    }
    for failure in &report.batch.failed {
        println!("   🔴 {}: {}", failure.host, failure.reason);
    }

    println!("\n📊 Summary:");
    for line in analysis::generate_summary_text(&report.summary).lines() {
        println!("   {}", line);
    }
    println!("   Duration: {:.1}s", duration);

    if let Some(ref export) = report.export {
        for artifact in &export.written {
            println!("\n📁 Saved {}", artifact.path.display());
        }
        for (path, reason) in &export.failed {
            eprintln!("\n⚠️  Could not write {}: {}", path.display(), reason);
        }
    }
}

fn print_idle_report(target: &TargetSpec, results: &[(String, SessionListing)]) {
    println!("🔌 Shutdown check for {}:", target);
    for (host, listing) in results {
        match listing {
            SessionListing::HostNotReachable => println!("   ⚪ {}: not reachable", host),
            _ if listing.has_active_sessions() => {
                println!("   🔴 {}: active sessions, do not shut down", host)
            }
            _ => println!("   🟢 {}: idle", host),
        }
        if let SessionListing::Records(records) = listing {
            for record in records {
                println!("      {} | {} | {}", record.user, record.session, record.state);
            }
        }
    }
}
