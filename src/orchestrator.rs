//! One monitoring run over a target set.
//!
//! For each host: probe, then (if up) collect sessions. Each host runs in
//! its own task so an error or panic is contained to that host. Hosts are
//! driven through an ordered buffered stream, so outcomes come back in
//! host-list order whatever the concurrency, and first-seen dedup in the
//! aggregator stays deterministic.

use crate::analysis::{aggregate, summarize};
use crate::config::Config;
use crate::error::MonitorResult;
use crate::groups::{HostGroupResolver, TargetSpec};
use crate::logging::LogManager;
use crate::models::{AggregationBatch, BatchSummary, HostFailure, HostGroup, HostOutcome};
use crate::probe::{NetworkProbeBackend, ProbeSettings, ReachabilityProbe};
use crate::report::{ExportOutcome, ReportExporter};
use crate::sessions::{SessionCollector, SessionEnumerationBackend, SessionListing, SessionMode};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

const SOURCE: &str = "Orchestrator";

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub group: HostGroup,
    pub batch: AggregationBatch,
    pub summary: BatchSummary,
    pub export: Option<ExportOutcome>,
}

pub struct Orchestrator {
    resolver: HostGroupResolver,
    probe: Arc<ReachabilityProbe>,
    collector: Arc<SessionCollector>,
    exporter: ReportExporter,
    log: Arc<LogManager>,
    concurrency: usize,
    high_load_percent: f64,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        resolver: HostGroupResolver,
        network: Arc<dyn NetworkProbeBackend>,
        sessions: Arc<dyn SessionEnumerationBackend>,
        log: Arc<LogManager>,
    ) -> Self {
        let probe = Arc::new(ReachabilityProbe::new(
            network,
            ProbeSettings::from(&config.probe),
            log.clone(),
        ));
        let collector = Arc::new(SessionCollector::new(probe.clone(), sessions, log.clone()));
        let exporter = ReportExporter::new(config.export.clone(), log.clone());

        Self {
            resolver,
            probe,
            collector,
            exporter,
            log,
            concurrency: config.general.concurrency.max(1),
            high_load_percent: config.alerts.high_load_percent,
            show_progress: !config.general.silent,
        }
    }

    /// Resolve the target set. Unknown groups and invalid hosts are fatal.
    pub fn resolve(&self, target: &TargetSpec) -> MonitorResult<HostGroup> {
        self.resolver.resolve(target).map_err(|e| {
            self.log.error(SOURCE, e.to_string());
            e
        })
    }

    /// Run the full pipeline: resolve, probe and collect, aggregate, export.
    ///
    /// Only target resolution can fail; host failures end up in the batch.
    pub async fn run(&self, target: &TargetSpec, export: bool) -> MonitorResult<RunReport> {
        let group = self.resolve(target)?;
        if group.is_empty() {
            self.log.warning(SOURCE, format!("{} has no hosts", target));
        }
        self.log.audit(
            SOURCE,
            format!("Run started: {} ({} hosts)", target, group.len()),
        );

        let outcomes = self.collect_outcomes(&group).await;
        let batch = aggregate(&outcomes);
        let summary = summarize(&batch, self.high_load_percent);

        if batch.is_empty() {
            self.log.info(SOURCE, "No active sessions found");
        }
        if summary.high_load {
            self.log.warning(
                SOURCE,
                format!(
                    "High load: {:.0}% of reachable hosts in use (threshold {:.0}%)",
                    summary.occupancy_percent, self.high_load_percent
                ),
            );
        }

        let export = if export {
            Some(self.exporter.export(&batch, &summary))
        } else {
            None
        };

        self.log.audit(
            SOURCE,
            format!(
                "Run finished: {} sessions, {} reachable, {} unreachable, {} failed",
                summary.total_sessions,
                summary.reachable_hosts,
                summary.unreachable_hosts,
                summary.failed_hosts
            ),
        );

        Ok(RunReport {
            group,
            batch,
            summary,
            export,
        })
    }

    /// Probe and collect every host of `group`, in host-list order.
    pub async fn collect_outcomes(&self, group: &HostGroup) -> Vec<HostOutcome> {
        let progress = self.progress_bar(group.len());

        let outcomes = self
            .for_each_host(&group.hosts, &progress, |probe, collector, log, host| {
                process_host(probe, collector, log, host)
            })
            .await;

        self.finish_progress(&progress);
        outcomes
            .into_iter()
            .map(|(host, result)| {
                let outcome = result
                    .unwrap_or_else(|reason| HostOutcome::Failed(HostFailure { host, reason }));
                debug!("{}: {}", outcome.host(), outcome_label(&outcome));
                outcome
            })
            .collect()
    }

    /// Shutdown-safety check: does each host have active sessions?
    ///
    /// `Detailed` mode also returns who is logged in.
    pub async fn check_idle(
        &self,
        target: &TargetSpec,
        mode: SessionMode,
    ) -> MonitorResult<Vec<(String, SessionListing)>> {
        let group = self.resolve(target)?;
        let progress = self.progress_bar(group.len());

        let results = self
            .for_each_host(&group.hosts, &progress, move |_, collector, _, host| async move {
                collector.list_sessions(&host, mode).await
            })
            .await;

        self.finish_progress(&progress);
        Ok(results
            .into_iter()
            .map(|(host, result)| (host, result.unwrap_or(SessionListing::HostNotReachable)))
            .collect())
    }

    /// Run `task` for every host in its own tokio task, `concurrency` at a
    /// time, returning results in host order. A panicking task yields `Err`.
    async fn for_each_host<F, Fut, T>(
        &self,
        hosts: &[String],
        progress: &ProgressBar,
        task: F,
    ) -> Vec<(String, Result<T, String>)>
    where
        F: Fn(Arc<ReachabilityProbe>, Arc<SessionCollector>, Arc<LogManager>, String) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        stream::iter(hosts.iter().cloned())
            .map(|host| {
                let fut = task(
                    self.probe.clone(),
                    self.collector.clone(),
                    self.log.clone(),
                    host.clone(),
                );
                let log = self.log.clone();
                let progress = progress.clone();
                async move {
                    let result = tokio::spawn(fut).await.map_err(|e| {
                        log.error(SOURCE, format!("{}: host task aborted: {}", host, e));
                        format!("host task aborted: {}", e)
                    });
                    progress.inc(1);
                    (host, result)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} hosts")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.log.set_progress(Some(pb.clone()));
        pb
    }

    fn finish_progress(&self, pb: &ProgressBar) {
        pb.finish_and_clear();
        self.log.set_progress(None);
    }
}

fn outcome_label(outcome: &HostOutcome) -> String {
    match outcome {
        HostOutcome::Collected { records, .. } => format!("{} record(s)", records.len()),
        HostOutcome::Unreachable(result) => result.status.to_string(),
        HostOutcome::Failed(failure) => format!("failed ({})", failure.reason),
    }
}

/// Probe one host and collect its sessions if it is up.
async fn process_host(
    probe: Arc<ReachabilityProbe>,
    collector: Arc<SessionCollector>,
    log: Arc<LogManager>,
    host: String,
) -> HostOutcome {
    let result = probe.probe(&host).await;
    if !result.is_up() {
        log.warning(
            SOURCE,
            format!(
                "{} unreachable: {}",
                host,
                result.reason.as_deref().unwrap_or("unknown")
            ),
        );
        return HostOutcome::Unreachable(result);
    }

    match collector.collect(&host).await {
        Ok(records) => HostOutcome::Collected { host, records },
        Err(e) => {
            log.error(SOURCE, format!("{}: {}", host, e));
            HostOutcome::Failed(HostFailure {
                host,
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{ConsoleMode, LogSettings};
    use crate::probe::testing::ScriptedNetwork;
    use crate::sessions::collector::testing::ScriptedSessions;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const GROUPS: &str = "[groups]\nlab = [\"h1\", \"h2\"]\n";
    const H1_OUTPUT: &str = "Status  User  Session  State  Logon\n\
                             alice  console  Active  none  10/16/2026 8:15 AM\n";

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.general.silent = true;
        config.logging.directory = dir.join("logs");
        config.export.directory = dir.join("reports");
        config
    }

    fn orchestrator(dir: &Path, network: ScriptedNetwork, sessions: ScriptedSessions) -> Orchestrator {
        let config = test_config(dir);
        let log = Arc::new(
            LogManager::open(LogSettings::from(&config.logging), ConsoleMode::Silent).unwrap(),
        );
        Orchestrator::new(
            &config,
            HostGroupResolver::from_toml_str(GROUPS).unwrap(),
            Arc::new(network),
            Arc::new(sessions),
            log,
        )
    }

    fn lab() -> TargetSpec {
        TargetSpec::Group("lab".to_string())
    }

    #[tokio::test]
    async fn test_header_line_yields_no_record() {
        let tmp = TempDir::new().unwrap();
        let o = orchestrator(
            tmp.path(),
            ScriptedNetwork::up(&["h1"]),
            ScriptedSessions::default().with("h1", H1_OUTPUT),
        );

        let report = o.run(&lab(), false).await.unwrap();

        assert_eq!(report.batch.records.len(), 1);
        assert_eq!(report.batch.records[0].host, "h1");
        assert_eq!(report.batch.records[0].user, "alice");
        assert!(report.export.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_still_exports() {
        let tmp = TempDir::new().unwrap();
        let o = orchestrator(
            tmp.path(),
            ScriptedNetwork::up(&["h1"]),
            ScriptedSessions::default().with("h1", H1_OUTPUT),
        );

        let report = o.run(&lab(), true).await.unwrap();

        assert_eq!(report.batch.unreachable, vec!["h2"]);
        assert!(report.batch.records.iter().all(|r| r.host == "h1"));
        let export = report.export.unwrap();
        assert!(export.is_complete());

        let latest = fs::read_to_string(tmp.path().join("reports/sessions_latest.csv")).unwrap();
        assert_eq!(latest.lines().count(), 2);
        assert!(!latest.contains("h2"));
    }

    #[tokio::test]
    async fn test_repeated_passes_deduplicate() {
        let tmp = TempDir::new().unwrap();
        let o = orchestrator(
            tmp.path(),
            ScriptedNetwork::up(&["h1", "h2"]),
            ScriptedSessions::default()
                .with("h1", H1_OUTPUT)
                .with("h2", ""),
        );
        let group = o.resolve(&lab()).unwrap();

        let mut outcomes = o.collect_outcomes(&group).await;
        outcomes.extend(o.collect_outcomes(&group).await);
        let batch = aggregate(&outcomes);

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.reachable, vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn test_backend_failure_is_isolated() {
        let tmp = TempDir::new().unwrap();
        // h2 is up but the session backend has nothing scripted for it.
        let o = orchestrator(
            tmp.path(),
            ScriptedNetwork::up(&["h1", "h2"]),
            ScriptedSessions::default().with("h1", H1_OUTPUT),
        );

        let report = o.run(&lab(), false).await.unwrap();

        assert_eq!(report.batch.records.len(), 1);
        assert_eq!(report.batch.failed.len(), 1);
        assert_eq!(report.batch.failed[0].host, "h2");
        assert_eq!(report.summary.failed_hosts, 1);
    }

    #[tokio::test]
    async fn test_unknown_group_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let o = orchestrator(tmp.path(), ScriptedNetwork::default(), ScriptedSessions::default());
        let err = o
            .run(&TargetSpec::Group("nope".to_string()), false)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_order_preserved_with_concurrency() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        config.general.concurrency = 4;
        let hosts: Vec<String> = (1..=12).map(|i| format!("pc{:02}", i)).collect();
        let host_refs: Vec<&str> = hosts.iter().map(String::as_str).collect();

        let mut sessions = ScriptedSessions::default();
        for host in &hosts {
            sessions = sessions.with(host, "alice  console  Active  none  10/16/2026 8:15 AM\n");
        }

        let o = Orchestrator::new(
            &config,
            HostGroupResolver::default(),
            Arc::new(ScriptedNetwork::up(&host_refs)),
            Arc::new(sessions),
            Arc::new(LogManager::new()),
        );

        let report = o.run(&TargetSpec::List(hosts.clone()), false).await.unwrap();
        let order: Vec<&str> = report.batch.records.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(order, host_refs);
    }

    #[tokio::test]
    async fn test_progress_bar_is_detached_after_run() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        config.general.silent = false;
        config.general.concurrency = 2;
        let log = Arc::new(LogManager::new());
        let o = Orchestrator::new(
            &config,
            HostGroupResolver::from_toml_str(GROUPS).unwrap(),
            Arc::new(ScriptedNetwork::up(&["h1"])),
            Arc::new(ScriptedSessions::default().with("h1", H1_OUTPUT)),
            log.clone(),
        );

        let report = o.run(&lab(), false).await.unwrap();

        assert_eq!(report.batch.records.len(), 1);
        assert!(!log.has_progress());
    }

    #[tokio::test]
    async fn test_check_idle() {
        let tmp = TempDir::new().unwrap();
        let o = orchestrator(
            tmp.path(),
            ScriptedNetwork::up(&["h1"]),
            ScriptedSessions::default().with("h1", H1_OUTPUT),
        );

        let results = o.check_idle(&lab(), SessionMode::Simple).await.unwrap();
        assert_eq!(results[0], ("h1".to_string(), SessionListing::Activity(true)));
        assert_eq!(results[1], ("h2".to_string(), SessionListing::HostNotReachable));

        let detailed = o.check_idle(&lab(), SessionMode::Detailed).await.unwrap();
        match &detailed[0].1 {
            SessionListing::Records(records) => assert_eq!(records[0].user, "alice"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(detailed[0].1.has_active_sessions());
    }

    #[tokio::test]
    async fn test_run_is_audited() {
        let tmp = TempDir::new().unwrap();
        let o = orchestrator(
            tmp.path(),
            ScriptedNetwork::up(&["h1"]),
            ScriptedSessions::default().with("h1", H1_OUTPUT),
        );
        o.run(&lab(), false).await.unwrap();

        let log = fs::read_to_string(tmp.path().join("logs/sessions.log")).unwrap();
        assert!(log.contains("[AUDIT] [Orchestrator] Run started: group lab (2 hosts)"));
        assert!(log.contains("[AUDIT] [Orchestrator] Run finished"));
        assert!(log.contains("[WARNING] [Probe] h2: ping failed"));
    }
}
