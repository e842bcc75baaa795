//! Two-stage reachability probe.
//!
//! Stage one is a single echo request. Only if it succeeds is stage two,
//! a TCP connect to the administrative endpoint-mapper port, attempted.
//! Both must pass for a host to be `Up`. Backend errors never propagate;
//! they classify the host as `Down`.

pub mod system;

use crate::config::ProbeConfig;
use crate::logging::LogManager;
use crate::models::ProbeResult;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub use system::SystemProbeBackend;

const SOURCE: &str = "Probe";

/// Network primitives used by the probe.
#[async_trait]
pub trait NetworkProbeBackend: Send + Sync {
    /// One echo request; `Ok(true)` if a reply arrived in time.
    async fn ping(&self, host: &str, timeout: Duration) -> io::Result<bool>;

    /// `Ok(true)` if a TCP connection to `host:port` was established in time.
    async fn tcp_connect(&self, host: &str, port: u16, timeout: Duration) -> io::Result<bool>;
}

/// Timeouts and port for the probe stages.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub ping_timeout: Duration,
    pub admin_port: u16,
    pub connect_timeout: Duration,
}

impl From<&ProbeConfig> for ProbeSettings {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
            admin_port: config.admin_port,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

pub struct ReachabilityProbe {
    backend: Arc<dyn NetworkProbeBackend>,
    settings: ProbeSettings,
    log: Arc<LogManager>,
}

impl ReachabilityProbe {
    pub fn new(
        backend: Arc<dyn NetworkProbeBackend>,
        settings: ProbeSettings,
        log: Arc<LogManager>,
    ) -> Self {
        Self {
            backend,
            settings,
            log,
        }
    }

    /// Classify `host` as up or down.
    pub async fn probe(&self, host: &str) -> ProbeResult {
        let ping = self.backend.ping(host, self.settings.ping_timeout).await;
        match ping {
            Ok(true) => self.log.debug(SOURCE, format!("{}: ping ok", host)),
            Ok(false) => {
                self.log.warning(SOURCE, format!("{}: ping failed", host));
                return ProbeResult::ping_failed(host);
            }
            Err(e) => {
                self.log
                    .warning(SOURCE, format!("{}: ping failed ({})", host, e));
                return ProbeResult::ping_failed(host);
            }
        }

        let port = self.settings.admin_port;
        let connect = self
            .backend
            .tcp_connect(host, port, self.settings.connect_timeout)
            .await;
        match connect {
            Ok(true) => {
                self.log
                    .debug(SOURCE, format!("{}: port {} open", host, port));
                ProbeResult::up(host)
            }
            Ok(false) => {
                self.log.warning(
                    SOURCE,
                    format!("{}: port {} closed or host still booting", host, port),
                );
                ProbeResult::port_closed(host)
            }
            Err(e) => {
                self.log.warning(
                    SOURCE,
                    format!("{}: port {} check failed ({})", host, port, e),
                );
                ProbeResult::port_closed(host)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend shared by probe, collector and orchestrator tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Default)]
    pub struct ScriptedNetwork {
        pub ping_ok: HashSet<String>,
        pub port_open: HashSet<String>,
        pub ping_errors: HashSet<String>,
        pub connect_attempts: Mutex<Vec<String>>,
    }

    impl ScriptedNetwork {
        /// Hosts that pass both stages.
        pub fn up(hosts: &[&str]) -> Self {
            let set: HashSet<String> = hosts.iter().map(|h| h.to_string()).collect();
            Self {
                ping_ok: set.clone(),
                port_open: set,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NetworkProbeBackend for ScriptedNetwork {
        async fn ping(&self, host: &str, _timeout: Duration) -> io::Result<bool> {
            if self.ping_errors.contains(host) {
                return Err(io::Error::new(io::ErrorKind::Other, "icmp socket denied"));
            }
            Ok(self.ping_ok.contains(host))
        }

        async fn tcp_connect(&self, host: &str, _port: u16, _timeout: Duration) -> io::Result<bool> {
            self.connect_attempts.lock().push(host.to_string());
            Ok(self.port_open.contains(host))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedNetwork;
    use super::*;
    use crate::models::{Reachability, StageOutcome};

    fn probe_with(network: Arc<ScriptedNetwork>) -> ReachabilityProbe {
        ReachabilityProbe::new(
            network,
            ProbeSettings::from(&ProbeConfig::default()),
            Arc::new(LogManager::new()),
        )
    }

    #[tokio::test]
    async fn test_ping_failure_skips_port_stage() {
        let network = Arc::new(ScriptedNetwork::default());
        let probe = probe_with(network.clone());

        let result = probe.probe("h2").await;

        assert_eq!(result.status, Reachability::Down);
        assert_eq!(result.port_connect, StageOutcome::Skipped);
        assert_eq!(result.reason.as_deref(), Some("ping failed"));
        assert!(network.connect_attempts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ping_error_is_down_not_fatal() {
        let mut network = ScriptedNetwork::default();
        network.ping_errors.insert("h3".to_string());
        let network = Arc::new(network);
        let probe = probe_with(network.clone());

        let result = probe.probe("h3").await;
        assert!(!result.is_up());
        assert!(network.connect_attempts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_both_stages_pass_is_up() {
        let probe = probe_with(Arc::new(ScriptedNetwork::up(&["h1"])));
        let result = probe.probe("h1").await;
        assert_eq!(result.status, Reachability::Up);
        assert_eq!(result.ping, StageOutcome::Passed);
        assert_eq!(result.port_connect, StageOutcome::Passed);
    }

    #[tokio::test]
    async fn test_closed_port_is_down() {
        let mut network = ScriptedNetwork::default();
        network.ping_ok.insert("booting".to_string());
        let probe = probe_with(Arc::new(network));

        let result = probe.probe("booting").await;
        assert_eq!(result.status, Reachability::Down);
        assert_eq!(result.port_connect, StageOutcome::Failed);
        assert_eq!(
            result.reason.as_deref(),
            Some("port closed or host still booting")
        );
    }

    #[tokio::test]
    async fn test_each_stage_is_logged() {
        let log = Arc::new(LogManager::new());
        let probe = ReachabilityProbe::new(
            Arc::new(ScriptedNetwork::up(&["h1"])),
            ProbeSettings::from(&ProbeConfig::default()),
            log.clone(),
        );
        probe.probe("h1").await;
        assert_eq!(log.pending(), 2);
    }
}
