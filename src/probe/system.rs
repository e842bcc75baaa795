//! Probe backend using the system `ping` binary and tokio TCP sockets.

use super::NetworkProbeBackend;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

/// Extra time granted to the ping process beyond its own timeout.
const PROCESS_GRACE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Default)]
pub struct SystemProbeBackend;

impl SystemProbeBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Arguments for one echo request with the given timeout.
fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1);
    if cfg!(target_os = "windows") {
        vec![
            "-n".to_string(),
            "1".to_string(),
            "-w".to_string(),
            millis.to_string(),
            host.to_string(),
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            millis.to_string(),
            host.to_string(),
        ]
    } else {
        // iputils takes whole seconds.
        let secs = timeout.as_secs().max(1);
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            secs.to_string(),
            host.to_string(),
        ]
    }
}

#[async_trait]
impl NetworkProbeBackend for SystemProbeBackend {
    async fn ping(&self, host: &str, timeout: Duration) -> io::Result<bool> {
        let args = ping_args(host, timeout);
        debug!("ping {}", args.join(" "));

        let status = tokio::time::timeout(
            timeout + PROCESS_GRACE,
            Command::new("ping")
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "ping timed out"))??;

        Ok(status.success())
    }

    async fn tcp_connect(&self, host: &str, port: u16, timeout: Duration) -> io::Result<bool> {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) => {
                debug!("connect {}:{} failed: {}", host, port, e);
                Ok(false)
            }
            Err(_) => {
                debug!("connect {}:{} timed out", host, port);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_ping_args_single_echo() {
        let args = ping_args("lab-01", Duration::from_millis(750));
        assert_eq!(args.last().map(String::as_str), Some("lab-01"));
        assert!(args.contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn test_tcp_connect_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let backend = SystemProbeBackend::new();

        let open = backend
            .tcp_connect("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(open);

        drop(listener);
        let closed = backend
            .tcp_connect("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(!closed);
    }
}
