/// TCP connect port scanner with risk annotation
///
/// A fixed number of workers probe each port in the range. Every attempt has a
/// short connect timeout plus an outer wait timeout; a port that errors or
/// times out is reported closed and never fails the scan.

pub mod range;
pub mod risk;
pub mod services;

use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{validate_target, InputError};

pub use range::PortRange;
pub use risk::{analyze_open_ports, PortFinding, PortRiskFinding, SecurityAnalysis, Severity};

pub const DEFAULT_WORKERS: usize = 20;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub target: String,
    pub port_range: String,
    pub open_ports: Vec<PortFinding>,
    pub total_scanned: usize,
    pub security_analysis: SecurityAnalysis,
}

#[derive(Debug, Clone)]
pub struct PortScanner {
    workers: usize,
    connect_timeout: Duration,
    wait_timeout: Duration,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl PortScanner {
    pub fn new(workers: usize, connect_timeout: Duration, wait_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            connect_timeout,
            wait_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.scan_workers,
            Duration::from_millis(config.scan_connect_timeout_ms),
            Duration::from_millis(config.scan_wait_timeout_ms),
        )
    }

    /// Scan `range` ("low-high") on `target`.
    ///
    /// Only malformed input is an error. An unresolvable host yields an empty
    /// report with the full span counted as scanned.
    pub async fn scan(&self, target: &str, range: &str) -> Result<ScanReport, InputError> {
        let target = validate_target(target)?;
        let range = PortRange::parse(range)?;

        info!("Scanning {} ports {} with {} workers", target, range, self.workers);

        let open_ports = match resolve(target).await {
            Some(ip) => self.probe_range(ip, range).await,
            None => {
                warn!("Could not resolve {}, reporting no open ports", target);
                Vec::new()
            }
        };

        info!(
            "Scan of {} finished: {} open of {} scanned",
            target,
            open_ports.len(),
            range.len()
        );

        let security_analysis = analyze_open_ports(&open_ports);
        Ok(ScanReport {
            target: target.to_string(),
            port_range: range.to_string(),
            total_scanned: range.len(),
            open_ports,
            security_analysis,
        })
    }

    async fn probe_range(&self, ip: IpAddr, range: PortRange) -> Vec<PortFinding> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for port in range.ports() {
            let semaphore = semaphore.clone();
            let connect_timeout = self.connect_timeout;
            let wait_timeout = self.wait_timeout;

            tasks.spawn(async move {
                // Closed semaphore is never expected; treat as closed port
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                let addr = SocketAddr::new(ip, port);
                let attempt = timeout(connect_timeout, TcpStream::connect(addr));
                match timeout(wait_timeout, attempt).await {
                    Ok(Ok(Ok(_stream))) => Some(port),
                    _ => None,
                }
            });
        }

        let mut open = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(port)) => {
                    debug!("Port {} open on {}", port, ip);
                    open.push(port);
                }
                Ok(None) => {}
                Err(e) => debug!("Port probe task failed: {}", e),
            }
        }

        open.sort_unstable();
        open.into_iter()
            .map(|port| PortFinding {
                port,
                service: services::service_name(port).to_string(),
            })
            .collect()
    }
}

/// Resolve a host name or literal address to the first usable IP
async fn resolve(target: &str) -> Option<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Some(ip);
    }
    match tokio::net::lookup_host((target, 0)).await {
        Ok(mut addrs) => addrs.next().map(|a| a.ip()),
        Err(e) => {
            debug!("DNS lookup for {} failed: {}", target, e);
            None
        }
    }
}
