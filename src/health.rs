/// Health check HTTP endpoint
/// Exposes monitor-cycle health (/health, /ready, /metrics) and a live
/// traffic feed (/traffic, server-sent events) for dashboards and probes

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::scheduler::CycleOutcome;
use crate::traffic::{TrafficMonitor, TrafficSnapshot};

/// Timeout for reading HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of the monitor counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub cycles_total: u64,
    pub cycles_skipped: u64,
    pub probes_total: u64,
    pub failures_total: u64,
    /// Unix epoch seconds, 0 before the first cycle
    pub last_cycle_time: u64,
    pub last_cycle_ok: bool,
}

/// Counters updated by the scheduler loop
#[derive(Debug)]
pub struct MonitorMetrics {
    cycles_total: AtomicU64,
    cycles_skipped: AtomicU64,
    probes_total: AtomicU64,
    failures_total: AtomicU64,
    last_cycle_time: AtomicU64,
    last_cycle_ok: AtomicBool,
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            probes_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            last_cycle_time: AtomicU64::new(0),
            last_cycle_ok: AtomicBool::new(true), // Assume healthy until proven otherwise
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed cycle
    pub fn record_outcome(&self, outcome: &CycleOutcome) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CycleOutcome::Skipped => {
                self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            }
            CycleOutcome::Idle => {}
            CycleOutcome::Probed { .. } => {
                self.probes_total.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.last_cycle_time.store(unix_now(), Ordering::Relaxed);
        self.last_cycle_ok.store(true, Ordering::Relaxed);
    }

    /// Record a cycle that errored
    pub fn record_failure(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_time.store(unix_now(), Ordering::Relaxed);
        self.last_cycle_ok.store(false, Ordering::Relaxed);
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            probes_total: self.probes_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            last_cycle_time: self.last_cycle_time.load(Ordering::Relaxed),
            last_cycle_ok: self.last_cycle_ok.load(Ordering::Relaxed),
        }
    }
}

/// Run the health check HTTP server
pub async fn run_health_server(
    port: u16,
    metrics: Arc<MonitorMetrics>,
    traffic: Option<Arc<TrafficMonitor>>,
    cancel_token: CancellationToken,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind health check server on port {}: {}", port, e);
            return;
        }
    };

    info!("Health check server listening on http://0.0.0.0:{}/health", port);
    serve(listener, metrics, traffic, cancel_token).await;
}

/// Accept loop over an already bound listener
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<MonitorMetrics>,
    traffic: Option<Arc<TrafficMonitor>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, peer_addr)) => {
                        let metrics = metrics.clone();
                        let traffic = traffic.clone();
                        let cancel = cancel_token.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(socket, &metrics, traffic.as_deref(), cancel).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Health check server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(
    mut socket: TcpStream,
    metrics: &MonitorMetrics,
    traffic: Option<&TrafficMonitor>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    // Apply timeout to prevent slow-loris attacks
    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);

    // Parse the request line to get the path
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let response = match path {
        "/health" | "/healthz" | "/health/" => build_health_response(&metrics.status()),
        "/ready" | "/readyz" | "/ready/" => {
            // Ready before the first cycle, then only while cycles succeed
            let status = metrics.status();
            build_ready_response(status.last_cycle_ok || status.last_cycle_time == 0)
        }
        "/metrics" => build_metrics_response(&metrics.status(), traffic.map(|t| t.current()).as_deref()),
        "/traffic" => match traffic {
            Some(traffic) => return stream_traffic(socket, traffic, cancel).await,
            None => build_not_found_response(),
        },
        _ => build_not_found_response(),
    };

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

/// Hold the connection open and push every snapshot as an SSE `data:` line
async fn stream_traffic(
    mut socket: TcpStream,
    traffic: &TrafficMonitor,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n",
        )
        .await?;

    let mut updates = traffic.subscribe();
    loop {
        tokio::select! {
            snapshot = updates.recv() => {
                let Some(snapshot) = snapshot else { break };
                socket.write_all(sse_event(&snapshot).as_bytes()).await?;
                socket.flush().await?;
            }
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

fn sse_event(snapshot: &TrafficSnapshot) -> String {
    match serde_json::to_string(snapshot) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            warn!("Failed to serialize traffic snapshot: {}", e);
            ": serialization error\n\n".to_string()
        }
    }
}

fn build_health_response(status: &MonitorStatus) -> String {
    let body = format!(
        r#"{{"status":"healthy","cycles_total":{},"cycles_skipped":{},"probes_total":{},"failures_total":{},"last_cycle_time":{},"last_cycle_ok":{}}}"#,
        status.cycles_total,
        status.cycles_skipped,
        status.probes_total,
        status.failures_total,
        status.last_cycle_time,
        status.last_cycle_ok
    );

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_ready_response(ready: bool) -> String {
    let (status_code, status_text, body) = if ready {
        (200, "OK", r#"{"ready":true}"#)
    } else {
        (503, "Service Unavailable", r#"{"ready":false}"#)
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    )
}

fn build_metrics_response(status: &MonitorStatus, traffic: Option<&TrafficSnapshot>) -> String {
    // Prometheus-compatible metrics format
    let mut body = format!(
        "# HELP voipdiag_cycles_total Monitor cycles by outcome\n\
         # TYPE voipdiag_cycles_total counter\n\
         voipdiag_cycles_total{{result=\"ok\"}} {}\n\
         voipdiag_cycles_total{{result=\"failure\"}} {}\n\
         # HELP voipdiag_cycles_skipped_total Cycles skipped for lack of an AMI session\n\
         # TYPE voipdiag_cycles_skipped_total counter\n\
         voipdiag_cycles_skipped_total {}\n\
         # HELP voipdiag_probes_total QoS probes run during active calls\n\
         # TYPE voipdiag_probes_total counter\n\
         voipdiag_probes_total {}\n\
         # HELP voipdiag_last_cycle_timestamp Unix timestamp of last cycle\n\
         # TYPE voipdiag_last_cycle_timestamp gauge\n\
         voipdiag_last_cycle_timestamp {}\n\
         # HELP voipdiag_last_cycle_ok Whether the last cycle succeeded (1) or failed (0)\n\
         # TYPE voipdiag_last_cycle_ok gauge\n\
         voipdiag_last_cycle_ok {}\n",
        status.cycles_total - status.failures_total,
        status.failures_total,
        status.cycles_skipped,
        status.probes_total,
        status.last_cycle_time,
        if status.last_cycle_ok { 1 } else { 0 }
    );

    if let Some(snapshot) = traffic {
        let p = &snapshot.protocol_breakdown;
        body.push_str(&format!(
            "# HELP voipdiag_traffic_mbps Captured throughput in MB/s\n\
             # TYPE voipdiag_traffic_mbps gauge\n\
             voipdiag_traffic_mbps{{category=\"total\"}} {}\n\
             voipdiag_traffic_mbps{{category=\"http\"}} {}\n\
             voipdiag_traffic_mbps{{category=\"voip\"}} {}\n\
             voipdiag_traffic_mbps{{category=\"streaming\"}} {}\n\
             voipdiag_traffic_mbps{{category=\"other\"}} {}\n",
            snapshot.speed, p.http_mbps, p.voip_mbps, p.streaming_mbps, p.other_mbps
        ));
    }

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_not_found_response() -> String {
    let body = r#"{"error":"Not Found"}"#;
    format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}
