/// Round-trip probe runner
///
/// Shells out to the OS `ping` (or a configured replacement), collects its
/// stdout line by line and extracts one RTT per reply line.

use anyhow::{Context, Result};
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::metrics::{QosResult, QosSample};
use crate::error::validate_target;

pub const DEFAULT_PROBE_PROGRAM: &str = "ping";

/// Fixed slack added to every probe run on top of the per-packet allowance
const BASE_DEADLINE: Duration = Duration::from_secs(5);
const PER_PACKET_DEADLINE: Duration = Duration::from_secs(2);

/// RTT patterns tried in order, first match wins
static RTT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)time[=<](\d+(?:\.\d+)?)\s*ms",
        r"(?i)time=(\d+(?:\.\d+)?)\s*ms",
        r"(?i)tiempo[=<](\d+(?:\.\d+)?)\s*ms",
        r"(\d+(?:\.\d+)?)\s*ms",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("RTT pattern is a valid regex"))
    .collect()
});

/// Summary lines carry millisecond figures that are not per-reply RTTs
const SUMMARY_MARKERS: [&str; 6] = [
    "min/avg",
    "minimum",
    "mínimo",
    "packets transmitted",
    "packets: sent",
    "paquetes:",
];

/// Extract a round-trip time in milliseconds from one line of probe output
pub fn extract_rtt(line: &str) -> Option<f64> {
    let lower = line.to_lowercase();
    if SUMMARY_MARKERS.iter().any(|m| lower.contains(m)) {
        return None;
    }

    RTT_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}

/// Arguments selecting the packet count for the platform's ping
fn count_flag() -> &'static str {
    if cfg!(windows) {
        "-n"
    } else {
        "-c"
    }
}

/// Run `program` against `target` and return its stdout lines.
///
/// A run that overshoots `deadline` is killed and whatever it printed so far
/// is returned.
pub(crate) async fn probe_output(
    program: &str,
    target: &str,
    count: u32,
    deadline: Duration,
) -> Result<Vec<String>> {
    let mut child = Command::new(program)
        .arg(count_flag())
        .arg(count.to_string())
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn probe program '{}'", program))?;

    let stdout = child.stdout.take().context("Probe stdout was not captured")?;
    let mut reader = BufReader::new(stdout).lines();
    let mut lines = Vec::new();

    let collect = async {
        while let Some(line) = reader.next_line().await? {
            trace!("probe> {}", line);
            lines.push(line);
        }
        child.wait().await
    };

    let outcome = timeout(deadline, collect).await;
    match outcome {
        Ok(status) => {
            let status = status.context("Failed reading probe output")?;
            debug!("Probe of {} exited with {}", target, status);
        }
        Err(_) => {
            warn!("Probe of {} exceeded {:?}, keeping partial output", target, deadline);
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill overrunning probe of {}: {}", target, e);
            }
        }
    }

    Ok(lines)
}

#[derive(Debug, Clone)]
pub struct QosProbe {
    program: String,
}

impl Default for QosProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_PROGRAM)
    }
}

impl QosProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn deadline(count: u32) -> Duration {
        BASE_DEADLINE + PER_PACKET_DEADLINE * count
    }

    /// Run one probe and collect raw RTTs
    pub async fn sample(&self, target: &str, count: u32) -> Result<QosSample> {
        let target = validate_target(target)?;
        info!("Probing {} with {} packets", target, count);

        let lines = probe_output(&self.program, target, count, Self::deadline(count)).await?;
        let rtts: Vec<f64> = lines.iter().filter_map(|l| extract_rtt(l)).collect();

        debug!("Captured {} RTTs from {} output lines", rtts.len(), lines.len());
        Ok(QosSample::new(rtts, count))
    }

    /// Measure path quality; any failure becomes the worst-case result
    pub async fn measure(&self, target: &str, count: u32) -> QosResult {
        match self.sample(target, count).await {
            Ok(sample) => {
                let result = QosResult::from_sample(&sample);
                info!(
                    "QoS {} - latency {:.2}ms, jitter {:.2}ms, loss {:.2}%, MOS {:.2} ({})",
                    target,
                    result.latency_ms,
                    result.jitter_ms,
                    result.packet_loss_percent,
                    result.mos_score,
                    result.quality_status
                );
                result
            }
            Err(e) => {
                warn!("QoS probe of {} failed: {:#}", target, e);
                QosResult::failed(count)
            }
        }
    }
}
