/// Plain diagnostic ping
///
/// Four packets, raw output kept for display, whole-millisecond reply times
/// and a count of lines that report a lost packet.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use super::probe::probe_output;

pub const PING_PACKETS: u32 = 4;
const PING_DEADLINE: Duration = Duration::from_secs(15);

static REPLY_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<]([0-9]+)ms").expect("reply time pattern is valid"));

const LOSS_MARKERS: [&str; 3] = [
    "request timed out",
    "destination host unreachable",
    "100% packet loss",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReport {
    pub output: String,
    pub ping_times: Vec<u32>,
    pub packets_lost: u32,
}

impl PingReport {
    /// Build a report from the probe's output lines
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut report = PingReport::default();
        for line in lines {
            let line = line.as_ref();
            report.output.push_str(line);
            report.output.push('\n');

            if let Some(ms) = REPLY_TIME
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
            {
                report.ping_times.push(ms);
            }

            let lower = line.to_lowercase();
            if LOSS_MARKERS.iter().any(|m| lower.contains(m)) {
                report.packets_lost += 1;
            }
        }
        report
    }
}

/// Ping an already validated target; process failures end up in `output`
pub async fn ping(program: &str, target: &str) -> PingReport {
    info!("Pinging {}", target);
    match probe_output(program, target, PING_PACKETS, PING_DEADLINE).await {
        Ok(lines) => PingReport::from_lines(lines.as_slice()),
        Err(e) => {
            warn!("Ping of {} failed: {:#}", target, e);
            PingReport {
                output: format!("Error running ping: {:#}", e),
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_output() {
        let lines = [
            "Pinging 10.0.0.1 with 32 bytes of data:",
            "Reply from 10.0.0.1: bytes=32 time=3ms TTL=64",
            "Request timed out.",
            "Reply from 10.0.0.1: bytes=32 time<1ms TTL=64",
            "Reply from 10.0.0.1: Destination host unreachable.",
        ];
        let report = PingReport::from_lines(&lines);
        assert_eq!(report.ping_times, vec![3, 1]);
        assert_eq!(report.packets_lost, 2);
        assert_eq!(report.output.lines().count(), 5);
    }

    #[test]
    fn test_linux_fractional_times_not_captured() {
        // Only whole "time=Nms" tokens count for the plain ping view
        let report = PingReport::from_lines(&["64 bytes from 1.1.1.1: icmp_seq=1 time=9.81 ms"]);
        assert!(report.ping_times.is_empty());
    }

    #[test]
    fn test_total_loss_line() {
        let report =
            PingReport::from_lines(&["4 packets transmitted, 0 received, 100% packet loss, time 3059ms"]);
        assert_eq!(report.packets_lost, 1);
    }

    #[tokio::test]
    async fn test_missing_program_reports_error() {
        let report = ping("voipdiag-no-such-ping", "127.0.0.1").await;
        assert!(report.output.starts_with("Error running ping"));
        assert!(report.ping_times.is_empty());
    }
}
