/// Active-call QoS monitor
/// Every interval, asks the switch how many calls are up and probes the
/// reference target while at least one is in progress

use anyhow::{bail, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ami::records::active_call_count;
use crate::ami::{AmiClient, AmiReply};
use crate::config::Config;
use crate::qos::{QosProbe, QosResult};
use crate::store::{MetricsStore, ICMP_PROTOCOL};

/// What one monitor cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No live AMI session
    Skipped,
    /// Session up, no active calls
    Idle,
    /// Calls in progress; the stored measurement
    Probed { active_calls: u32, result: QosResult },
}

pub struct QosMonitor {
    ami: Arc<AmiClient>,
    probe: QosProbe,
    store: Arc<dyn MetricsStore>,
    target: String,
    packet_count: u32,
}

impl QosMonitor {
    pub fn new(
        ami: Arc<AmiClient>,
        probe: QosProbe,
        store: Arc<dyn MetricsStore>,
        target: impl Into<String>,
        packet_count: u32,
    ) -> Self {
        Self {
            ami,
            probe,
            store,
            target: target.into(),
            packet_count,
        }
    }

    pub fn from_config(config: &Config, ami: Arc<AmiClient>, store: Arc<dyn MetricsStore>) -> Self {
        Self::new(
            ami,
            QosProbe::default(),
            store,
            config.qos_reference_target.clone(),
            config.qos_packet_count,
        )
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run one cycle. Errors are for the caller to log; they never leave
    /// the session or the store in a state that blocks the next cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if !self.ami.is_connected() {
            debug!("AMI not connected, skipping QoS cycle");
            return Ok(CycleOutcome::Skipped);
        }

        let response = match self.ami.core_show_channels().await {
            AmiReply::Ok(text) => text,
            AmiReply::Error(e) => bail!("channel listing failed: {}", e),
        };

        let active_calls = active_call_count(&response);
        if active_calls == 0 {
            debug!("No active calls");
            return Ok(CycleOutcome::Idle);
        }

        info!(
            "{} active call(s), measuring QoS to {}",
            active_calls, self.target
        );
        let result = self.probe.measure(&self.target, self.packet_count).await;
        self.store
            .save_qos(&self.target, ICMP_PROTOCOL, &result, true)?;

        info!(
            "QoS during call - MOS: {:.2}, status: {}",
            result.mos_score, result.quality_status
        );
        Ok(CycleOutcome::Probed {
            active_calls,
            result,
        })
    }
}

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let rem = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 && rem > 0 {
        format!("{}m {}s", mins, rem)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", rem)
    }
}

/// Run `cycle_fn` with a fixed delay between the end of one cycle and the
/// start of the next, until cancelled
pub async fn run_scheduler<F, Fut>(period: Duration, cancel: CancellationToken, mut cycle_fn: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!("Scheduler started (every {})", format_duration(period));

    while !cancel.is_cancelled() {
        cycle_fn().await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(period) => {}
        }
    }

    info!("Scheduler stopped");
}
