/// Call-quality math over round-trip samples
///
/// Latency is the mean RTT, jitter the mean absolute difference between
/// consecutive RTTs, and the MOS comes from a simplified E-model R-factor.

use serde::{Deserialize, Serialize};

/// Base R-factor before impairments
pub const R_BASE: f64 = 93.2;

/// Raw measurements from one probe run
#[derive(Debug, Clone, PartialEq)]
pub struct QosSample {
    pub rtts_ms: Vec<f64>,
    pub sent: u32,
    pub received: u32,
}

impl QosSample {
    /// Build a sample; received is capped at sent and surplus RTTs are dropped
    pub fn new(mut rtts_ms: Vec<f64>, sent: u32) -> Self {
        let received = u32::try_from(rtts_ms.len()).unwrap_or(u32::MAX).min(sent);
        rtts_ms.truncate(received as usize);
        Self {
            rtts_ms,
            sent,
            received,
        }
    }

    pub fn lost(&self) -> u32 {
        self.sent - self.received
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityLabel {
    Excellent,
    Good,
    Fair,
    Poor,
    Bad,
}

impl QualityLabel {
    pub fn from_score(mos: f64) -> Self {
        if mos >= 4.3 {
            QualityLabel::Excellent
        } else if mos >= 4.0 {
            QualityLabel::Good
        } else if mos >= 3.6 {
            QualityLabel::Fair
        } else if mos >= 3.1 {
            QualityLabel::Poor
        } else {
            QualityLabel::Bad
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Excellent => "EXCELLENT",
            QualityLabel::Good => "GOOD",
            QualityLabel::Fair => "FAIR",
            QualityLabel::Poor => "POOR",
            QualityLabel::Bad => "BAD",
        }
    }
}

impl std::fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QosResult {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_percent: f64,
    pub mos_score: f64,
    pub quality_status: QualityLabel,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_lost: u32,
    pub rtt_avg_ms: f64,
    pub rtt_min_ms: f64,
    pub rtt_max_ms: f64,
}

impl QosResult {
    /// Worst-case result for a probe that got nothing back
    pub fn failed(sent: u32) -> Self {
        Self {
            latency_ms: 0.0,
            jitter_ms: 0.0,
            packet_loss_percent: 100.0,
            mos_score: 1.0,
            quality_status: QualityLabel::Bad,
            packets_sent: sent,
            packets_received: 0,
            packets_lost: sent,
            rtt_avg_ms: 0.0,
            rtt_min_ms: 0.0,
            rtt_max_ms: 0.0,
        }
    }

    pub fn from_sample(sample: &QosSample) -> Self {
        if sample.received == 0 || sample.rtts_ms.is_empty() {
            return Self::failed(sample.sent);
        }

        let latency = mean(&sample.rtts_ms);
        let jitter = jitter(&sample.rtts_ms);
        let loss = loss_percent(sample.sent, sample.received);
        let mos = mos_score(latency, jitter, loss);

        let min = sample.rtts_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max = sample.rtts_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            latency_ms: latency,
            jitter_ms: jitter,
            packet_loss_percent: loss,
            mos_score: mos,
            quality_status: QualityLabel::from_score(mos),
            packets_sent: sample.sent,
            packets_received: sample.received,
            packets_lost: sample.lost(),
            rtt_avg_ms: latency,
            rtt_min_ms: min,
            rtt_max_ms: max,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean absolute difference between consecutive samples, 0 with fewer than two
pub fn jitter(rtts_ms: &[f64]) -> f64 {
    if rtts_ms.len() < 2 {
        return 0.0;
    }
    let total: f64 = rtts_ms.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (rtts_ms.len() - 1) as f64
}

/// Percentage of packets lost; a run that sent nothing counts as total loss
pub fn loss_percent(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 100.0;
    }
    let lost = sent.saturating_sub(received);
    (lost as f64 / sent as f64) * 100.0
}

/// R-factor after latency, jitter and loss impairments, clamped to [0, 100]
pub fn r_factor(latency_ms: f64, jitter_ms: f64, loss_percent: f64) -> f64 {
    let latency_penalty = if latency_ms < 160.0 {
        latency_ms / 40.0
    } else {
        (latency_ms - 120.0) / 10.0
    };
    let jitter_penalty = jitter_ms / 2.0;
    let loss_penalty = loss_percent * 2.5;

    (R_BASE - latency_penalty - jitter_penalty - loss_penalty).clamp(0.0, 100.0)
}

/// Mean Opinion Score in [1.0, 5.0], rounded to two decimals
pub fn mos_score(latency_ms: f64, jitter_ms: f64, loss_percent: f64) -> f64 {
    let r = r_factor(latency_ms, jitter_ms, loss_percent);
    let mos = if r < 0.0 {
        1.0
    } else if r > 100.0 {
        4.5
    } else {
        1.0 + 0.035 * r + 7e-6 * r * (r - 60.0) * (100.0 - r)
    };
    (mos.clamp(1.0, 5.0) * 100.0).round() / 100.0
}
