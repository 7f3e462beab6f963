/// Byte accounting and throughput snapshots
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::classify::TrafficCategory;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Lock-free per-category byte accumulators, shared by every capture loop
#[derive(Debug, Default)]
pub struct ByteCounters {
    total: AtomicU64,
    http: AtomicU64,
    voip: AtomicU64,
    streaming: AtomicU64,
    other: AtomicU64,
}

impl ByteCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, category: TrafficCategory) -> &AtomicU64 {
        match category {
            TrafficCategory::Http => &self.http,
            TrafficCategory::Voip => &self.voip,
            TrafficCategory::Streaming => &self.streaming,
            TrafficCategory::Other => &self.other,
        }
    }

    pub fn record(&self, category: TrafficCategory, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
        self.bucket(category).fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn totals(&self) -> CounterTotals {
        CounterTotals {
            total: self.total.load(Ordering::Relaxed),
            http: self.http.load(Ordering::Relaxed),
            voip: self.voip.load(Ordering::Relaxed),
            streaming: self.streaming.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        for category in TrafficCategory::ALL {
            self.bucket(category).store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterTotals {
    pub total: u64,
    pub http: u64,
    pub voip: u64,
    pub streaming: u64,
    pub other: u64,
}

impl CounterTotals {
    /// Per-field difference, floored at zero when a reset raced the tick
    fn since(&self, earlier: &CounterTotals) -> CounterTotals {
        CounterTotals {
            total: self.total.saturating_sub(earlier.total),
            http: self.http.saturating_sub(earlier.http),
            voip: self.voip.saturating_sub(earlier.voip),
            streaming: self.streaming.saturating_sub(earlier.streaming),
            other: self.other.saturating_sub(earlier.other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolBreakdown {
    pub http_mbps: f64,
    pub voip_mbps: f64,
    pub streaming_mbps: f64,
    pub other_mbps: f64,
}

/// One published throughput reading. Speeds are in MB/s.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSnapshot {
    pub speed: f64,
    pub protocol_breakdown: ProtocolBreakdown,
    pub timestamp: DateTime<Utc>,
}

impl TrafficSnapshot {
    pub fn zero() -> Self {
        Self {
            speed: 0.0,
            protocol_breakdown: ProtocolBreakdown::default(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for TrafficSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.protocol_breakdown;
        write!(
            f,
            "total {:.2} MB/s (HTTP {:.2}, VoIP {:.2}, streaming {:.2}, other {:.2})",
            self.speed, p.http_mbps, p.voip_mbps, p.streaming_mbps, p.other_mbps
        )
    }
}

fn rate(bytes: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    bytes as f64 / BYTES_PER_MB / seconds
}

/// Turns successive counter readings into rates
#[derive(Debug, Default)]
pub struct RateTracker {
    last: CounterTotals,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from the bytes counted since the previous tick
    pub fn tick(&mut self, now: CounterTotals, elapsed: Duration) -> TrafficSnapshot {
        let delta = now.since(&self.last);
        self.last = now;

        let secs = elapsed.as_secs_f64();
        TrafficSnapshot {
            speed: rate(delta.total, secs),
            protocol_breakdown: ProtocolBreakdown {
                http_mbps: rate(delta.http, secs),
                voip_mbps: rate(delta.voip, secs),
                streaming_mbps: rate(delta.streaming, secs),
                other_mbps: rate(delta.other, secs),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn reset(&mut self) {
        self.last = CounterTotals::default();
    }
}
