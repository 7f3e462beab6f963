/// Persistence seam for QoS metrics and network events
///
/// The diagnostics core only needs append plus a handful of range and
/// aggregate queries. `MemoryStore` covers the daemon and the tests; a
/// database-backed store plugs in behind the same trait.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::RwLock;

use crate::qos::QosResult;

/// Protocol label attached to ICMP-probe measurements
pub const ICMP_PROTOCOL: &str = "ICMP";

/// How many recent measurements the during/without-call counts look at
pub const COMPARISON_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QosMetric {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub protocol: String,
    pub during_active_call: bool,
    #[serde(flatten)]
    pub result: QosResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub id: u64,
    pub ip: String,
    pub description: String,
    pub principal: String,
    pub timestamp: DateTime<Utc>,
}

/// Average MOS with and without an active call over the last 24 hours,
/// plus how the most recent measurements split between the two
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QosComparison {
    pub average_mos_during_calls: f64,
    pub average_mos_without_calls: f64,
    pub measurements_during_calls: usize,
    pub measurements_without_calls: usize,
    pub total_measurements: usize,
}

pub trait MetricsStore: Send + Sync {
    fn save_qos(
        &self,
        target: &str,
        protocol: &str,
        result: &QosResult,
        during_active_call: bool,
    ) -> Result<QosMetric>;

    /// Metrics taken at or after `since`, newest first
    fn recent_qos(&self, since: DateTime<Utc>) -> Vec<QosMetric>;

    /// All metrics for one target, newest first
    fn qos_by_target(&self, target: &str) -> Vec<QosMetric>;

    /// The newest `limit` metrics, newest first
    fn latest_qos(&self, limit: usize) -> Vec<QosMetric>;

    /// Mean MOS since `since`, optionally filtered by the active-call flag.
    /// None when nothing matches.
    fn average_mos(&self, since: DateTime<Utc>, during_active_call: Option<bool>) -> Option<f64>;

    fn record_event(&self, ip: &str, description: &str, principal: &str) -> Result<NetworkEvent>;

    /// Every event, oldest first
    fn events(&self) -> Vec<NetworkEvent>;

    fn events_by_principal(&self, principal: &str) -> Vec<NetworkEvent>;
}

/// During/without-call comparison as of `now`
pub fn qos_comparison(store: &dyn MetricsStore, now: DateTime<Utc>) -> QosComparison {
    let since = now - Duration::hours(24);
    let recent = store.latest_qos(COMPARISON_WINDOW);
    let during = recent.iter().filter(|m| m.during_active_call).count();

    QosComparison {
        average_mos_during_calls: store.average_mos(since, Some(true)).unwrap_or(0.0),
        average_mos_without_calls: store.average_mos(since, Some(false)).unwrap_or(0.0),
        measurements_during_calls: during,
        measurements_without_calls: recent.len() - during,
        total_measurements: recent.len(),
    }
}

#[derive(Debug, Default)]
struct Tables {
    metrics: Vec<QosMetric>,
    events: Vec<NetworkEvent>,
    next_metric_id: u64,
    next_event_id: u64,
}

/// In-process store. Rows are kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a metric with an explicit timestamp; the id is assigned here
    pub fn insert_metric(&self, mut metric: QosMetric) -> QosMetric {
        let mut tables = self.write();
        tables.next_metric_id += 1;
        metric.id = tables.next_metric_id;
        tables.metrics.push(metric.clone());
        metric
    }

    pub fn metric_count(&self) -> usize {
        self.read().metrics.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn newest_first<F>(&self, keep: F) -> Vec<QosMetric>
    where
        F: Fn(&QosMetric) -> bool,
    {
        let mut rows: Vec<QosMetric> = self.read().metrics.iter().filter(|m| keep(m)).cloned().collect();
        // Later inserts first on equal timestamps
        rows.reverse();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows
    }
}

impl MetricsStore for MemoryStore {
    fn save_qos(
        &self,
        target: &str,
        protocol: &str,
        result: &QosResult,
        during_active_call: bool,
    ) -> Result<QosMetric> {
        Ok(self.insert_metric(QosMetric {
            id: 0,
            timestamp: Utc::now(),
            target: target.to_string(),
            protocol: protocol.to_string(),
            during_active_call,
            result: result.clone(),
        }))
    }

    fn recent_qos(&self, since: DateTime<Utc>) -> Vec<QosMetric> {
        self.newest_first(|m| m.timestamp >= since)
    }

    fn qos_by_target(&self, target: &str) -> Vec<QosMetric> {
        self.newest_first(|m| m.target == target)
    }

    fn latest_qos(&self, limit: usize) -> Vec<QosMetric> {
        let mut rows = self.newest_first(|_| true);
        rows.truncate(limit);
        rows
    }

    fn average_mos(&self, since: DateTime<Utc>, during_active_call: Option<bool>) -> Option<f64> {
        let tables = self.read();
        let scores: Vec<f64> = tables
            .metrics
            .iter()
            .filter(|m| m.timestamp >= since)
            .filter(|m| during_active_call.map_or(true, |flag| m.during_active_call == flag))
            .map(|m| m.result.mos_score)
            .collect();

        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    fn record_event(&self, ip: &str, description: &str, principal: &str) -> Result<NetworkEvent> {
        let mut tables = self.write();
        tables.next_event_id += 1;
        let event = NetworkEvent {
            id: tables.next_event_id,
            ip: ip.to_string(),
            description: description.to_string(),
            principal: principal.to_string(),
            timestamp: Utc::now(),
        };
        tables.events.push(event.clone());
        Ok(event)
    }

    fn events(&self) -> Vec<NetworkEvent> {
        self.read().events.clone()
    }

    fn events_by_principal(&self, principal: &str) -> Vec<NetworkEvent> {
        self.read()
            .events
            .iter()
            .filter(|e| e.principal == principal)
            .cloned()
            .collect()
    }
}
