/// Diagnostics facade
///
/// The one surface callers (CLI, health server, embedding applications) use.
/// Input is validated before any network action and is the only source of
/// errors; every transport or process failure comes back as a degraded value.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ami::records::{
    extension_names, extract_version, parse_active_calls, parse_call_history, parse_extensions,
};
use crate::ami::{ActiveCalls, AmiClient, CallRecord, Extension, PeerStatistics};
use crate::config::{Config, DEFAULT_CDR_PATH, MAX_PACKET_COUNT};
use crate::error::{validate_target, InputError};
use crate::qos::{ping, PingReport, QosProbe, QosResult};
use crate::redact;
use crate::scanner::{PortScanner, ScanReport};
use crate::store::{qos_comparison, MetricsStore, NetworkEvent, QosComparison, QosMetric, ICMP_PROTOCOL};
use crate::traffic::{default_backend, CounterTotals, TrafficMonitor, TrafficSnapshot, UpdateCallback};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmiStatus {
    pub status: SwitchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AmiStatus {
    pub fn is_online(&self) -> bool {
        self.status == SwitchStatus::Online
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetQos {
    pub target: String,
    #[serde(flatten)]
    pub result: QosResult,
}

/// Validate a probe packet count against the allowed range
pub fn validate_packet_count(count: u32) -> Result<u32, InputError> {
    if count == 0 || count > MAX_PACKET_COUNT {
        return Err(InputError::InvalidPacketCount {
            got: count,
            max: MAX_PACKET_COUNT,
        });
    }
    Ok(count)
}

pub struct Diagnostics {
    ami: Arc<AmiClient>,
    probe: QosProbe,
    scanner: PortScanner,
    traffic: Arc<TrafficMonitor>,
    store: Arc<dyn MetricsStore>,
    cdr_path: PathBuf,
}

impl Diagnostics {
    pub fn new(
        ami: Arc<AmiClient>,
        probe: QosProbe,
        scanner: PortScanner,
        traffic: Arc<TrafficMonitor>,
        store: Arc<dyn MetricsStore>,
    ) -> Self {
        Self {
            ami,
            probe,
            scanner,
            traffic,
            store,
            cdr_path: PathBuf::from(DEFAULT_CDR_PATH),
        }
    }

    /// Read call detail records from `path` instead of the Asterisk default
    pub fn with_cdr_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cdr_path = path.into();
        self
    }

    pub fn from_config(config: &Config, store: Arc<dyn MetricsStore>) -> Self {
        Self::new(
            Arc::new(AmiClient::from_config(config)),
            QosProbe::default(),
            PortScanner::from_config(config),
            Arc::new(TrafficMonitor::new(
                default_backend(),
                config.capture_interfaces.clone(),
            )),
            store,
        )
        .with_cdr_path(config.cdr_path.clone())
    }

    pub fn cdr_path(&self) -> &Path {
        &self.cdr_path
    }

    pub fn ami(&self) -> &Arc<AmiClient> {
        &self.ami
    }

    pub fn traffic(&self) -> &Arc<TrafficMonitor> {
        &self.traffic
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    // === QoS ===

    /// Measure and persist path quality to `target`
    pub async fn probe_qos(&self, target: &str, packet_count: u32) -> Result<QosResult, InputError> {
        let count = validate_packet_count(packet_count)?;
        let target = validate_target(target)?;

        let result = self.probe.measure(target, count).await;
        if let Err(e) = self.store.save_qos(target, ICMP_PROTOCOL, &result, false) {
            warn!("Failed to save QoS metrics for {}: {:#}", target, e);
        }
        Ok(result)
    }

    /// Measure several targets one after another. All targets are validated
    /// before the first probe runs.
    pub async fn probe_qos_many(
        &self,
        targets: &[String],
        packet_count: u32,
    ) -> Result<Vec<TargetQos>, InputError> {
        let count = validate_packet_count(packet_count)?;
        let targets = targets
            .iter()
            .map(|t| validate_target(t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self.probe_qos(target, count).await?;
            results.push(TargetQos {
                target: target.to_string(),
                result,
            });
        }
        Ok(results)
    }

    /// Metrics from the last `hours` hours, newest first
    pub fn recent_qos(&self, hours: u32) -> Vec<QosMetric> {
        let since = Utc::now()
            .checked_sub_signed(ChronoDuration::hours(i64::from(hours)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.recent_qos(since)
    }

    pub fn qos_for_target(&self, target: &str) -> Vec<QosMetric> {
        self.store.qos_by_target(target.trim())
    }

    /// Mean MOS over the last 24 hours, 0 when nothing was measured
    pub fn average_mos(&self) -> f64 {
        self.store
            .average_mos(Utc::now() - ChronoDuration::hours(24), None)
            .unwrap_or(0.0)
    }

    pub fn qos_comparison(&self) -> QosComparison {
        qos_comparison(self.store.as_ref(), Utc::now())
    }

    // === Reconnaissance ===

    /// Scan a port range and log the action against `principal`
    pub async fn scan_ports(
        &self,
        target: &str,
        range: &str,
        principal: &str,
    ) -> Result<ScanReport, InputError> {
        let report = self.scanner.scan(target, range).await?;
        self.record_event(
            &report.target,
            &format!("Port scan of {} ({})", report.target, range.trim()),
            principal,
        );
        Ok(report)
    }

    /// Plain diagnostic ping, logged against `principal`
    pub async fn ping(&self, target: &str, principal: &str) -> Result<PingReport, InputError> {
        let target = validate_target(target)?;
        let report = ping::ping(self.probe.program(), target).await;
        self.record_event(target, &format!("Ping to {}", target), principal);
        Ok(report)
    }

    fn record_event(&self, ip: &str, description: &str, principal: &str) {
        match self.store.record_event(ip, description, principal) {
            Ok(_) => info!("{} by {}", description, redact::principal(principal)),
            Err(e) => warn!("Failed to record network event: {:#}", e),
        }
    }

    pub fn events(&self) -> Vec<NetworkEvent> {
        self.store.events()
    }

    pub fn events_by(&self, principal: &str) -> Vec<NetworkEvent> {
        self.store.events_by_principal(principal)
    }

    // === Telephony switch ===

    pub async fn ami_status(&self) -> AmiStatus {
        if !self.ami.ping().await {
            return AmiStatus {
                status: SwitchStatus::Offline,
                version: None,
                error: Some("Could not connect to the AMI".to_string()),
            };
        }

        let reply = self.ami.core_show_version().await;
        AmiStatus {
            status: SwitchStatus::Online,
            version: Some(extract_version(reply.body())),
            error: None,
        }
    }

    pub async fn ami_extensions(&self) -> Vec<Extension> {
        parse_extensions(self.ami.sip_peers().await.body())
    }

    pub async fn ami_active_calls(&self) -> ActiveCalls {
        parse_active_calls(self.ami.core_show_channels().await.body())
    }

    pub async fn ami_statistics(&self) -> PeerStatistics {
        let peers = self.ami.sip_peers().await;
        let channels = self.ami.core_show_channels().await;
        PeerStatistics::from_responses(peers.body(), channels.body())
    }

    /// Recent finished calls, labelled with extension names when the switch answers.
    ///
    /// An unreadable CDR file gives an empty history.
    pub async fn call_history(&self) -> Vec<CallRecord> {
        let csv = match tokio::fs::read_to_string(&self.cdr_path).await {
            Ok(csv) => csv,
            Err(e) => {
                warn!("Cannot read call records at {}: {}", self.cdr_path.display(), e);
                return Vec::new();
            }
        };
        let names = extension_names(self.ami.sip_peers().await.body());
        parse_call_history(&csv, &names)
    }

    // === Traffic ===

    pub fn start_capture(&self, on_update: Option<UpdateCallback>) -> bool {
        self.traffic.start(on_update)
    }

    pub fn stop_capture(&self) -> bool {
        self.traffic.stop()
    }

    pub fn reset_capture(&self) {
        self.traffic.reset()
    }

    pub fn subscribe_traffic(&self) -> mpsc::Receiver<Arc<TrafficSnapshot>> {
        self.traffic.subscribe()
    }

    pub fn current_traffic(&self) -> Arc<TrafficSnapshot> {
        self.traffic.current()
    }

    pub fn traffic_totals(&self) -> CounterTotals {
        self.traffic.totals()
    }

    /// Stop background work and log off the switch
    pub async fn shutdown(&self) {
        self.traffic.stop();
        self.ami.disconnect().await;
    }
}

/// Timestamped wrapper used by CLI output
#[derive(Debug, Serialize)]
pub struct Timestamped<T: Serialize> {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub value: T,
}

impl<T: Serialize> Timestamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            timestamp: Utc::now(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ami::AmiSettings;
    use crate::store::MemoryStore;
    use crate::traffic::CaptureBackend;
    use std::time::Duration;

    struct NoTraffic;

    impl CaptureBackend for NoTraffic {
        fn interfaces(&self, _configured: &[String]) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn run(
            &self,
            _interface: &str,
            _counters: &crate::traffic::ByteCounters,
            _cancel: &tokio_util::sync::CancellationToken,
        ) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    /// Facade wired to an unreachable switch and a probe program that
    /// prints its arguments instead of pinging
    fn offline_diagnostics(store: Arc<MemoryStore>) -> Diagnostics {
        let ami = AmiClient::new(AmiSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "monitor".to_string(),
            secret: "secret".to_string(),
            read_timeout: Duration::from_millis(200),
        });
        Diagnostics::new(
            Arc::new(ami),
            QosProbe::new("echo"),
            PortScanner::default(),
            Arc::new(TrafficMonitor::new(Arc::new(NoTraffic), Vec::new())),
            store,
        )
    }

    #[test]
    fn test_validate_packet_count() {
        assert_eq!(validate_packet_count(1), Ok(1));
        assert_eq!(validate_packet_count(100), Ok(100));
        assert_eq!(
            validate_packet_count(0),
            Err(InputError::InvalidPacketCount { got: 0, max: 100 })
        );
        assert!(validate_packet_count(101).is_err());
    }

    #[tokio::test]
    async fn test_probe_qos_rejects_bad_input_without_saving() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store.clone());

        assert!(diag.probe_qos("8.8.8.8; reboot", 4).await.is_err());
        assert!(diag.probe_qos("8.8.8.8", 0).await.is_err());
        assert_eq!(store.metric_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_qos_failure_is_degraded_and_saved() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store.clone());

        let result = diag.probe_qos("127.0.0.1", 3).await.unwrap();
        assert_eq!(result.packet_loss_percent, 100.0);
        assert_eq!(result.packets_lost, 3);

        let saved = diag.recent_qos(1);
        assert_eq!(saved.len(), 1);
        assert!(!saved[0].during_active_call);
        assert_eq!(saved[0].protocol, ICMP_PROTOCOL);
    }

    #[tokio::test]
    async fn test_option_like_targets_never_reach_the_probe() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store.clone());

        for target in ["-f", "-s65000", "-i0.001"] {
            assert!(matches!(
                diag.probe_qos(target, 4).await,
                Err(InputError::InvalidTarget(_))
            ));
            assert!(diag.ping(target, "alice").await.is_err());
        }
        assert_eq!(store.metric_count(), 0);
        assert!(diag.events().is_empty());
    }

    #[tokio::test]
    async fn test_recent_qos_accepts_any_window() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store);
        assert!(diag.recent_qos(0).is_empty());
        assert!(diag.recent_qos(u32::MAX).is_empty());
    }

    #[tokio::test]
    async fn test_probe_many_validates_all_first() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store.clone());

        let targets = vec!["127.0.0.1".to_string(), "bad|target".to_string()];
        let err = diag.probe_qos_many(&targets, 2).await.unwrap_err();
        assert!(matches!(err, InputError::InvalidTarget(_)));
        assert_eq!(store.metric_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_records_event() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store.clone());

        let report = diag.scan_ports("127.0.0.1", "1-3", "alice").await.unwrap();
        assert_eq!(report.total_scanned, 3);

        let events = diag.events_by("alice");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "Port scan of 127.0.0.1 (1-3)");
    }

    #[tokio::test]
    async fn test_invalid_scan_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store.clone());

        assert!(diag.scan_ports("127.0.0.1", "70000-1", "alice").await.is_err());
        assert!(diag.events().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ping_records_event() {
        let store = Arc::new(MemoryStore::new());
        let diag = offline_diagnostics(store);

        let report = diag.ping("127.0.0.1", "bob").await.unwrap();
        assert!(report.output.contains("127.0.0.1"));
        assert_eq!(diag.events()[0].description, "Ping to 127.0.0.1");
        assert_eq!(diag.events()[0].principal, "bob");
    }

    #[tokio::test]
    async fn test_offline_switch_degrades() {
        let diag = offline_diagnostics(Arc::new(MemoryStore::new()));

        let status = diag.ami_status().await;
        assert!(!status.is_online());
        assert!(status.version.is_none());
        assert!(status.error.is_some());

        assert!(diag.ami_extensions().await.is_empty());
        assert_eq!(diag.ami_active_calls().await.count, 0);
        let stats = diag.ami_statistics().await;
        assert_eq!(stats.total_extensions, 0);
        assert_eq!(stats.active_calls, 0);
    }

    #[test]
    fn test_status_json() {
        let status = AmiStatus {
            status: SwitchStatus::Online,
            version: Some("Asterisk 18.20.0".to_string()),
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "online");
        assert_eq!(json["version"], "Asterisk 18.20.0");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_capture_lifecycle_through_facade() {
        let diag = offline_diagnostics(Arc::new(MemoryStore::new()));
        assert!(!diag.stop_capture());
        assert!(diag.start_capture(None));
        assert!(!diag.start_capture(None));
        let mut rx = diag.subscribe_traffic();
        assert_eq!(rx.recv().await.unwrap().speed, 0.0);
        assert!(diag.stop_capture());
        assert_eq!(diag.current_traffic().speed, 0.0);
    }
}
