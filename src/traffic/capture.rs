/// Live traffic monitor
///
/// One enumerator task resolves the interfaces to watch and starts a blocking
/// capture loop per interface. All loops feed the same lock-free counters. A
/// separate ticker turns counter deltas into a fresh `TrafficSnapshot` every
/// reporting interval and fans it out to subscribers.
///
/// Live capture needs libpcap and the `capture` feature:
///   cargo build --features capture
use anyhow::Result;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::counters::{ByteCounters, CounterTotals, RateTracker, TrafficSnapshot};
use super::subscribers::SubscriberSet;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Extra per-snapshot hook passed to `TrafficMonitor::start`
pub type UpdateCallback = Arc<dyn Fn(&TrafficSnapshot) + Send + Sync>;

/// Source of packets for the monitor.
///
/// `run` blocks until `cancel` fires or the source fails. Implementations
/// must check the token at least every few hundred milliseconds.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Interfaces to capture on. An empty `configured` list means all.
    fn interfaces(&self, configured: &[String]) -> Result<Vec<String>>;

    /// Count packets on one interface into `counters`; returns packets seen
    fn run(&self, interface: &str, counters: &ByteCounters, cancel: &CancellationToken)
        -> Result<u64>;
}

#[cfg(feature = "capture")]
mod pcap_backend {
    use super::CaptureBackend;
    use crate::traffic::classify::{classify_frame, LinkLayer, TrafficCategory};
    use crate::traffic::counters::ByteCounters;
    use anyhow::{Context, Result};
    use pcap::{Capture, Device};
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    /// libpcap-backed capture in promiscuous mode
    #[derive(Debug, Clone)]
    pub struct PcapBackend {
        snaplen: i32,
    }

    impl Default for PcapBackend {
        fn default() -> Self {
            Self { snaplen: 65536 }
        }
    }

    impl CaptureBackend for PcapBackend {
        fn interfaces(&self, configured: &[String]) -> Result<Vec<String>> {
            let devices = Device::list().context("Failed to list capture devices")?;
            for (i, device) in devices.iter().enumerate() {
                debug!(
                    "Capture device {}: {} - {}",
                    i,
                    device.name,
                    device.desc.as_deref().unwrap_or("")
                );
            }

            if configured.is_empty() {
                return Ok(devices.into_iter().map(|d| d.name).collect());
            }

            let mut selected = Vec::new();
            for name in configured {
                if devices.iter().any(|d| &d.name == name) {
                    selected.push(name.clone());
                } else {
                    warn!("Capture interface '{}' not found, skipping", name);
                }
            }
            Ok(selected)
        }

        fn run(
            &self,
            interface: &str,
            counters: &ByteCounters,
            cancel: &CancellationToken,
        ) -> Result<u64> {
            let mut cap = Capture::from_device(interface)
                .with_context(|| format!("Failed to open capture device {}", interface))?
                .promisc(true)
                .snaplen(self.snaplen)
                .timeout(100) // 100ms poll so cancellation is noticed
                .open()
                .with_context(|| format!("Failed to start capture on {}", interface))?;

            let dlt = cap.get_datalink().0;
            let link = LinkLayer::from_dlt(dlt);
            if link.is_none() {
                warn!(
                    "Unsupported link type {} on {}, counting all bytes as other",
                    dlt, interface
                );
            }

            let mut packets = 0u64;
            while !cancel.is_cancelled() {
                match cap.next_packet() {
                    Ok(packet) => {
                        let size = packet.header.len as usize;
                        let category = match link {
                            Some(link) => classify_frame(link, packet.data, size),
                            None => TrafficCategory::Other,
                        };
                        counters.record(category, size as u64);
                        packets += 1;
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        warn!("Capture error on {}: {}", interface, e);
                        break;
                    }
                }
            }

            info!("Capture on {} stopped after {} packets", interface, packets);
            Ok(packets)
        }
    }
}

#[cfg(feature = "capture")]
pub use pcap_backend::PcapBackend;

/// Stand-in used when the crate is built without libpcap
#[cfg(not(feature = "capture"))]
#[derive(Debug, Clone, Default)]
pub struct UnavailableBackend;

#[cfg(not(feature = "capture"))]
impl CaptureBackend for UnavailableBackend {
    fn interfaces(&self, _configured: &[String]) -> Result<Vec<String>> {
        anyhow::bail!(
            "Traffic capture requires the 'capture' feature. Build with: cargo build --features capture"
        )
    }

    fn run(&self, _interface: &str, _counters: &ByteCounters, _cancel: &CancellationToken) -> Result<u64> {
        anyhow::bail!("Traffic capture requires the 'capture' feature")
    }
}

/// The backend this build supports
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "capture")]
    {
        Arc::new(PcapBackend::default())
    }
    #[cfg(not(feature = "capture"))]
    {
        Arc::new(UnavailableBackend)
    }
}

pub struct TrafficMonitor {
    backend: Arc<dyn CaptureBackend>,
    interfaces: Vec<String>,
    report_interval: Duration,
    counters: Arc<ByteCounters>,
    tracker: Arc<Mutex<RateTracker>>,
    latest: Arc<RwLock<Arc<TrafficSnapshot>>>,
    subscribers: Arc<SubscriberSet>,
    running: Mutex<Option<CancellationToken>>,
}

impl TrafficMonitor {
    pub fn new(backend: Arc<dyn CaptureBackend>, interfaces: Vec<String>) -> Self {
        Self {
            backend,
            interfaces,
            report_interval: REPORT_INTERVAL,
            counters: Arc::new(ByteCounters::new()),
            tracker: Arc::new(Mutex::new(RateTracker::new())),
            latest: Arc::new(RwLock::new(Arc::new(TrafficSnapshot::zero()))),
            subscribers: Arc::new(SubscriberSet::new()),
            running: Mutex::new(None),
        }
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Start capturing. Returns false (and does nothing) if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, on_update: Option<UpdateCallback>) -> bool {
        let cancel = {
            let mut running = lock(&self.running);
            if running.is_some() {
                debug!("Traffic capture already running");
                return false;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        self.clear();
        info!("Starting traffic capture");

        tokio::spawn(start_capture_loops(
            Arc::clone(&self.backend),
            self.interfaces.clone(),
            Arc::clone(&self.counters),
            cancel.clone(),
        ));

        tokio::spawn(report_loop(
            self.report_interval,
            Arc::clone(&self.counters),
            Arc::clone(&self.tracker),
            Arc::clone(&self.latest),
            Arc::clone(&self.subscribers),
            on_update,
            cancel,
        ));

        true
    }

    /// Stop capturing, zero the counters and publish a final zero snapshot.
    /// Returns false if capture was not running.
    pub fn stop(&self) -> bool {
        let Some(cancel) = lock(&self.running).take() else {
            return false;
        };
        cancel.cancel();
        self.clear();
        info!("Traffic capture stopped");
        true
    }

    /// Zero the counters without stopping capture
    pub fn reset(&self) {
        self.clear();
        info!("Traffic counters reset");
    }

    /// Zero counters and rate state, then publish a zero snapshot.
    /// Holding the tracker lock orders this after any in-flight tick.
    fn clear(&self) {
        let mut tracker = lock(&self.tracker);
        self.counters.reset();
        tracker.reset();
        let zero = Arc::new(TrafficSnapshot::zero());
        *write(&self.latest) = Arc::clone(&zero);
        self.subscribers.publish(zero);
    }

    /// Register a listener; it first receives the latest snapshot
    pub fn subscribe(&self) -> mpsc::Receiver<Arc<TrafficSnapshot>> {
        self.subscribers.subscribe(self.current())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Latest published snapshot
    pub fn current(&self) -> Arc<TrafficSnapshot> {
        Arc::clone(&read(&self.latest))
    }

    /// Raw byte totals since the last reset
    pub fn totals(&self) -> CounterTotals {
        self.counters.totals()
    }
}

impl Drop for TrafficMonitor {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.running).take() {
            cancel.cancel();
        }
    }
}

async fn start_capture_loops(
    backend: Arc<dyn CaptureBackend>,
    configured: Vec<String>,
    counters: Arc<ByteCounters>,
    cancel: CancellationToken,
) {
    let lookup = {
        let backend = Arc::clone(&backend);
        tokio::task::spawn_blocking(move || backend.interfaces(&configured)).await
    };

    let names = match lookup {
        Ok(Ok(names)) => names,
        Ok(Err(e)) => {
            error!("Traffic capture unavailable: {:#}", e);
            return;
        }
        Err(e) => {
            error!("Interface enumeration task failed: {}", e);
            return;
        }
    };

    if names.is_empty() {
        warn!("No capture interfaces available");
        return;
    }

    for name in names {
        if cancel.is_cancelled() {
            break;
        }
        info!("Starting capture on {}", name);
        let backend = Arc::clone(&backend);
        let counters = Arc::clone(&counters);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = backend.run(&name, &counters, &cancel) {
                error!("Capture on {} failed: {:#}", name, e);
            }
        });
    }
}

async fn report_loop(
    period: Duration,
    counters: Arc<ByteCounters>,
    tracker: Arc<Mutex<RateTracker>>,
    latest: Arc<RwLock<Arc<TrafficSnapshot>>>,
    subscribers: Arc<SubscriberSet>,
    on_update: Option<UpdateCallback>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            now = ticker.tick() => {
                let elapsed = now.duration_since(last_tick);
                last_tick = now;

                let snapshot = {
                    let mut tracker = lock(&tracker);
                    if cancel.is_cancelled() {
                        break;
                    }
                    let snapshot = Arc::new(tracker.tick(counters.totals(), elapsed));
                    *write(&latest) = Arc::clone(&snapshot);
                    subscribers.publish(Arc::clone(&snapshot));
                    snapshot
                };

                debug!("Traffic: {}", snapshot);
                if let Some(callback) = &on_update {
                    callback(&snapshot);
                }
            }
        }
    }
    debug!("Traffic report loop stopped");
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}
