pub mod capture;
pub mod classify;
pub mod counters;
pub mod subscribers;

pub use capture::{default_backend, CaptureBackend, TrafficMonitor, UpdateCallback};
pub use classify::{classify_frame, classify_tcp, classify_udp, LinkLayer, TrafficCategory};
pub use counters::{ByteCounters, CounterTotals, ProtocolBreakdown, RateTracker, TrafficSnapshot};
pub use subscribers::SubscriberSet;
