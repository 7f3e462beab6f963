pub mod metrics;
pub mod ping;
pub mod probe;

pub use metrics::{QosResult, QosSample, QualityLabel};
pub use ping::PingReport;
pub use probe::QosProbe;
