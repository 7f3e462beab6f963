//! voipdiag library - VoIP network diagnostics
//!
//! Telephony switch (AMI) client, QoS probing, live traffic classification
//! and port-risk scanning. Exported for the binary and integration tests.

pub mod ami;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod qos;
pub mod redact;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod traffic;
