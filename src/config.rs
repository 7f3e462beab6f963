use anyhow::{bail, Context, Result};
#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::validate_target;

/// Upper bound on probe packets per QoS measurement
pub const MAX_PACKET_COUNT: u32 = 100;

/// Where Asterisk's cdr-csv module writes call detail records
pub const DEFAULT_CDR_PATH: &str = "/var/log/asterisk/cdr-csv/Master.csv";

#[derive(Debug, Clone)]
pub struct Config {
    // Telephony switch management interface
    pub ami_host: String,
    pub ami_port: u16,
    pub ami_username: String,
    pub ami_secret: String,
    pub ami_read_timeout_ms: u64,
    pub cdr_path: PathBuf,

    // Active-call QoS monitor
    pub qos_reference_target: String,
    pub qos_packet_count: u32,
    pub monitor_interval_secs: u64,

    // Traffic capture; empty means every device libpcap reports
    pub capture_interfaces: Vec<String>,

    // Port scanner
    pub scan_workers: usize,
    pub scan_connect_timeout_ms: u64,
    pub scan_wait_timeout_ms: u64,

    // Health check HTTP server port (optional, disabled if not set)
    // When set, exposes /health, /ready, /metrics and /traffic
    pub health_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            ami_host: get("AMI_HOST").context("AMI_HOST not set")?,
            ami_port: get("AMI_PORT")
                .unwrap_or_else(|| "5038".to_string())
                .parse()
                .context("AMI_PORT must be a valid port number")?,
            ami_username: get("AMI_USERNAME").context("AMI_USERNAME not set")?,
            ami_secret: get("AMI_SECRET").context("AMI_SECRET not set")?,
            ami_read_timeout_ms: get("AMI_READ_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            cdr_path: get("CDR_PATH")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CDR_PATH.to_string())
                .into(),

            qos_reference_target: get("QOS_REFERENCE_TARGET")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "8.8.8.8".to_string()),
            qos_packet_count: get("QOS_PACKET_COUNT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            monitor_interval_secs: get("MONITOR_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            capture_interfaces: get("CAPTURE_INTERFACES")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),

            scan_workers: get("SCAN_WORKERS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            scan_connect_timeout_ms: get("SCAN_CONNECT_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
            scan_wait_timeout_ms: get("SCAN_WAIT_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            health_port: get("HEALTH_PORT").and_then(|s| s.parse().ok()),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if validate_target(&self.ami_host).is_err() {
            errors.push(format!("AMI_HOST '{}' is not a valid host.", self.ami_host));
        }

        if self.ami_username.trim().is_empty() {
            errors.push("AMI_USERNAME cannot be empty.".to_string());
        }

        if self.ami_read_timeout_ms == 0 {
            errors.push("AMI_READ_TIMEOUT_MS must be greater than 0.".to_string());
        }

        if let Err(e) = validate_target(&self.qos_reference_target) {
            errors.push(format!("QOS_REFERENCE_TARGET invalid: {}", e));
        }

        if self.qos_packet_count == 0 || self.qos_packet_count > MAX_PACKET_COUNT {
            errors.push(format!(
                "QOS_PACKET_COUNT={} must be between 1 and {}.",
                self.qos_packet_count, MAX_PACKET_COUNT
            ));
        }

        if self.monitor_interval_secs == 0 {
            errors.push("MONITOR_INTERVAL_SECS must be greater than 0.".to_string());
        }

        if self.scan_workers == 0 || self.scan_workers > 512 {
            errors.push(format!(
                "SCAN_WORKERS={} must be between 1 and 512.",
                self.scan_workers
            ));
        }

        if self.scan_connect_timeout_ms == 0 || self.scan_wait_timeout_ms == 0 {
            errors.push("Scan timeouts must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    pub fn ami_read_timeout(&self) -> Duration {
        Duration::from_millis(self.ami_read_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// Split a comma-separated list, dropping blanks
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
