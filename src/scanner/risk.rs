/// Security risk catalog for open TCP ports
///
/// Each known port maps to a fixed risk record. Ports outside the catalog get a
/// synthesized LOW finding that keeps the scanner's best-guess service name.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Severity tiers, ordered from harmless to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRecord {
    pub service: &'static str,
    pub severity: Severity,
    pub vulnerability: &'static str,
    pub remediation: &'static str,
}

pub const UNKNOWN_PORT_VULNERABILITY: &str = "Open port with no known critical vulnerabilities.";
pub const UNKNOWN_PORT_REMEDIATION: &str = "Verify the service is needed. Close it if unused.";

static CATALOG: LazyLock<HashMap<u16, RiskRecord>> = LazyLock::new(|| {
    use Severity::*;

    let entries: [(u16, &str, Severity, &str, &str); 17] = [
        (
            21,
            "FTP",
            High,
            "Sends credentials in plain text.\nData can be intercepted.",
            "Use SFTP (port 22) or FTPS instead.",
        ),
        (
            23,
            "Telnet",
            Critical,
            "Transmits EVERYTHING in plain text including passwords.\nHighly vulnerable.",
            "Use SSH (port 22) instead.\nDisable Telnet immediately.",
        ),
        (
            25,
            "SMTP",
            Medium,
            "Can be abused for spam or unauthorized relaying.",
            "Require SMTP authentication and TLS.\nRestrict external access.",
        ),
        (
            53,
            "DNS",
            Medium,
            "Exposed to DDoS amplification and\ncache poisoning.",
            "Limit recursive queries.\nKeep the DNS server patched.",
        ),
        (
            80,
            "HTTP",
            Medium,
            "Unencrypted traffic.\nData and credentials are exposed.",
            "Move to HTTPS (port 443).\nRedirect all HTTP traffic to HTTPS.",
        ),
        (
            110,
            "POP3",
            High,
            "Sends mail credentials in plain text.",
            "Use POP3S (port 995) or IMAP over TLS.",
        ),
        (
            143,
            "IMAP",
            High,
            "Sends mail credentials in plain text.",
            "Use IMAPS (port 993) with TLS.",
        ),
        (
            445,
            "SMB",
            Critical,
            "Highly exposed to ransomware\n(WannaCry, EternalBlue).",
            "Block external access.\nApply security patches.\nUse a VPN for remote access.",
        ),
        (
            1433,
            "MS SQL Server",
            High,
            "Database exposed.\nSensitive data may be extracted.",
            "Block external access.\nUse a firewall and strong authentication.\nChange the default port.",
        ),
        (
            3306,
            "MySQL",
            High,
            "Database exposed.\nRisk of SQL injection and data theft.",
            "Block external access.\nAllow only local or VPN connections.",
        ),
        (
            3389,
            "RDP (Remote Desktop)",
            Critical,
            "Prime target for brute-force attacks\nand ransomware.",
            "Disable if not needed.\nUse a VPN.\nEnable two-factor authentication.",
        ),
        (
            5432,
            "PostgreSQL",
            High,
            "Database exposed.\nRisk of unauthorized access.",
            "Block external access.\nConfigure pg_hba.conf correctly.",
        ),
        (
            5900,
            "VNC",
            High,
            "Remote access with weak or no encryption.",
            "Use a VPN for remote access.\nEnforce strong passwords.",
        ),
        (
            6379,
            "Redis",
            High,
            "Cache/DB with no authentication by default.",
            "Enable authentication.\nNever expose it to the Internet.",
        ),
        (
            8080,
            "HTTP-Proxy/Tomcat",
            Medium,
            "Administration panel potentially exposed\nwithout encryption.",
            "Use HTTPS.\nRestrict access with a firewall.\nChange default credentials.",
        ),
        (
            9200,
            "Elasticsearch",
            Critical,
            "May expose sensitive data without authentication.",
            "Enable X-Pack security.\nBlock public access.",
        ),
        (
            27017,
            "MongoDB",
            Critical,
            "NoSQL database frequently misconfigured\nand exposed.",
            "Enable authentication.\nBlock external access entirely.",
        ),
    ];

    entries
        .into_iter()
        .map(|(port, service, severity, vulnerability, remediation)| {
            (
                port,
                RiskRecord {
                    service,
                    severity,
                    vulnerability,
                    remediation,
                },
            )
        })
        .collect()
});

/// Catalog entry for a port, if any
pub fn lookup(port: u16) -> Option<&'static RiskRecord> {
    CATALOG.get(&port)
}

/// An open port found by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortFinding {
    pub port: u16,
    pub service: String,
}

/// A port finding annotated with its risk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortRiskFinding {
    pub port: u16,
    pub service: String,
    pub severity: Severity,
    pub vulnerability: String,
    pub remediation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAnalysis {
    pub total_open_ports: usize,
    pub critical_ports: usize,
    pub high_risk_ports: usize,
    pub medium_risk_ports: usize,
    pub low_risk_ports: usize,
    pub port_details: Vec<PortRiskFinding>,
    pub overall_risk: Severity,
}

/// Annotate open ports with catalog risk and tally severities
pub fn analyze_open_ports(open_ports: &[PortFinding]) -> SecurityAnalysis {
    let port_details: Vec<PortRiskFinding> = open_ports
        .iter()
        .map(|finding| match lookup(finding.port) {
            Some(record) => PortRiskFinding {
                port: finding.port,
                service: record.service.to_string(),
                severity: record.severity,
                vulnerability: record.vulnerability.to_string(),
                remediation: record.remediation.to_string(),
            },
            None => PortRiskFinding {
                port: finding.port,
                service: finding.service.clone(),
                severity: Severity::Low,
                vulnerability: UNKNOWN_PORT_VULNERABILITY.to_string(),
                remediation: UNKNOWN_PORT_REMEDIATION.to_string(),
            },
        })
        .collect();

    let count = |tier: Severity| port_details.iter().filter(|d| d.severity == tier).count();
    let overall_risk = port_details
        .iter()
        .map(|d| d.severity)
        .max()
        .unwrap_or(Severity::None);

    SecurityAnalysis {
        total_open_ports: open_ports.len(),
        critical_ports: count(Severity::Critical),
        high_risk_ports: count(Severity::High),
        medium_risk_ports: count(Severity::Medium),
        low_risk_ports: count(Severity::Low),
        overall_risk,
        port_details,
    }
}
