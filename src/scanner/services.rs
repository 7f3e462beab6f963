/// Well-known TCP service names for open-port reporting

use std::collections::HashMap;
use std::sync::LazyLock;

static SERVICES: LazyLock<HashMap<u16, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert(21, "FTP");
    m.insert(22, "SSH");
    m.insert(23, "Telnet");
    m.insert(25, "SMTP");
    m.insert(53, "DNS");
    m.insert(80, "HTTP");
    m.insert(110, "POP3");
    m.insert(143, "IMAP");
    m.insert(443, "HTTPS");
    m.insert(3306, "MySQL");
    m.insert(8080, "HTTP-Proxy");
    m
});

/// Best-guess service name for a port, "unknown" when not in the table
pub fn service_name(port: u16) -> &'static str {
    SERVICES.get(&port).copied().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_services() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(443), "HTTPS");
        assert_eq!(service_name(8080), "HTTP-Proxy");
    }

    #[test]
    fn test_unknown_service() {
        assert_eq!(service_name(49152), "unknown");
        assert_eq!(service_name(0), "unknown");
    }
}
