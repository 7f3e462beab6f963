/// Records derived from AMI replies
///
/// Peers, channels and the switch version are rebuilt from raw reply text on
/// every query; nothing here is cached.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::protocol::{event_blocks, find_value, ResponseBlock};

pub const PEER_EVENT: &str = "PeerEntry";
pub const CHANNEL_EVENT: &str = "CoreShowChannel";

/// Trailing CDR lines read for call history
pub const CALL_HISTORY_LINES: usize = 20;

/// Columns up to and including `billsec` in the cdr-csv layout
const CDR_MIN_FIELDS: usize = 14;

const CDR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DISPLAY_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

const NOT_AVAILABLE: &str = "N/A";
const UNKNOWN: &str = "Unknown";

static BRACKETED_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(\d+)>").expect("bracketed digits pattern is valid"));
static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("digits pattern is valid"));
static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Asterisk.*?\d+\.\d+\.\d+").expect("version pattern is valid"));

/// A SIP peer as reported by `SIPpeers`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub object_name: String,
    pub caller_id: Option<String>,
    pub ip_address: Option<String>,
    pub ip_port: Option<String>,
    pub status: Option<String>,
}

impl Peer {
    /// Build from a `PeerEntry` block; blocks without `ObjectName` are skipped
    pub fn from_block(block: &ResponseBlock) -> Option<Self> {
        let owned = |key: &str| block.get(key).map(str::to_string);
        Some(Self {
            object_name: owned("ObjectName")?,
            caller_id: owned("CallerID"),
            ip_address: owned("IPaddress"),
            ip_port: owned("IPport"),
            status: owned("Status"),
        })
    }

    /// Registered peers report `Unmonitored` or an `OK (...)` status
    pub fn is_reachable(&self) -> bool {
        match self.status.as_deref() {
            Some(status) => status == "Unmonitored" || status.contains("OK"),
            None => false,
        }
    }
}

pub fn parse_peers(response: &str) -> Vec<Peer> {
    event_blocks(response, PEER_EVENT)
        .iter()
        .filter_map(Peer::from_block)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtensionStatus {
    Ok,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub extension: String,
    pub name: String,
    pub host: String,
    pub status: ExtensionStatus,
}

impl From<&Peer> for Extension {
    fn from(peer: &Peer) -> Self {
        let extension =
            extract_extension_number(peer.caller_id.as_deref().unwrap_or(&peer.object_name));

        let ip = peer.ip_address.as_deref().unwrap_or(NOT_AVAILABLE);
        let host = match peer.ip_port.as_deref() {
            Some(port) if !port.is_empty() => format!("{}:{}", ip, port),
            _ => ip.to_string(),
        };

        Self {
            extension,
            name: peer.object_name.clone(),
            host,
            status: if peer.is_reachable() {
                ExtensionStatus::Ok
            } else {
                ExtensionStatus::Unreachable
            },
        }
    }
}

/// Extension number from a caller id such as `Sales <1002>`.
///
/// Falls back to the first run of digits, then the raw value, then `N/A`.
pub fn extract_extension_number(caller_id: &str) -> String {
    if caller_id.is_empty() {
        return NOT_AVAILABLE.to_string();
    }
    BRACKETED_DIGITS
        .captures(caller_id)
        .or_else(|| DIGITS.captures(caller_id))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| caller_id.to_string())
}

pub fn parse_extensions(response: &str) -> Vec<Extension> {
    parse_peers(response).iter().map(Extension::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub channel: String,
    pub state: String,
    pub application: String,
}

impl Channel {
    pub fn from_block(block: &ResponseBlock) -> Self {
        let field = |key: &str| block.get(key).unwrap_or(UNKNOWN).to_string();
        Self {
            channel: field("Channel"),
            state: field("ChannelStateDesc"),
            application: field("Application"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveCalls {
    pub calls: Vec<Channel>,
    pub count: u32,
    pub timestamp: DateTime<Utc>,
}

impl ActiveCalls {
    pub fn empty() -> Self {
        Self {
            calls: Vec::new(),
            count: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Active-call count from the `ListItems` field, 0 when absent or garbled
pub fn active_call_count(response: &str) -> u32 {
    find_value(response, "ListItems")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn parse_active_calls(response: &str) -> ActiveCalls {
    let calls = event_blocks(response, CHANNEL_EVENT)
        .iter()
        .filter(|b| !b.is_empty())
        .map(Channel::from_block)
        .collect();

    ActiveCalls {
        calls,
        count: active_call_count(response),
        timestamp: Utc::now(),
    }
}

/// Switch version string from a `core show version` reply
pub fn extract_version(response: &str) -> String {
    if !response.contains("Asterisk") {
        return "Asterisk AMI".to_string();
    }
    VERSION
        .find(response)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "Asterisk (connected)".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatistics {
    pub total_extensions: usize,
    pub online_extensions: usize,
    pub offline_extensions: usize,
    pub active_calls: u32,
    pub timestamp: DateTime<Utc>,
}

impl PeerStatistics {
    pub fn from_responses(peers_response: &str, channels_response: &str) -> Self {
        let peers = parse_peers(peers_response);
        let online = peers.iter().filter(|p| p.is_reachable()).count();
        Self {
            total_extensions: peers.len(),
            online_extensions: online,
            offline_extensions: peers.len() - online,
            active_calls: active_call_count(channels_response),
            timestamp: Utc::now(),
        }
    }
}

/// Display names keyed by peer name.
///
/// A caller id label such as `Sales` in `"Sales" <1001>` wins; otherwise the
/// peer is named after itself.
pub fn extension_names(peers_response: &str) -> HashMap<String, String> {
    parse_peers(peers_response)
        .into_iter()
        .map(|peer| {
            let label = peer
                .caller_id
                .as_deref()
                .and_then(|cid| cid.split('<').next())
                .map(|name| name.trim().trim_matches('"').trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| peer.object_name.clone());
            (peer.object_name, label)
        })
        .collect()
}

/// One finished call from Asterisk's `Master.csv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub src: String,
    pub dst: String,
    pub start: String,
    pub duration: String,
    pub billsec: String,
    pub accountcode: String,
    pub dcontext: String,
    pub clid: String,
    pub channel: String,
    pub dstchannel: String,
    pub lastapp: String,
    pub lastdata: String,
    pub answer: String,
    pub end: String,
    pub disposition: String,
}

impl CallRecord {
    /// Parse one CDR line; rows short of `billsec` are skipped.
    ///
    /// `src` and `dst` gain a `(name)` suffix when `names` knows them.
    pub fn from_csv_line(line: &str, names: &HashMap<String, String>) -> Option<Self> {
        let fields = split_csv_line(line);
        if fields.len() < CDR_MIN_FIELDS {
            return None;
        }
        let field = |i: usize| fields[i].trim().to_string();
        let label = |i: usize| {
            let number = fields[i].trim();
            match names.get(number) {
                Some(name) => format!("{} ({})", number, name),
                None => number.to_string(),
            }
        };

        Some(Self {
            src: label(1),
            dst: label(2),
            start: format_cdr_time(fields[9].trim()),
            duration: field(12),
            billsec: field(13),
            accountcode: field(0),
            dcontext: field(3),
            clid: field(4),
            channel: field(5),
            dstchannel: field(6),
            lastapp: field(7),
            lastdata: field(8),
            answer: field(10),
            end: field(11),
            disposition: fields
                .get(14)
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        })
    }
}

/// Call records from the last [`CALL_HISTORY_LINES`] lines of a CDR file, oldest first
pub fn parse_call_history(csv: &str, names: &HashMap<String, String>) -> Vec<CallRecord> {
    let lines: Vec<&str> = csv.lines().collect();
    let tail = &lines[lines.len().saturating_sub(CALL_HISTORY_LINES)..];
    tail.iter()
        .filter_map(|line| CallRecord::from_csv_line(line, names))
        .collect()
}

/// `2025-10-26 11:30:45` becomes `26/10/2025 11:30:45`; blanks become `-`
/// and anything unparsable is kept as is.
pub fn format_cdr_time(value: &str) -> String {
    if value.is_empty() {
        return "-".to_string();
    }
    NaiveDateTime::parse_from_str(value, CDR_TIME_FORMAT)
        .map(|t| t.format(DISPLAY_TIME_FORMAT).to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Split a cdr-csv line, honouring double-quoted fields and `""` escapes
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
