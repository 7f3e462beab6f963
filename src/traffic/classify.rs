/// Heuristic traffic classification
///
/// Each packet is bucketed on its own by port and size, with no flow state.
/// The rules overlap on purpose (a 1500-byte TCP bulk transfer lands in
/// streaming), so their order is part of the behavior.
use etherparse::{SlicedPacket, TransportSlice};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficCategory {
    Http,
    Voip,
    Streaming,
    Other,
}

impl TrafficCategory {
    pub const ALL: [TrafficCategory; 4] = [
        TrafficCategory::Http,
        TrafficCategory::Voip,
        TrafficCategory::Streaming,
        TrafficCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficCategory::Http => "http",
            TrafficCategory::Voip => "voip",
            TrafficCategory::Streaming => "streaming",
            TrafficCategory::Other => "other",
        }
    }
}

impl fmt::Display for TrafficCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const HTTP_PORTS: [u16; 7] = [80, 443, 8080, 8443, 3000, 8000, 8888];

/// RTMP, RTSP (two ports) and MMS
const STREAMING_PORTS: [u16; 4] = [1935, 554, 8554, 1755];

/// Music/video client ports seen outside the classic streaming set
const STREAMING_APP_PORTS: [u16; 2] = [4070, 57621];

const SIP_PORT: u16 = 5060;
const QUIC_PORT: u16 = 443;

/// TCP segments above this size are assumed to be media
const LARGE_TCP_SEGMENT: usize = 1400;
/// UDP datagrams below this size on a high port are assumed to be RTP
const SMALL_UDP_DATAGRAM: usize = 300;
const EPHEMERAL_PORT_FLOOR: u16 = 10000;

fn is_http_port(port: u16) -> bool {
    HTTP_PORTS.contains(&port)
}

/// SIP, SIP-TLS, the RTP/RTCP dynamic range and STUN/TURN
fn is_voip_port(port: u16) -> bool {
    matches!(port, 5060 | 5061 | 3478 | 3479 | 16384..=32767)
}

fn is_streaming_port(port: u16) -> bool {
    STREAMING_PORTS.contains(&port)
}

fn is_streaming_app_port(port: u16) -> bool {
    STREAMING_APP_PORTS.contains(&port)
}

fn either(src: u16, dst: u16, pred: fn(u16) -> bool) -> bool {
    pred(src) || pred(dst)
}

pub fn classify_tcp(src: u16, dst: u16, size: usize) -> TrafficCategory {
    if either(src, dst, is_http_port) {
        TrafficCategory::Http
    } else if either(src, dst, is_streaming_port) || either(src, dst, is_streaming_app_port) {
        TrafficCategory::Streaming
    } else if src == SIP_PORT || dst == SIP_PORT {
        TrafficCategory::Voip
    } else if size > LARGE_TCP_SEGMENT {
        TrafficCategory::Streaming
    } else {
        TrafficCategory::Other
    }
}

pub fn classify_udp(src: u16, dst: u16, size: usize) -> TrafficCategory {
    let high_port = src >= EPHEMERAL_PORT_FLOOR || dst >= EPHEMERAL_PORT_FLOOR;

    if either(src, dst, is_voip_port) || (size < SMALL_UDP_DATAGRAM && high_port) {
        TrafficCategory::Voip
    } else if either(src, dst, is_streaming_port) {
        TrafficCategory::Streaming
    } else if src == QUIC_PORT || dst == QUIC_PORT {
        TrafficCategory::Http
    } else if size > 500 && size < 1500 {
        TrafficCategory::Streaming
    } else {
        // DNS, NTP and the rest
        TrafficCategory::Other
    }
}

/// Link-layer framing of captured bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Bare IPv4/IPv6 packet
    RawIp,
    /// BSD loopback: 4-byte address family header, then IP
    Null,
}

impl LinkLayer {
    /// Map a libpcap DLT number; unknown framings yield None
    pub fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            0 | 108 => Some(LinkLayer::Null),
            1 => Some(LinkLayer::Ethernet),
            12 | 14 | 101 | 228 | 229 => Some(LinkLayer::RawIp),
            _ => None,
        }
    }
}

/// Classify a captured frame. `size` is the on-wire length, which may exceed
/// `data.len()` when the snapshot length truncated the capture.
///
/// Frames that fail to parse, and anything that is not TCP or UDP, count as
/// other.
pub fn classify_frame(link: LinkLayer, data: &[u8], size: usize) -> TrafficCategory {
    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(data),
        LinkLayer::RawIp => SlicedPacket::from_ip(data),
        LinkLayer::Null => match data.get(4..) {
            Some(ip) => SlicedPacket::from_ip(ip),
            None => return TrafficCategory::Other,
        },
    };

    match sliced.ok().and_then(|packet| packet.transport) {
        Some(TransportSlice::Tcp(tcp)) => {
            classify_tcp(tcp.source_port(), tcp.destination_port(), size)
        }
        Some(TransportSlice::Udp(udp)) => {
            classify_udp(udp.source_port(), udp.destination_port(), size)
        }
        _ => TrafficCategory::Other,
    }
}
