/// AMI line protocol
///
/// Every response line is classified once into an [`AmiLine`]. Framing (when
/// to stop reading) and block extraction (grouping `Event:` sections) are both
/// driven by that classification, so neither needs a socket to be tested.

/// Substrings that end an event list
pub const COMPLETION_MARKERS: [&str; 3] = [
    "EventList: Complete",
    "PeerlistComplete",
    "CoreShowChannelsComplete",
];

/// Substrings that end a response early
pub const ERROR_MARKERS: [&str; 2] = ["Response: Error", "Message: Command not found"];

/// Actions whose replies are multi-event lists
pub const EVENT_LIST_ACTIONS: [&str; 2] = ["SIPpeers", "CoreShowChannels"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmiLine {
    /// Empty or whitespace-only line; separates blocks
    Blank,
    /// End of an event list
    Completion,
    /// Error reply or unknown command
    Error(String),
    /// `Event: <name>` opening a block
    Event(String),
    KeyValue { key: String, value: String },
    Unrecognized(String),
}

impl AmiLine {
    pub fn classify(raw: &str) -> Self {
        let line = raw.trim();
        if line.is_empty() {
            return AmiLine::Blank;
        }
        if COMPLETION_MARKERS.iter().any(|m| line.contains(m)) {
            return AmiLine::Completion;
        }
        if ERROR_MARKERS.iter().any(|m| line.contains(m)) {
            return AmiLine::Error(line.to_string());
        }
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                let key = key.trim();
                let value = value.trim();
                if key == "Event" {
                    AmiLine::Event(value.to_string())
                } else {
                    AmiLine::KeyValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    }
                }
            }
            _ => AmiLine::Unrecognized(line.to_string()),
        }
    }
}

/// How a reply to a given action is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    /// Ends at the first blank line
    Simple,
    /// Ends at the blank line following a completion or error marker
    EventList,
}

impl ResponseFraming {
    pub fn for_action(action: &str) -> Self {
        if EVENT_LIST_ACTIONS.contains(&action) {
            ResponseFraming::EventList
        } else {
            ResponseFraming::Simple
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Done,
}

/// Incremental end-of-response detector
#[derive(Debug, Clone)]
pub struct Framer {
    framing: ResponseFraming,
    draining: bool,
}

impl Framer {
    pub fn new(framing: ResponseFraming) -> Self {
        Self {
            framing,
            draining: false,
        }
    }

    /// Feed one line; `Done` means the line completed the response
    pub fn accept(&mut self, line: &AmiLine) -> Progress {
        match self.framing {
            ResponseFraming::Simple => {
                if *line == AmiLine::Blank {
                    Progress::Done
                } else {
                    Progress::Continue
                }
            }
            ResponseFraming::EventList => {
                if self.draining {
                    if *line == AmiLine::Blank {
                        return Progress::Done;
                    }
                } else if matches!(line, AmiLine::Completion | AmiLine::Error(_)) {
                    self.draining = true;
                }
                Progress::Continue
            }
        }
    }
}

/// One `Event:` section with its fields in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBlock {
    pub event: String,
    pub fields: Vec<(String, String)>,
}

impl ResponseBlock {
    fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            fields: Vec::new(),
        }
    }

    /// Field value; a repeated key resolves to its last occurrence
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Collect every block opened by `Event: <event>`.
///
/// A block closes at the next `Event:` line, a completion or error marker, or
/// the end of the text. Fields outside a matching block are ignored, as are
/// unrecognized lines.
pub fn event_blocks(response: &str, event: &str) -> Vec<ResponseBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<ResponseBlock> = None;

    for raw in response.lines() {
        match AmiLine::classify(raw) {
            AmiLine::Event(name) => {
                blocks.extend(current.take());
                if name == event {
                    current = Some(ResponseBlock::new(event));
                }
            }
            AmiLine::KeyValue { key, value } => {
                if let Some(block) = current.as_mut() {
                    block.fields.push((key, value));
                }
            }
            AmiLine::Completion | AmiLine::Error(_) => {
                blocks.extend(current.take());
            }
            AmiLine::Blank | AmiLine::Unrecognized(_) => {}
        }
    }

    blocks.extend(current);
    blocks
}

/// First value for `key` anywhere in the response
pub fn find_value<'a>(response: &'a str, key: &str) -> Option<&'a str> {
    response.lines().find_map(|raw| {
        let (k, v) = raw.trim().split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// Whether the response carries an error marker
pub fn is_error(response: &str) -> bool {
    response
        .lines()
        .any(|l| matches!(AmiLine::classify(l), AmiLine::Error(_)))
}

/// Serialize an action with its parameters, terminated by a blank line
pub fn build_action(action: &str, params: &[(&str, &str)]) -> String {
    let mut out = format!("Action: {}\r\n", action);
    for (key, value) in params {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PEERS: &str = "Response: Success\r\n\
EventList: start\r\n\
Message: Peer status list will follow\r\n\
\r\n\
Event: PeerEntry\r\n\
ObjectName: 1001\r\n\
IPaddress: 10.0.0.5\r\n\
\r\n\
Event: PeerEntry\r\n\
ObjectName: 1002\r\n\
IPaddress: 10.0.0.6\r\n\
\r\n\
Event: PeerlistComplete\r\n\
EventList: Complete\r\n\
ListItems: 2\r\n\
\r\n";

    // === classify ===

    #[test]
    fn test_classify_lines() {
        assert_eq!(AmiLine::classify(""), AmiLine::Blank);
        assert_eq!(AmiLine::classify("  \r"), AmiLine::Blank);
        assert_eq!(AmiLine::classify("EventList: Complete"), AmiLine::Completion);
        assert_eq!(AmiLine::classify("Event: PeerlistComplete"), AmiLine::Completion);
        assert_eq!(
            AmiLine::classify("Event: CoreShowChannelsComplete"),
            AmiLine::Completion
        );
        assert!(matches!(AmiLine::classify("Response: Error"), AmiLine::Error(_)));
        assert!(matches!(
            AmiLine::classify("Message: Command not found"),
            AmiLine::Error(_)
        ));
        assert_eq!(
            AmiLine::classify("Event: PeerEntry"),
            AmiLine::Event("PeerEntry".to_string())
        );
        assert_eq!(
            AmiLine::classify("Status: OK (5 ms)"),
            AmiLine::KeyValue {
                key: "Status".to_string(),
                value: "OK (5 ms)".to_string()
            }
        );
        assert!(matches!(
            AmiLine::classify("Asterisk Call Manager/5.0.1"),
            AmiLine::Unrecognized(_)
        ));
        assert!(matches!(AmiLine::classify(": orphan"), AmiLine::Unrecognized(_)));
    }

    #[test]
    fn test_value_keeps_inner_colons() {
        assert_eq!(
            AmiLine::classify("Channel: SIP/1001-00000001:x"),
            AmiLine::KeyValue {
                key: "Channel".to_string(),
                value: "SIP/1001-00000001:x".to_string()
            }
        );
    }

    // === framing ===

    fn frame(framing: ResponseFraming, text: &str) -> usize {
        let mut framer = Framer::new(framing);
        for (i, line) in text.lines().enumerate() {
            if framer.accept(&AmiLine::classify(line)) == Progress::Done {
                return i + 1;
            }
        }
        usize::MAX
    }

    #[test]
    fn test_framing_for_action() {
        assert_eq!(ResponseFraming::for_action("SIPpeers"), ResponseFraming::EventList);
        assert_eq!(
            ResponseFraming::for_action("CoreShowChannels"),
            ResponseFraming::EventList
        );
        assert_eq!(ResponseFraming::for_action("Ping"), ResponseFraming::Simple);
        assert_eq!(ResponseFraming::for_action("Command"), ResponseFraming::Simple);
    }

    #[test]
    fn test_simple_framing_stops_at_blank() {
        let text = "Response: Success\nPing: Pong\n\nEvent: Extra\n";
        assert_eq!(frame(ResponseFraming::Simple, text), 3);
    }

    #[test]
    fn test_event_list_framing_reads_whole_list() {
        assert_eq!(frame(ResponseFraming::EventList, TWO_PEERS), TWO_PEERS.lines().count());
    }

    #[test]
    fn test_event_list_framing_stops_after_error() {
        let text = "Response: Error\nMessage: Permission denied\n\nEvent: Never\n";
        assert_eq!(frame(ResponseFraming::EventList, text), 3);
    }

    // === blocks ===

    #[test]
    fn test_two_peer_blocks() {
        let blocks = event_blocks(TWO_PEERS, "PeerEntry");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get("ObjectName"), Some("1001"));
        assert_eq!(blocks[1].get("ObjectName"), Some("1002"));
        assert_eq!(blocks[1].get("IPaddress"), Some("10.0.0.6"));
    }

    #[test]
    fn test_unterminated_final_block_emitted() {
        let text = "Event: CoreShowChannel\nChannel: SIP/1001-01\nEvent: CoreShowChannel\nChannel: SIP/1002-02\n";
        let blocks = event_blocks(text, "CoreShowChannel");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].get("Channel"), Some("SIP/1002-02"));
    }

    #[test]
    fn test_other_events_do_not_leak_fields() {
        let text = "Event: PeerEntry\nObjectName: 1001\nEvent: FullyBooted\nObjectName: bogus\n";
        let blocks = event_blocks(text, "PeerEntry");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].get("ObjectName"), Some("1001"));
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let blocks = event_blocks("Event: X\nA: 1\nA: 2\n", "X");
        assert_eq!(blocks[0].get("A"), Some("2"));
        assert_eq!(blocks[0].fields.len(), 2);
    }

    // === helpers ===

    #[test]
    fn test_find_value() {
        assert_eq!(find_value(TWO_PEERS, "ListItems"), Some("2"));
        assert_eq!(find_value(TWO_PEERS, "Missing"), None);
    }

    #[test]
    fn test_is_error() {
        assert!(is_error("Response: Error\nMessage: Authentication failed\n\n"));
        assert!(!is_error(TWO_PEERS));
    }

    #[test]
    fn test_build_action() {
        assert_eq!(build_action("Ping", &[]), "Action: Ping\r\n\r\n");
        assert_eq!(
            build_action("Command", &[("Command", "core show version")]),
            "Action: Command\r\nCommand: core show version\r\n\r\n"
        );
    }
}
