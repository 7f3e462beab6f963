//! Adversarial Property-Based Tests for AMI Line Protocol and Record Parsing
//!
//! # Attack Plan
//!
//! 1. **Line Classification**: Arbitrary unicode, lone colons, keys without
//!    values, markers embedded mid-line, CR/LF debris.
//!
//! 2. **Framing**: Replies split at every byte boundary across reads, event
//!    lists with no completion, error replies to list actions.
//!
//! 3. **Block Extraction**: Interleaved foreign events, repeated keys, blocks
//!    without `ObjectName`, truncated responses.
//!
//! 4. **Value Extraction**: Garbled `ListItems`, caller ids without digits,
//!    version strings with partial numbers.
//!
//! 5. **Credential Leakage**: Secrets in traced login actions.
//!
//! # Invariants
//!
//! - classify, event_blocks, parse_extensions, parse_active_calls and
//!   extract_version never panic
//! - Simple framing completes exactly at the first blank line
//! - Reading a reply gives the same text however the bytes are chunked
//! - Every parsed extension came from a block carrying ObjectName
//! - active_call_count is 0 unless ListItems parses as u32
//! - build_action output always ends with a blank line
//! - redacted login actions never contain the secret

use proptest::prelude::*;
use std::time::Duration;
use tokio::io::BufReader;

use voipdiag::ami::client::read_response;
use voipdiag::ami::protocol::{build_action, event_blocks, AmiLine, Framer, Progress, ResponseFraming};
use voipdiag::ami::records::{
    active_call_count, extract_extension_number, extract_version, parse_active_calls,
    parse_extensions,
};
use voipdiag::redact;

// ============================================================================
// ADVERSARIAL GENERATORS
// ============================================================================

/// Lines a hostile or buggy switch might send
fn hostile_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("".to_string()),
        Just(":".to_string()),
        Just("::::".to_string()),
        Just(": value without key".to_string()),
        Just("Event:".to_string()),
        Just("Event: PeerEntry".to_string()),
        Just("ObjectName:".to_string()),
        Just("ListItems: -1".to_string()),
        Just("ListItems: 99999999999".to_string()),
        Just("Message: xEventList: Completex".to_string()),
        Just("Response: Error".to_string()),
        Just("\r".to_string()),
        Just("\u{feff}Response: Success".to_string()),
        Just("日本語: 値".to_string()),
        "[A-Za-z]{1,12}: [ -~]{0,40}",
        "\\PC{0,60}",
    ]
}

fn hostile_response() -> impl Strategy<Value = String> {
    prop::collection::vec(hostile_line(), 0..40).prop_map(|lines| lines.join("\r\n"))
}

const PEERS_REPLY: &str = "Response: Success\r\n\
EventList: start\r\n\
Message: Peer status list will follow\r\n\
\r\n\
Event: PeerEntry\r\n\
ObjectName: 1001\r\n\
CallerID: Sales <1001>\r\n\
IPaddress: 10.0.0.5\r\n\
IPport: 5060\r\n\
Status: OK (5 ms)\r\n\
\r\n\
Event: PeerlistComplete\r\n\
EventList: Complete\r\n\
ListItems: 1\r\n\
\r\n";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

// ============================================================================
// INVARIANT: PARSERS NEVER PANIC
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_classify_never_panics(line in "\\PC*") {
        let _ = AmiLine::classify(&line);
    }

    #[test]
    fn prop_record_parsers_never_panic(response in hostile_response()) {
        let _ = event_blocks(&response, "PeerEntry");
        let _ = parse_extensions(&response);
        let _ = parse_active_calls(&response);
        let _ = extract_version(&response);
        let _ = active_call_count(&response);
    }

    #[test]
    fn prop_extension_number_never_panics(caller_id in "\\PC{0,80}") {
        let ext = extract_extension_number(&caller_id);
        prop_assert!(!ext.is_empty());
    }
}

// ============================================================================
// INVARIANT: FRAMING
// ============================================================================

proptest! {
    #[test]
    fn prop_simple_framing_stops_at_first_blank(
        before in prop::collection::vec("[A-Za-z]{1,8}: [a-z0-9]{0,8}", 0..10),
    ) {
        let mut framer = Framer::new(ResponseFraming::Simple);
        for line in &before {
            prop_assert_eq!(framer.accept(&AmiLine::classify(line)), Progress::Continue);
        }
        prop_assert_eq!(framer.accept(&AmiLine::Blank), Progress::Done);
    }

    #[test]
    fn prop_event_list_without_completion_never_done(
        lines in prop::collection::vec("[A-Za-z]{1,8}: [a-z0-9]{0,8}|", 0..30),
    ) {
        let mut framer = Framer::new(ResponseFraming::EventList);
        for line in &lines {
            let classified = AmiLine::classify(line);
            prop_assume!(!matches!(classified, AmiLine::Completion | AmiLine::Error(_)));
            prop_assert_eq!(framer.accept(&classified), Progress::Continue);
        }
    }

    #[test]
    fn prop_chunking_does_not_change_reply(split in 1usize..PEERS_REPLY.len()) {
        let (head, tail) = PEERS_REPLY.as_bytes().split_at(split);
        let mock = tokio_test::io::Builder::new().read(head).read(tail).build();
        let mut reader = BufReader::new(mock);

        let reply = runtime()
            .block_on(read_response(&mut reader, ResponseFraming::EventList, Duration::from_secs(1)))
            .unwrap();

        prop_assert_eq!(reply, PEERS_REPLY.replace("\r\n", "\n"));
    }
}

// ============================================================================
// INVARIANT: EXTRACTED RECORDS
// ============================================================================

proptest! {
    #[test]
    fn prop_extensions_only_from_named_blocks(
        names in prop::collection::vec(prop::option::of("[0-9]{3,5}"), 0..12),
    ) {
        let mut response = String::from("Response: Success\nEventList: start\n\n");
        for name in &names {
            response.push_str("Event: PeerEntry\n");
            if let Some(n) = name {
                response.push_str(&format!("ObjectName: {}\n", n));
            }
            response.push_str("Status: UNKNOWN\n\n");
        }
        response.push_str("Event: PeerlistComplete\nEventList: Complete\n\n");

        let extensions = parse_extensions(&response);
        let named: Vec<&String> = names.iter().flatten().collect();
        prop_assert_eq!(extensions.len(), named.len());
        for (ext, name) in extensions.iter().zip(named) {
            prop_assert_eq!(&ext.name, name);
        }
    }

    #[test]
    fn prop_list_items_parsed_or_zero(value in "[ -~]{0,12}") {
        let response = format!("Event: CoreShowChannelsComplete\nListItems: {}\n\n", value);
        let expected = value.trim().parse::<u32>().unwrap_or(0);
        prop_assert_eq!(active_call_count(&response), expected);
    }

    #[test]
    fn prop_bracketed_digits_win(prefix in "[A-Za-z ]{0,10}", digits in "[0-9]{1,6}") {
        let caller_id = format!("{} <{}>", prefix, digits);
        prop_assert_eq!(extract_extension_number(&caller_id), digits);
    }

    #[test]
    fn prop_version_is_asterisk_prefixed(response in "\\PC{0,120}") {
        prop_assert!(extract_version(&response).starts_with("Asterisk"));
    }
}

// ============================================================================
// INVARIANT: OUTGOING ACTIONS
// ============================================================================

proptest! {
    #[test]
    fn prop_build_action_terminated(
        action in "[A-Za-z]{1,16}",
        params in prop::collection::vec(("[A-Za-z]{1,10}", "[ -~]{0,20}"), 0..6),
    ) {
        let borrowed: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let out = build_action(&action, &borrowed);
        let expected_prefix = format!("Action: {}\r\n", action);
        prop_assert!(out.starts_with(&expected_prefix));
        prop_assert!(out.ends_with("\r\n\r\n"));
        prop_assert_eq!(out.matches("\r\n").count(), params.len() + 2);
    }

    #[test]
    fn prop_redacted_login_hides_secret(secret in "[0-9]{8,32}") {
        let login = build_action("Login", &[("Username", "monitor"), ("Secret", &secret), ("Events", "off")]);
        let redacted = redact::ami_message(&login);
        prop_assert!(!redacted.contains(&secret));
        prop_assert!(redacted.contains("Username: monitor"));
    }
}

// ============================================================================
// NEGATIVE ASSERTIONS
// ============================================================================

#[test]
fn test_error_reply_to_list_action_terminates() {
    let mut framer = Framer::new(ResponseFraming::EventList);
    assert_eq!(
        framer.accept(&AmiLine::classify("Response: Error")),
        Progress::Continue
    );
    assert_eq!(
        framer.accept(&AmiLine::classify("Message: Permission denied")),
        Progress::Continue
    );
    assert_eq!(framer.accept(&AmiLine::Blank), Progress::Done);
}

#[test]
fn test_truncated_reply_is_error() {
    let truncated = &PEERS_REPLY[..PEERS_REPLY.len() / 2];
    let mock = tokio_test::io::Builder::new().read(truncated.as_bytes()).build();
    let mut reader = BufReader::new(mock);
    let result = runtime().block_on(read_response(
        &mut reader,
        ResponseFraming::EventList,
        Duration::from_secs(1),
    ));
    assert!(result.is_err());
}

#[test]
fn test_foreign_events_ignored() {
    let response = "Event: FullyBooted\nObjectName: nope\n\n\
Event: PeerEntry\nObjectName: 2001\n\n\
Event: Registry\nObjectName: also-nope\n\n";
    let extensions = parse_extensions(response);
    assert_eq!(extensions.len(), 1);
    assert_eq!(extensions[0].name, "2001");
}

#[test]
fn test_repeated_key_takes_last() {
    let blocks = event_blocks("Event: PeerEntry\nObjectName: a\nObjectName: b\n", "PeerEntry");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].get("ObjectName"), Some("b"));
}
