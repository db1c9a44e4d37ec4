use super::*;

#[test]
fn encode_send_adds_content_length_and_terminator() {
    let frame = StompFrame::send("/app/project.join", r#"{"projectId":7}"#);
    assert_eq!(
        encode(&frame),
        "SEND\ndestination:/app/project.join\ncontent-type:application/json\ncontent-length:15\n\n{\"projectId\":7}\0"
    );
}

#[test]
fn encode_connect_does_not_escape_headers() {
    let frame = StompFrame::connect("localhost", "tok", 4000);
    let text = encode(&frame);
    assert!(text.starts_with("CONNECT\naccept-version:1.2\nhost:localhost\nheart-beat:4000,4000\n"));
    assert!(text.contains("Authorization:Bearer tok\n"));
    assert!(text.ends_with("\n\n\0"));
}

#[test]
fn encode_escapes_colons_in_regular_headers() {
    let frame = StompFrame::new(Command::Send).with_header("note", "a:b\nc");
    assert_eq!(encode(&frame), "SEND\nnote:a\\cb\\nc\n\n\0");
}

#[test]
fn decode_message_with_content_length() {
    let text = "MESSAGE\ndestination:/topic/project/7\nsubscription:sub-1\nmessage-id:9\ncontent-length:2\n\n{}\0\n";
    let frame = decode(text).expect("decode").expect("frame");
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.header("destination"), Some("/topic/project/7"));
    assert_eq!(frame.header("subscription"), Some("sub-1"));
    assert_eq!(frame.body, "{}");
}

#[test]
fn decode_without_content_length_reads_to_nul() {
    let frame = decode("ERROR\nmessage:bad token\n\ndetails here\0")
        .expect("decode")
        .expect("frame");
    assert_eq!(frame.command, Command::Error);
    assert_eq!(frame.header("message"), Some("bad token"));
    assert_eq!(frame.body, "details here");
}

#[test]
fn decode_accepts_crlf_line_endings() {
    let frame = decode("CONNECTED\r\nversion:1.2\r\n\r\n\0").expect("decode").expect("frame");
    assert_eq!(frame.command, Command::Connected);
    assert_eq!(frame.header("version"), Some("1.2"));
}

#[test]
fn decode_unescapes_headers() {
    let frame = decode("MESSAGE\nnote:a\\cb\\\\c\n\n\0").expect("decode").expect("frame");
    assert_eq!(frame.header("note"), Some("a:b\\c"));
}

#[test]
fn connected_headers_are_not_unescaped() {
    let frame = decode("CONNECTED\nserver:x\\cy\n\n\0").expect("decode").expect("frame");
    assert_eq!(frame.header("server"), Some("x\\cy"));
}

#[test]
fn repeated_header_returns_first_value() {
    let frame = decode("MESSAGE\nfoo:1\nfoo:2\n\n\0").expect("decode").expect("frame");
    assert_eq!(frame.header("foo"), Some("1"));
}

#[test]
fn heartbeat_decodes_to_none() {
    assert!(decode("\n").expect("heartbeat").is_none());
    assert!(decode("\r\n\n").expect("heartbeat").is_none());
}

#[test]
fn leading_heartbeats_are_skipped() {
    let frame = decode("\n\nRECEIPT\nreceipt-id:1\n\n\0").expect("decode").expect("frame");
    assert_eq!(frame.command, Command::Receipt);
}

#[test]
fn decode_rejects_missing_terminator() {
    let err = decode("MESSAGE\ndestination:/x\n\nbody").expect_err("should fail");
    assert!(matches!(err, CodecError::MissingTerminator));
}

#[test]
fn decode_rejects_content_length_past_end() {
    let err = decode("MESSAGE\ncontent-length:10\n\nab\0").expect_err("should fail");
    assert!(matches!(err, CodecError::MissingTerminator));
}

#[test]
fn decode_rejects_unknown_command() {
    let err = decode("HELLO\n\n\0").expect_err("should fail");
    assert!(matches!(err, CodecError::UnknownCommand(cmd) if cmd == "HELLO"));
}

#[test]
fn decode_rejects_header_without_separator() {
    let err = decode("MESSAGE\nbroken\n\n\0").expect_err("should fail");
    assert!(matches!(err, CodecError::MalformedHeader(_)));
}

#[test]
fn decode_rejects_undefined_escape() {
    let err = decode("MESSAGE\nk:a\\tb\n\n\0").expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidEscape(_)));
}

#[test]
fn decode_rejects_missing_blank_line() {
    let err = decode("MESSAGE\nk:v").expect_err("should fail");
    assert!(matches!(err, CodecError::Truncated));
}

#[test]
fn encoded_subscribe_decodes_back() {
    let frame = StompFrame::subscribe("sub-3", "/topic/project/7/presence");
    let decoded = decode(&encode(&frame)).expect("decode").expect("frame");
    assert_eq!(decoded, frame);
}
