use super::*;
use serde_json::json;

#[test]
fn topics_follow_project_layout() {
    assert_eq!(project_topic(7), "/topic/project/7");
    assert_eq!(presence_topic(7), "/topic/project/7/presence");
}

#[test]
fn topic_project_id_reads_both_topic_shapes() {
    assert_eq!(topic_project_id("/topic/project/7"), Some(7));
    assert_eq!(topic_project_id("/topic/project/7/presence"), Some(7));
    assert_eq!(topic_project_id("/user/queue/notifications"), None);
    assert_eq!(topic_project_id("/topic/project/abc"), None);
}

#[test]
fn decode_envelope_reads_type_payload_and_string_user() {
    let env = decode_envelope(r#"{"type":"TASK_UPDATED","payload":{"id":42},"userId":"u-1"}"#)
        .expect("decode");
    assert_eq!(env.kind, "TASK_UPDATED");
    assert_eq!(env.payload, json!({"id": 42}));
    assert_eq!(env.user_id.as_deref(), Some("u-1"));
    assert!(env.extra.is_empty());
}

#[test]
fn decode_envelope_normalizes_numeric_user_id() {
    let env = decode_envelope(r#"{"type":"TASK_DELETED","payload":{},"userId":17}"#).expect("decode");
    assert_eq!(env.user_id.as_deref(), Some("17"));
}

#[test]
fn decode_envelope_treats_null_user_as_absent() {
    let env = decode_envelope(r#"{"type":"PROJECT_UPDATED","payload":{},"userId":null}"#).expect("decode");
    assert!(env.user_id.is_none());
}

#[test]
fn flat_presence_message_keeps_top_level_fields() {
    let env = decode_envelope(
        r#"{"type":"USER_JOINED","userId":5,"username":"ada","projectId":7}"#,
    )
    .expect("decode");
    assert_eq!(env.classify(), EnvelopeKind::UserJoined);
    assert_eq!(env.payload, Value::Null);
    assert_eq!(env.field("username"), Some(&json!("ada")));
    assert_eq!(env.field("projectId"), Some(&json!(7)));
}

#[test]
fn field_prefers_payload_over_top_level() {
    let mut env = Envelope::new("X", json!({"projectId": 1}));
    env.extra.insert("projectId".into(), json!(2));
    assert_eq!(env.field("projectId"), Some(&json!(1)));
}

#[test]
fn decode_delivery_falls_back_to_raw_for_non_json() {
    assert_eq!(decode_delivery("not json"), Delivery::Raw("not json".to_owned()));
}

#[test]
fn decode_delivery_falls_back_to_raw_for_untyped_json() {
    assert_eq!(
        decode_delivery(r#"{"payload":{}}"#),
        Delivery::Raw(r#"{"payload":{}}"#.to_owned())
    );
}

#[test]
fn decode_delivery_wraps_valid_envelope() {
    let delivery = decode_delivery(r#"{"type":"TASK_CREATED","payload":{"id":1}}"#);
    let Delivery::Decoded(env) = delivery else {
        panic!("expected decoded delivery");
    };
    assert_eq!(env.classify(), EnvelopeKind::TaskCreated);
}

#[test]
fn classification_covers_every_wire_tag() {
    let tags = [
        "TASK_CREATED",
        "TASK_UPDATED",
        "TASK_STATUS_CHANGED",
        "TASK_ASSIGNED",
        "TASK_DELETED",
        "COMMENT_ADDED",
        "COMMENT_DELETED",
        "PROJECT_UPDATED",
        "PROJECT_DELETED",
        "MEMBER_ADDED",
        "MEMBER_REMOVED",
        "USER_JOINED",
        "USER_LEFT",
        "ONLINE_USERS",
    ];
    for tag in tags {
        let kind = EnvelopeKind::parse(tag);
        assert_ne!(kind, EnvelopeKind::Unknown, "{tag}");
        assert_eq!(kind.as_str(), tag);
    }
    assert_eq!(EnvelopeKind::parse("BOARD_EXPLODED"), EnvelopeKind::Unknown);
}

#[test]
fn families_group_lifecycle_kinds() {
    assert_eq!(EnvelopeKind::TaskAssigned.family(), KindFamily::Task);
    assert_eq!(EnvelopeKind::CommentDeleted.family(), KindFamily::Comment);
    assert_eq!(EnvelopeKind::ProjectDeleted.family(), KindFamily::Project);
    assert_eq!(EnvelopeKind::MemberAdded.family(), KindFamily::Membership);
    assert_eq!(EnvelopeKind::OnlineUsers.family(), KindFamily::Presence);
    assert_eq!(EnvelopeKind::Unknown.family(), KindFamily::Unknown);
}

#[test]
fn encode_envelope_uses_wire_field_names() {
    let env = Envelope::new("TASK_UPDATED", json!({"id": 1})).with_user_id("u-1");
    let value: Value = serde_json::from_str(&encode_envelope(&env)).expect("json");
    assert_eq!(value, json!({"type": "TASK_UPDATED", "payload": {"id": 1}, "userId": "u-1"}));
}

#[test]
fn id_helpers_accept_strings_and_numbers() {
    assert_eq!(id_number(&json!(42)), Some(42));
    assert_eq!(id_number(&json!("42")), Some(42));
    assert_eq!(id_number(&json!(true)), None);
    assert_eq!(id_string(&json!(42)), Some("42".to_owned()));
    assert_eq!(id_string(&Value::Null), None);
}
