use mitto::models::event::{Event, EventKind};
use mitto::models::wire::{ClientMessage, ServerMessage};
use serde_json::json;

#[test]
fn prompt_message_deserializes_with_default_image_ids() {
    let raw = r#"{"type":"prompt","message":"hello"}"#;
    let msg: ClientMessage = serde_json::from_str(raw).expect("valid prompt message");
    match msg {
        ClientMessage::Prompt { message, image_ids } => {
            assert_eq!(message, "hello");
            assert!(image_ids.is_empty());
        }
        other => panic!("expected Prompt, got {other:?}"),
    }
}

#[test]
fn sync_session_round_trips_after_seq() {
    let raw = r#"{"type":"sync_session","session_id":"abc","after_seq":42}"#;
    let msg: ClientMessage = serde_json::from_str(raw).expect("valid sync_session message");
    match msg {
        ClientMessage::SyncSession { session_id, after_seq } => {
            assert_eq!(session_id, "abc");
            assert_eq!(after_seq, 42);
        }
        other => panic!("expected SyncSession, got {other:?}"),
    }
}

#[test]
fn cancel_and_keepalive_are_recognised() {
    let cancel: ClientMessage = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
    assert!(matches!(cancel, ClientMessage::Cancel));

    let keepalive: ClientMessage =
        serde_json::from_str(r#"{"type":"keepalive","timestamp":1000}"#).unwrap();
    match keepalive {
        ClientMessage::Keepalive { timestamp } => assert_eq!(timestamp, 1000),
        other => panic!("expected Keepalive, got {other:?}"),
    }
}

#[test]
fn unknown_message_type_fails_to_parse() {
    let raw = r#"{"type":"not_a_real_type"}"#;
    assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
}

fn event(kind: EventKind, payload: serde_json::Value) -> Event {
    Event { seq: 7, kind, timestamp: chrono::Utc::now(), payload }
}

#[test]
fn agent_message_event_maps_to_its_own_variant() {
    let e = event(EventKind::AgentMessage, json!({"text": "hi"}));
    let msg = ServerMessage::from_event(&e).expect("agent_message maps");
    let encoded = serde_json::to_value(&msg).unwrap();
    assert_eq!(encoded["type"], "agent_message");
    assert_eq!(encoded["seq"], 7);
}

#[test]
fn permission_request_event_flattens_payload_fields() {
    let e = event(
        EventKind::PermissionRequest,
        json!({
            "request_id": "r1",
            "title": "Write file",
            "description": "Allow write to foo.txt?",
            "options": [{"option_id": "allow", "label": "Allow"}],
        }),
    );
    let msg = ServerMessage::from_event(&e).expect("permission_request maps");
    let encoded = serde_json::to_value(&msg).unwrap();
    assert_eq!(encoded["type"], "permission");
    assert_eq!(encoded["request_id"], "r1");
    assert_eq!(encoded["options"][0]["option_id"], "allow");
}

#[test]
fn error_event_extracts_message_field() {
    let e = event(EventKind::Error, json!({"message": "agent crashed"}));
    let msg = ServerMessage::from_event(&e).expect("error maps");
    let encoded = serde_json::to_value(&msg).unwrap();
    assert_eq!(encoded["type"], "error");
    assert_eq!(encoded["message"], "agent crashed");
}

#[test]
fn permission_answer_and_session_renamed_have_no_wire_counterpart() {
    let answer = event(EventKind::PermissionAnswer, json!({}));
    assert!(ServerMessage::from_event(&answer).is_none());

    let renamed = event(EventKind::SessionRenamed, json!({}));
    assert!(ServerMessage::from_event(&renamed).is_none());
}
