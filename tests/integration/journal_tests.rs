use mitto::models::event::EventKind;
use mitto::persistence::journal::{JournalStore, MetadataPatch, SessionMetadata};
use mitto::AppError;
use serde_json::json;

fn metadata(name: &str) -> SessionMetadata {
    SessionMetadata {
        name: name.to_owned(),
        workspace_dir: "/tmp/workspace".into(),
        agent_profile: "default".into(),
        agent_command: "default-agent --acp".into(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        event_count: 0,
        last_user_data: None,
    }
}

#[tokio::test]
async fn create_then_read_metadata_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());

    store.create("s1", &metadata("first session")).await.unwrap();
    let read = store.read_metadata("s1").await.unwrap();
    assert_eq!(read.name, "first session");
    assert_eq!(read.event_count, 0);
}

#[tokio::test]
async fn append_assigns_increasing_seq_and_bumps_event_count() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());
    store.create("s1", &metadata("session")).await.unwrap();

    let first = store
        .append_event("s1", EventKind::UserPrompt, json!({"message": "hi"}))
        .await
        .unwrap();
    let second = store
        .append_event("s1", EventKind::AgentMessage, json!({"text": "hello"}))
        .await
        .unwrap();

    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);

    let metadata = store.read_metadata("s1").await.unwrap();
    assert_eq!(metadata.event_count, 2);
}

#[tokio::test]
async fn read_range_returns_events_strictly_after_the_given_seq() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());
    store.create("s1", &metadata("session")).await.unwrap();

    for i in 0..5 {
        store
            .append_event("s1", EventKind::AgentMessage, json!({"i": i}))
            .await
            .unwrap();
    }

    let events = store.read_range("s1", 2, 10).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].seq, 3);
    assert_eq!(events.last().unwrap().seq, 5);

    let limited = store.read_range("s1", 0, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].seq, 1);
}

#[tokio::test]
async fn update_metadata_applies_only_the_supplied_fields() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());
    store.create("s1", &metadata("original name")).await.unwrap();

    let patch = MetadataPatch {
        name: Some("renamed".to_owned()),
        last_user_data: None,
    };
    let updated = store.update_metadata("s1", patch).await.unwrap();
    assert_eq!(updated.name, "renamed");

    let patch = MetadataPatch {
        name: None,
        last_user_data: Some(json!({"draft": "still typing"})),
    };
    let updated = store.update_metadata("s1", patch).await.unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.last_user_data, Some(json!({"draft": "still typing"})));
}

#[tokio::test]
async fn list_sessions_sorts_newest_updated_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());

    store.create("older", &metadata("older")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.create("newer", &metadata("newer")).await.unwrap();

    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].0, "newer");
    assert_eq!(sessions[1].0, "older");
}

#[tokio::test]
async fn delete_removes_metadata_and_journal() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());
    store.create("s1", &metadata("doomed")).await.unwrap();
    store
        .append_event("s1", EventKind::AgentMessage, json!({}))
        .await
        .unwrap();

    store.delete("s1").await.unwrap();

    let err = store.read_metadata("s1").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn read_metadata_for_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = JournalStore::new(dir.path().to_path_buf());
    let err = store.read_metadata("never-created").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
