use std::path::PathBuf;
use std::sync::Arc;

use mitto::config::{AcpConfig, SessionConfig};
use mitto::models::session::Workspace;
use mitto::persistence::journal::JournalStore;
use mitto::session::manager::SessionManager;
use mitto::AppError;

fn manager_with_cap(dir: &std::path::Path, max_sessions: usize) -> SessionManager {
    let journal = Arc::new(JournalStore::new(dir.join("sessions")));
    let session_config = SessionConfig {
        max_sessions,
        queue_capacity: 8,
        resume_priming_events: None,
    };
    SessionManager::new(journal, AcpConfig::default(), session_config, vec![], None, None)
}

#[tokio::test]
async fn create_session_rejects_once_at_cap() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with_cap(dir.path(), 0);

    let workspace = Workspace {
        working_dir: PathBuf::from("/tmp/explicit-workspace"),
        agent_profile: "explicit".into(),
        agent_command: "irrelevant-agent-command".into(),
    };

    let err = manager
        .create_session("new session".into(), PathBuf::from("/tmp/explicit-workspace"), Some(workspace))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::TooManySessions));
}

#[tokio::test]
async fn create_session_fails_without_a_resolvable_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with_cap(dir.path(), 4);

    let err = manager
        .create_session("no workspace".into(), PathBuf::from("/tmp/unregistered"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_sessions_is_empty_for_a_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with_cap(dir.path(), 4);

    let sessions = manager.list_sessions().await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn workspace_registry_add_remove_and_list_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with_cap(dir.path(), 4);

    let workspace = Workspace {
        working_dir: PathBuf::from("/tmp/registered"),
        agent_profile: "registered".into(),
        agent_command: "agent --acp".into(),
    };
    manager.add_workspace(workspace.clone()).await;

    let listed = manager.get_workspaces().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].agent_profile, "registered");

    manager.remove_workspace(&workspace.working_dir).await;
    assert!(manager.get_workspaces().await.is_empty());
}

#[tokio::test]
async fn workspace_persist_callback_fires_on_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(JournalStore::new(dir.path().join("sessions")));
    let session_config = SessionConfig {
        max_sessions: 4,
        queue_capacity: 8,
        resume_priming_events: None,
    };

    let persisted = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let persisted_for_callback = Arc::clone(&persisted);
    let callback: mitto::session::manager::WorkspacePersistCallback =
        Arc::new(move |workspaces: &[Workspace]| {
            let snapshot = workspaces.to_vec();
            let persisted = Arc::clone(&persisted_for_callback);
            tokio::spawn(async move {
                *persisted.lock().await = snapshot;
            });
        });

    let manager = SessionManager::new(
        journal,
        AcpConfig::default(),
        session_config,
        vec![],
        None,
        Some(callback),
    );

    manager
        .add_workspace(Workspace {
            working_dir: PathBuf::from("/tmp/persisted"),
            agent_profile: "persisted".into(),
            agent_command: "agent".into(),
        })
        .await;

    // Give the spawned persistence task a chance to run.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let snapshot = persisted.lock().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].agent_profile, "persisted");
}
