//! Session manager (C5): lifecycle, workspace routing, cap enforcement,
//! resume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::config::{AcpConfig, SessionConfig};
use crate::models::event::Event;
use crate::models::session::{RuntimeStatus, Session, Workspace};
use crate::persistence::journal::{JournalStore, SessionMetadata};
use crate::session::background::BackgroundSession;
use crate::session::queue::PromptQueue;
use crate::{AppError, Result};

/// Callback invoked after a workspace-registry mutation, to persist the new
/// set when workspaces were not supplied at startup.
pub type WorkspacePersistCallback = Arc<dyn Fn(&[Workspace]) + Send + Sync>;

struct Entry {
    session: Arc<BackgroundSession>,
    queue: Arc<PromptQueue>,
}

/// Owns every live [`BackgroundSession`] and the registered workspace set.
pub struct SessionManager {
    journal: Arc<JournalStore>,
    acp_config: AcpConfig,
    session_config: SessionConfig,
    sessions: RwLock<HashMap<String, Entry>>,
    workspaces: RwLock<HashMap<PathBuf, Workspace>>,
    default_workspace: RwLock<Option<String>>,
    persist_workspaces: Option<WorkspacePersistCallback>,
}

impl SessionManager {
    /// Construct a manager with an initial workspace set (e.g. loaded from
    /// CLI flags or `workspaces.json`).
    #[must_use]
    pub fn new(
        journal: Arc<JournalStore>,
        acp_config: AcpConfig,
        session_config: SessionConfig,
        initial_workspaces: Vec<Workspace>,
        default_workspace: Option<String>,
        persist_workspaces: Option<WorkspacePersistCallback>,
    ) -> Self {
        let workspaces = initial_workspaces
            .into_iter()
            .map(|w| (w.working_dir.clone(), w))
            .collect();
        Self {
            journal,
            acp_config,
            session_config,
            sessions: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(workspaces),
            default_workspace: RwLock::new(default_workspace),
            persist_workspaces,
        }
    }

    /// Resolve the agent command for a new session, in order: an explicit
    /// workspace argument, a registered workspace for `working_dir`, the
    /// default workspace, or (for resume) `resume_fallback` built from the
    /// prior session's own metadata.
    async fn resolve_workspace(
        &self,
        working_dir: &Path,
        explicit: Option<Workspace>,
        resume_fallback: Option<Workspace>,
    ) -> Result<Workspace> {
        if let Some(workspace) = explicit {
            return Ok(workspace);
        }
        if let Some(workspace) = self.workspaces.read().await.get(working_dir).cloned() {
            return Ok(workspace);
        }
        if let Some(name) = self.default_workspace.read().await.clone() {
            if let Some(workspace) = self
                .workspaces
                .read()
                .await
                .values()
                .find(|w| w.agent_profile == name)
                .cloned()
            {
                return Ok(workspace);
            }
        }
        if let Some(workspace) = resume_fallback {
            return Ok(workspace);
        }
        Err(AppError::NotFound(format!(
            "no workspace registered for {}",
            working_dir.display()
        )))
    }

    /// Create a brand-new session and start its background agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TooManySessions` at `MaxSessions`, or
    /// `AppError::NotFound`/`AppError::Transport` if workspace resolution or
    /// the agent spawn fails.
    pub async fn create_session(
        &self,
        name: String,
        working_dir: PathBuf,
        workspace: Option<Workspace>,
    ) -> Result<Arc<BackgroundSession>> {
        let resolved = self.resolve_workspace(&working_dir, workspace, None).await?;

        let mut guard = self.sessions.write().await;
        if guard.len() >= self.session_config.max_sessions {
            return Err(AppError::TooManySessions);
        }

        let session_id = Uuid::new_v4().to_string();
        self.journal
            .create(
                &session_id,
                &SessionMetadata {
                    name: name.clone(),
                    workspace_dir: working_dir.clone(),
                    agent_profile: resolved.agent_profile.clone(),
                    agent_command: resolved.agent_command.clone(),
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                    event_count: 0,
                    last_user_data: None,
                },
            )
            .await?;

        let background = Arc::new(BackgroundSession::new(
            session_id.clone(),
            working_dir,
            resolved.agent_command,
            Arc::clone(&self.journal),
            self.acp_config.clone(),
        ));
        background.start().await?;

        let queue = Arc::new(PromptQueue::new(
            session_id.clone(),
            self.session_config.queue_capacity,
        ));

        guard.insert(
            session_id,
            Entry {
                session: Arc::clone(&background),
                queue: Arc::clone(&queue),
            },
        );
        drop(guard);
        Self::spawn_drain_task(Arc::clone(&background), queue);

        Ok(background)
    }

    /// Spawn the per-session queue-drain task: whenever the session
    /// transitions to `ready`, pop the head of its queue and submit it.
    /// One task per session, exits once the session goes `dead`.
    fn spawn_drain_task(session: Arc<BackgroundSession>, queue: Arc<PromptQueue>) {
        let mut status_rx = session.subscribe_status();
        tokio::spawn(async move {
            loop {
                if status_rx.changed().await.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                if status == RuntimeStatus::Dead {
                    break;
                }
                if status != RuntimeStatus::Ready {
                    continue;
                }
                let Some(message) = queue.pop_front().await else {
                    continue;
                };
                if let Err(err) = session
                    .prompt(&message.text, &message.attachment_ids, &message.client_id_origin)
                    .await
                {
                    warn!(
                        session_id = %session.session_id(),
                        %err,
                        "failed to submit drained queue message"
                    );
                }
            }
        });
    }

    /// Resume a previously persisted session under the same `session_id`: a
    /// fresh subprocess is spawned and a new `acp_session_id` assigned, but
    /// the journal and sequence numbering are preserved.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no metadata exists for `session_id`,
    /// `AppError::TooManySessions` at cap, or a transport error if the
    /// subprocess fails to spawn.
    pub async fn resume_session(
        &self,
        session_id: &str,
        working_dir: Option<PathBuf>,
    ) -> Result<Arc<BackgroundSession>> {
        let metadata = self.journal.read_metadata(session_id).await?;
        let working_dir = working_dir.unwrap_or_else(|| metadata.workspace_dir.clone());

        let resume_fallback = Workspace {
            working_dir: working_dir.clone(),
            agent_profile: metadata.agent_profile.clone(),
            agent_command: metadata.agent_command.clone(),
        };
        let resolved = self
            .resolve_workspace(&working_dir, None, Some(resume_fallback))
            .await?;

        let mut guard = self.sessions.write().await;
        if let Some(entry) = guard.get(session_id) {
            return Ok(Arc::clone(&entry.session));
        }
        if guard.len() >= self.session_config.max_sessions {
            return Err(AppError::TooManySessions);
        }

        let background = Arc::new(BackgroundSession::new(
            session_id.to_owned(),
            working_dir,
            resolved.agent_command,
            Arc::clone(&self.journal),
            self.acp_config.clone(),
        ));
        background.start().await?;

        let queue = Arc::new(PromptQueue::new(
            session_id.to_owned(),
            self.session_config.queue_capacity,
        ));
        guard.insert(
            session_id.to_owned(),
            Entry {
                session: Arc::clone(&background),
                queue: Arc::clone(&queue),
            },
        );
        drop(guard);
        Self::spawn_drain_task(Arc::clone(&background), queue);

        Ok(background)
    }

    /// Look up a running session, or resume it from its journal if it has
    /// metadata but no live process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session exists at all.
    pub async fn get_or_create_session(&self, session_id: &str) -> Result<Arc<BackgroundSession>> {
        if let Some(session) = self.get_session(session_id).await {
            return Ok(session);
        }
        self.resume_session(session_id, None).await
    }

    /// Look up a currently-tracked session by id.
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<BackgroundSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Look up a session's prompt queue by id.
    pub async fn get_queue(&self, session_id: &str) -> Option<Arc<PromptQueue>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| Arc::clone(&entry.queue))
    }

    /// Attempt to submit the head of `session_id`'s queue right now, if the
    /// session happens to already be `ready` and idle.
    ///
    /// The background drain task (spawned in [`Self::spawn_drain_task`])
    /// only wakes on a *transition* to `ready`; a message enqueued while the
    /// session is already sitting idle in `ready` would otherwise wait for
    /// some unrelated status change. Callers invoke this right after
    /// [`PromptQueue::add`] to close that gap.
    pub async fn try_drain(&self, session_id: &str) {
        let Some(entry) = self.sessions.read().await.get(session_id).map(|e| {
            (Arc::clone(&e.session), Arc::clone(&e.queue))
        }) else {
            return;
        };
        let (session, queue) = entry;
        if session.runtime_status().await != RuntimeStatus::Ready {
            return;
        }
        let Some(message) = queue.pop_front().await else {
            return;
        };
        if let Err(err) = session
            .prompt(&message.text, &message.attachment_ids, &message.client_id_origin)
            .await
        {
            warn!(
                session_id = %session.session_id(),
                %err,
                "failed to submit drained queue message"
            );
        }
    }

    /// Close and forget one session.
    pub async fn close_session(&self, session_id: &str, reason: Option<&str>) {
        if let Some(entry) = self.sessions.write().await.remove(session_id) {
            entry.session.close(reason).await;
        }
    }

    /// Close every running session (used during broker shutdown).
    pub async fn close_all(&self) {
        let entries: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, entry) in entries {
            entry.session.close(Some("broker shutdown")).await;
        }
    }

    /// List metadata for every session known to the journal store (running
    /// or not), newest-updated first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the journal root can't be listed.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let persisted = self.journal.list_sessions().await?;
        let running = self.sessions.read().await;
        let mut sessions = Vec::with_capacity(persisted.len());
        for (session_id, metadata) in persisted {
            let runtime_status = match running.get(&session_id) {
                Some(entry) => entry.session.runtime_status().await,
                None => RuntimeStatus::Dead,
            };
            let acp_session_id = match running.get(&session_id) {
                Some(entry) => entry.session.acp_session_id().await,
                None => None,
            };
            sessions.push(Session {
                session_id,
                workspace_dir: metadata.workspace_dir,
                agent_profile_name: metadata.agent_profile,
                agent_command: metadata.agent_command,
                name: metadata.name,
                created_at: metadata.created_at,
                updated_at: metadata.updated_at,
                runtime_status,
                acp_session_id,
                event_count: metadata.event_count,
            });
        }
        Ok(sessions)
    }

    /// List only sessions with a live background agent.
    pub async fn list_running_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Read a session's durable metadata document, whether or not it is
    /// currently running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session has ever existed.
    pub async fn session_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        self.journal.read_metadata(session_id).await
    }

    /// Replay journal events strictly after `after_seq`, used by the client
    /// hub's sync-on-reconnect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on I/O failure.
    pub async fn read_events(
        &self,
        session_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.journal.read_range(session_id, after_seq, limit).await
    }

    /// Close a running session (if any) and permanently delete its journal
    /// and metadata.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the on-disk journal cannot be removed.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.close_session(session_id, None).await;
        self.journal.delete(session_id).await
    }

    /// Register or replace a workspace.
    pub async fn add_workspace(&self, workspace: Workspace) {
        let mut guard = self.workspaces.write().await;
        guard.insert(workspace.working_dir.clone(), workspace);
        self.persist_current(&guard);
    }

    /// Remove a registered workspace by working directory.
    pub async fn remove_workspace(&self, working_dir: &Path) {
        let mut guard = self.workspaces.write().await;
        guard.remove(working_dir);
        self.persist_current(&guard);
    }

    /// Replace the entire workspace registry.
    pub async fn set_workspaces(&self, workspaces: Vec<Workspace>) {
        let mut guard = self.workspaces.write().await;
        *guard = workspaces
            .into_iter()
            .map(|w| (w.working_dir.clone(), w))
            .collect();
        self.persist_current(&guard);
    }

    /// List every registered workspace.
    pub async fn get_workspaces(&self) -> Vec<Workspace> {
        self.workspaces.read().await.values().cloned().collect()
    }

    /// Look up a workspace by working directory.
    pub async fn get_workspace(&self, working_dir: &Path) -> Option<Workspace> {
        self.workspaces.read().await.get(working_dir).cloned()
    }

    /// The currently designated default workspace, if any.
    pub async fn get_default_workspace(&self) -> Option<Workspace> {
        let name = self.default_workspace.read().await.clone()?;
        self.workspaces
            .read()
            .await
            .values()
            .find(|w| w.agent_profile == name)
            .cloned()
    }

    fn persist_current(&self, guard: &HashMap<PathBuf, Workspace>) {
        if let Some(callback) = &self.persist_workspaces {
            let workspaces: Vec<Workspace> = guard.values().cloned().collect();
            callback(&workspaces);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> (AcpConfig, SessionConfig) {
        (AcpConfig::default(), SessionConfig {
            max_sessions: 2,
            queue_capacity: 4,
            resume_priming_events: None,
        })
    }

    #[tokio::test]
    async fn workspace_resolution_prefers_explicit_over_registered() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(JournalStore::new(dir.path().join("sessions")));
        let (acp, session) = test_config();
        let manager = SessionManager::new(journal, acp, session, vec![], None, None);

        let explicit = Workspace {
            working_dir: PathBuf::from("/tmp/explicit"),
            agent_profile: "explicit".into(),
            agent_command: "explicit-agent".into(),
        };
        let resolved = manager
            .resolve_workspace(Path::new("/tmp/explicit"), Some(explicit.clone()), None)
            .await
            .unwrap();
        assert_eq!(resolved.agent_profile, "explicit");
    }

    #[tokio::test]
    async fn resolve_workspace_falls_back_to_resume_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(JournalStore::new(dir.path().join("sessions")));
        let (acp, session) = test_config();
        let manager = SessionManager::new(journal, acp, session, vec![], None, None);

        let resume_fallback = Workspace {
            working_dir: PathBuf::from("/tmp/unregistered"),
            agent_profile: "prior-profile".into(),
            agent_command: "prior-agent --acp".into(),
        };
        let resolved = manager
            .resolve_workspace(
                Path::new("/tmp/unregistered"),
                None,
                Some(resume_fallback.clone()),
            )
            .await
            .unwrap();
        assert_eq!(resolved.agent_command, "prior-agent --acp");
    }
}
