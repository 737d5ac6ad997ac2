//! REST handlers for session, queue, and workspace CRUD.
//!
//! Handlers share one `AppState` and return plain `Result<T>`; `AppError`
//! already implements `IntoResponse` (see `errors.rs`).

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::hub::server::HubState;
use crate::models::prompt::QueuedMessage;
use crate::models::session::{Session, Workspace};
use crate::{AppError, Result};

/// Request body for `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Human-readable title; defaults to "New session".
    #[serde(default)]
    pub name: Option<String>,
    /// Working directory the session is rooted in; defaults to the
    /// configured default workspace's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Agent profile override; resolved against registered workspaces.
    #[serde(default)]
    pub acp_server: Option<String>,
}

/// `GET /api/sessions`.
///
/// # Errors
///
/// Returns `AppError::Storage` if the journal directory can't be listed.
pub async fn list_sessions(State(state): State<HubState>) -> Result<Json<Vec<Session>>> {
    let sessions = state.session_manager.list_sessions().await?;
    Ok(Json(sessions))
}

/// `POST /api/sessions`.
///
/// # Errors
///
/// Returns `AppError::TooManySessions` at the configured cap, or
/// `AppError::NotFound` if `acp_server` doesn't name a registered
/// workspace and no default workspace is configured.
pub async fn create_session(
    State(state): State<HubState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>)> {
    let explicit = if let Some(profile) = &req.acp_server {
        let workspace = state
            .session_manager
            .get_workspaces()
            .await
            .into_iter()
            .find(|w| &w.agent_profile == profile)
            .ok_or_else(|| AppError::NotFound(format!("workspace for acp_server {profile}")))?;
        Some(workspace)
    } else {
        None
    };

    let working_dir = req.working_dir.clone().or_else(|| {
        explicit
            .as_ref()
            .map(|w: &Workspace| w.working_dir.clone())
    });
    let working_dir = match working_dir {
        Some(dir) => dir,
        None => {
            let default = state.session_manager.get_default_workspace().await;
            default
                .map(|w| w.working_dir)
                .ok_or_else(|| AppError::NotFound("no default workspace configured".into()))?
        }
    };

    let name = req.name.unwrap_or_else(|| "New session".to_owned());
    let session = state
        .session_manager
        .create_session(name, working_dir, explicit)
        .await?;

    let metadata = state
        .session_manager
        .session_metadata(session.session_id())
        .await?;
    let runtime_status = session.runtime_status().await;
    let body = Session {
        session_id: session.session_id().to_owned(),
        workspace_dir: metadata.workspace_dir,
        agent_profile_name: metadata.agent_profile,
        agent_command: metadata.agent_command,
        name: metadata.name,
        created_at: metadata.created_at,
        updated_at: metadata.updated_at,
        runtime_status,
        acp_session_id: session.acp_session_id().await,
        event_count: metadata.event_count,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// `GET /api/sessions/{id}`.
///
/// # Errors
///
/// Returns `AppError::NotFound` if no session with that id has ever
/// existed.
pub async fn get_session(
    State(state): State<HubState>,
    Path(id): Path<String>,
) -> Result<Json<Session>> {
    let metadata = state.session_manager.session_metadata(&id).await?;
    let runtime_status = match state.session_manager.get_session(&id).await {
        Some(session) => session.runtime_status().await,
        None => crate::models::session::RuntimeStatus::Dead,
    };
    Ok(Json(Session {
        session_id: id,
        workspace_dir: metadata.workspace_dir,
        agent_profile_name: metadata.agent_profile,
        agent_command: metadata.agent_command,
        name: metadata.name,
        created_at: metadata.created_at,
        updated_at: metadata.updated_at,
        runtime_status,
        acp_session_id: None,
        event_count: metadata.event_count,
    }))
}

/// `DELETE /api/sessions/{id}`.
///
/// # Errors
///
/// Returns `AppError::Storage` if the on-disk journal cannot be removed.
pub async fn delete_session(
    State(state): State<HubState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.session_manager.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/sessions/{id}/queue`.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the session isn't currently running.
pub async fn list_queue(
    State(state): State<HubState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<QueuedMessage>>> {
    let queue = state
        .session_manager
        .get_queue(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    Ok(Json(queue.list().await))
}

/// Request body for `POST /api/sessions/{id}/queue`.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// Prompt text.
    pub text: String,
    /// Referenced attachment identifiers.
    #[serde(default)]
    pub attachment_ids: Vec<String>,
}

/// `POST /api/sessions/{id}/queue`.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the session isn't running, or
/// `AppError::QueueFull` (mapped to `409`) at capacity.
pub async fn enqueue_message(
    State(state): State<HubState>,
    Path(id): Path<String>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<QueuedMessage>)> {
    let queue = state
        .session_manager
        .get_queue(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;

    let message = queue
        .add(req.text.clone(), req.attachment_ids, "rest-api".to_owned())
        .await?;

    state.spawn_title_synthesis(id.clone(), message.id.clone(), req.text);
    state.session_manager.try_drain(&id).await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// `DELETE /api/sessions/{id}/queue/{mid}`.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the session or queued message doesn't
/// exist.
pub async fn remove_queued_message(
    State(state): State<HubState>,
    Path((id, mid)): Path<(String, String)>,
) -> Result<StatusCode> {
    let queue = state
        .session_manager
        .get_queue(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    queue.remove(&mid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Response body for `GET /api/workspaces`.
#[derive(Debug, Serialize)]
pub struct WorkspacesResponse {
    /// Every registered workspace.
    pub workspaces: Vec<Workspace>,
    /// Distinct agent profile names across registered workspaces.
    pub acp_servers: Vec<String>,
}

/// `GET /api/workspaces`.
pub async fn list_workspaces(State(state): State<HubState>) -> Json<WorkspacesResponse> {
    let workspaces = state.session_manager.get_workspaces().await;
    let mut acp_servers: Vec<String> = workspaces
        .iter()
        .map(|w| w.agent_profile.clone())
        .collect();
    acp_servers.sort_unstable();
    acp_servers.dedup();
    Json(WorkspacesResponse {
        workspaces,
        acp_servers,
    })
}
