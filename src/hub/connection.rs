//! WebSocket upgrade and per-connection fan-out (C6).
//!
//! Each connection splits the socket into a send task draining a broadcast
//! channel and a receive task parsing client frames, joined with
//! `tokio::select!` so either side closing ends the connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::hub::server::HubState;
use crate::models::subscription::SUBSCRIBER_CHANNEL_CAPACITY;
use crate::models::wire::{ClientMessage, ServerMessage};
use crate::session::background::BackgroundSession;
use crate::{AppError, Result};

/// Write deadline for one outbound frame; an unresponsive client is
/// disconnected rather than allowed to back up the outbox indefinitely.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// `GET /api/sessions/{id}/ws` — upgrade to a WebSocket and attach the
/// connection to `id`, auto-creating/resuming the session if needed.
pub async fn upgrade(
    State(state): State<HubState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, id))
}

async fn handle_socket(socket: WebSocket, state: HubState, session_id: String) {
    let session = match state.session_manager.get_or_create_session(&session_id).await {
        Ok(session) => session,
        Err(err) => {
            warn!(session_id = %session_id, %err, "failed to attach websocket client to session");
            send_error_and_close(socket, err.to_string()).await;
            return;
        }
    };

    // Subscribe *before* doing anything else, so no live event can fall
    // between this registration and any subsequent `sync_session` replay.
    let (client_id, mut from_session) = session.subscribe().await;
    let acp_server = state
        .session_manager
        .session_metadata(&session_id)
        .await
        .ok()
        .map(|meta| meta.agent_profile);

    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(SUBSCRIBER_CHANNEL_CAPACITY);

    let _ = out_tx
        .send(ServerMessage::Connected {
            session_id: session_id.clone(),
            client_id: client_id.clone(),
            acp_server,
        })
        .await;

    // Forward every event this connection is subscribed to into the shared
    // outbox, alongside the request/response-shaped replies (`connected`,
    // `session_sync`, `error`) the read loop produces directly.
    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(message) = from_session.recv().await {
            if forward_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let (mut sink, mut stream) = socket.split();
    let write_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if send_message(&mut sink, &message).await.is_err() {
                break;
            }
        }
    });

    read_loop(&mut stream, &state, &session, &session_id, &client_id, &out_tx).await;

    forward_task.abort();
    write_task.abort();
    session.unsubscribe(&client_id).await;
    info!(session_id = %session_id, client_id = %client_id, "websocket client disconnected");
}

async fn read_loop(
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
    state: &HubState,
    session: &Arc<BackgroundSession>,
    session_id: &str,
    client_id: &str,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    use futures_util::StreamExt;

    while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else { break };
        let Message::Text(text) = frame else { continue };

        let parsed: std::result::Result<ClientMessage, _> = serde_json::from_str(&text);
        let Ok(message) = parsed else {
            warn!(session_id, %text, "malformed client message, ignoring");
            continue;
        };

        if let Err(err) =
            handle_client_message(message, state, session, session_id, client_id, out_tx).await
        {
            warn!(session_id, client_id, %err, "failed to handle client message");
            let _ = out_tx
                .send(ServerMessage::Error {
                    message: err.to_string(),
                })
                .await;
        }
    }
}

async fn handle_client_message(
    message: ClientMessage,
    state: &HubState,
    session: &Arc<BackgroundSession>,
    session_id: &str,
    client_id: &str,
    out_tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    match message {
        ClientMessage::Prompt { message, image_ids } => {
            handle_prompt(state, session, session_id, client_id, message, image_ids).await
        }
        ClientMessage::Cancel => session.cancel().await,
        ClientMessage::PermissionAnswer {
            request_id,
            approved,
        } => handle_permission_answer(session, &request_id, approved).await,
        ClientMessage::RenameSession { name } => session.rename(&name).await,
        ClientMessage::SyncSession {
            session_id: requested,
            after_seq,
        } => handle_sync(state, session_id, &requested, after_seq, out_tx).await,
        ClientMessage::Keepalive { .. } => Ok(()),
    }
}

async fn handle_prompt(
    state: &HubState,
    session: &Arc<BackgroundSession>,
    session_id: &str,
    client_id: &str,
    message: String,
    image_ids: Vec<String>,
) -> Result<()> {
    let prompt_index = state.next_prompt_index(session_id).await;
    let hooks = state.hook_cache.read().await.clone();

    let (text, mut attachments) = if hooks.is_empty() {
        (message, Vec::new())
    } else {
        let outcome = crate::hooks::pipeline::run_pipeline(
            &hooks,
            message,
            prompt_index,
            session.workspace_dir(),
            state.hooks_default_timeout,
        )
        .await?;
        (outcome.message, outcome.attachments)
    };
    attachments.extend(image_ids);

    let queue = state
        .session_manager
        .get_queue(session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
    let queued = queue.add(text.clone(), attachments, client_id.to_owned()).await?;

    state.spawn_title_synthesis(session_id.to_owned(), queued.id.clone(), text);
    state.session_manager.try_drain(session_id).await;
    Ok(())
}

async fn handle_permission_answer(
    session: &Arc<BackgroundSession>,
    request_id: &str,
    approved: bool,
) -> Result<()> {
    if !approved {
        return session.answer_permission(request_id, None).await;
    }
    let options = session.permission_options(request_id).await.unwrap_or_default();
    let chosen = options
        .iter()
        .find(|opt| {
            opt.option_id.to_lowercase().contains("allow")
                || opt.label.to_lowercase().contains("allow")
        })
        .or_else(|| options.first());
    session
        .answer_permission(request_id, chosen.map(|opt| opt.option_id.as_str()))
        .await
}

async fn handle_sync(
    state: &HubState,
    session_id: &str,
    requested_session_id: &str,
    after_seq: i64,
    out_tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    if requested_session_id != session_id {
        return Err(AppError::NotFound(format!(
            "connection is attached to {session_id}, not {requested_session_id}"
        )));
    }
    let events = state
        .session_manager
        .read_events(session_id, after_seq, usize::MAX)
        .await?;
    let metadata = state.session_manager.session_metadata(session_id).await?;
    let sync = ServerMessage::SessionSync {
        events,
        event_count: metadata.event_count,
    };
    let _ = out_tx.send(sync).await;
    Ok(())
}

async fn send_message(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> std::result::Result<(), ()> {
    use futures_util::SinkExt;

    let Ok(text) = serde_json::to_string(message) else {
        return Err(());
    };
    match tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

async fn send_error_and_close(socket: WebSocket, message: String) {
    use futures_util::SinkExt;

    let mut socket = socket;
    let payload = ServerMessage::Error { message };
    if let Ok(text) = serde_json::to_string(&payload) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.close().await;
}
