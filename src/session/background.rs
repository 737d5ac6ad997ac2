//! Background session (C3): one ACP connection, its state machine, and
//! per-session event fan-out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::acp::protocol::{ContentBlock, InboundMessage, SessionUpdate};
use crate::acp::transport::{self, AcpTransport};
use crate::config::{AcpConfig, ContentBlockShape};
use crate::models::event::{Event, EventKind};
use crate::models::permission::{PermissionOption, PermissionOutcome, PermissionRequest};
use crate::models::session::RuntimeStatus;
use crate::models::subscription::SUBSCRIBER_CHANNEL_CAPACITY;
use crate::models::wire::ServerMessage;
use crate::persistence::journal::JournalStore;
use crate::{AppError, Result};

struct Subscriber {
    sender: mpsc::Sender<ServerMessage>,
}

struct State {
    runtime_status: RuntimeStatus,
    writer: Option<crate::acp::writer::AcpWriter>,
    acp_session_id: Option<String>,
    subscribers: HashMap<String, Subscriber>,
    pending_permissions: HashMap<String, PermissionRequest>,
    outstanding_prompt: bool,
}

/// One live (or cold/dead) ACP conversation and the fan-out of its events
/// to every subscribed client.
pub struct BackgroundSession {
    session_id: String,
    workspace_dir: PathBuf,
    agent_command: String,
    journal: Arc<JournalStore>,
    acp_config: AcpConfig,
    state: Arc<RwLock<State>>,
    closing: AtomicBool,
    status_tx: watch::Sender<RuntimeStatus>,
    kill: CancellationToken,
}

impl BackgroundSession {
    /// Construct a cold session bound to `session_id`'s journal.
    #[must_use]
    pub fn new(
        session_id: String,
        workspace_dir: PathBuf,
        agent_command: String,
        journal: Arc<JournalStore>,
        acp_config: AcpConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(RuntimeStatus::Cold);
        Self {
            session_id,
            workspace_dir,
            agent_command,
            journal,
            acp_config,
            state: Arc::new(RwLock::new(State {
                runtime_status: RuntimeStatus::Cold,
                writer: None,
                acp_session_id: None,
                subscribers: HashMap::new(),
                pending_permissions: HashMap::new(),
                outstanding_prompt: false,
            })),
            closing: AtomicBool::new(false),
            status_tx,
            kill: CancellationToken::new(),
        }
    }

    /// Current point in the state machine.
    pub async fn runtime_status(&self) -> RuntimeStatus {
        self.state.read().await.runtime_status
    }

    /// Subscribe to state-machine transitions. The session manager's queue
    /// drain task watches this for `ready` to pop and submit queued prompts.
    pub fn subscribe_status(&self) -> watch::Receiver<RuntimeStatus> {
        self.status_tx.subscribe()
    }

    /// The ACP session id assigned by the current agent process, if any.
    pub async fn acp_session_id(&self) -> Option<String> {
        self.state.read().await.acp_session_id.clone()
    }

    async fn transition(&self, next: RuntimeStatus) -> Result<()> {
        let mut guard = self.state.write().await;
        if !guard.runtime_status.can_transition_to(next) {
            return Err(AppError::Transport(format!(
                "illegal transition {:?} -> {next:?}",
                guard.runtime_status
            )));
        }
        guard.runtime_status = next;
        drop(guard);
        let _ = self.status_tx.send(next);
        Ok(())
    }

    /// Spawn the agent subprocess and drive `cold -> starting -> ready`.
    /// Also covers `ResumeBackgroundSession`: the caller
    /// constructs a fresh `BackgroundSession` against the *same*
    /// `session_id`/journal and calls `start()`, which continues sequence
    /// numbering from the journal's stored high-water mark automatically
    /// (the journal store tracks that, not this type).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the subprocess fails to spawn or the
    /// handshake fails; the session transitions to `dead`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.transition(RuntimeStatus::Starting).await?;

        let connect_result = transport::connect(
            &self.agent_command,
            &self.workspace_dir,
            self.acp_config.max_line_bytes,
            self.acp_config.teardown_grace(),
            &HashMap::new(),
        )
        .await;

        let transport = match connect_result {
            Ok(t) => t,
            Err(err) => {
                let mut guard = self.state.write().await;
                guard.runtime_status = RuntimeStatus::Dead;
                drop(guard);
                let _ = self.status_tx.send(RuntimeStatus::Dead);
                return Err(err);
            }
        };

        {
            let mut guard = self.state.write().await;
            guard.writer = Some(transport.writer.clone());
            guard.acp_session_id = Some(transport.acp_session_id.clone());
            guard.runtime_status = RuntimeStatus::Ready;
        }
        let _ = self.status_tx.send(RuntimeStatus::Ready);

        info!(session_id = %self.session_id, "background session ready");
        self.spawn_inbound_loop(transport);
        Ok(())
    }

    fn spawn_inbound_loop(self: &Arc<Self>, mut transport: AcpTransport) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = this.kill.cancelled() => break,
                    maybe_msg = transport.inbound.recv() => {
                        match maybe_msg {
                            Some(msg) => this.handle_inbound(msg).await,
                            None => break,
                        }
                    }
                    exit = transport.wait() => {
                        let reason = match exit {
                            Ok(status) => format!("agent process exited: {status}"),
                            Err(err) => format!("agent process wait failed: {err}"),
                        };
                        this.mark_dead(&reason).await;
                        break;
                    }
                }
            }
            transport.close().await;
        });
    }

    async fn mark_dead(&self, reason: &str) {
        warn!(session_id = %self.session_id, reason, "background session died");
        let mut guard = self.state.write().await;
        guard.runtime_status = RuntimeStatus::Dead;
        guard.writer = None;
        drop(guard);
        let _ = self.status_tx.send(RuntimeStatus::Dead);
        let _ = self
            .append_and_publish(EventKind::Error, json!({ "message": reason }))
            .await;
    }

    async fn handle_inbound(&self, message: InboundMessage) {
        match message {
            InboundMessage::Notification { method, params } if method == "session/update" => {
                self.handle_session_update(params).await;
            }
            InboundMessage::Notification { method, params }
                if method == "session/promptComplete" || method == "prompt/complete" =>
            {
                self.complete_prompt(params).await;
            }
            InboundMessage::AgentRequest { id, method, params } => {
                self.handle_agent_request(id, method, params).await;
            }
            _ => {}
        }
    }

    async fn handle_session_update(&self, params: Option<serde_json::Value>) {
        let Some(params) = params else { return };
        let Some(update_value) = params.get("update").cloned() else {
            return;
        };
        let update: std::result::Result<SessionUpdate, _> = serde_json::from_value(update_value);
        let Ok(update) = update else {
            warn!(session_id = %self.session_id, "malformed session/update payload, skipping");
            return;
        };

        let (kind, payload) = match update {
            SessionUpdate::AgentMessageChunk { content } => (
                EventKind::AgentMessage,
                json!({ "text": content.text() }),
            ),
            SessionUpdate::AgentThoughtChunk { content } => (
                EventKind::AgentThought,
                json!({ "text": content.text() }),
            ),
            SessionUpdate::ToolCall { tool_call_id, payload } => (
                EventKind::ToolCall,
                json!({ "tool_call_id": tool_call_id, "detail": payload }),
            ),
            SessionUpdate::ToolCallUpdate { tool_call_id, payload } => (
                EventKind::ToolUpdate,
                json!({ "tool_call_id": tool_call_id, "detail": payload }),
            ),
            SessionUpdate::Plan { payload } => (EventKind::ToolUpdate, json!({ "plan": payload })),
            SessionUpdate::CurrentModeUpdate { mode_id } => {
                (EventKind::ToolUpdate, json!({ "mode_id": mode_id }))
            }
        };

        if let Err(err) = self.append_and_publish(kind, payload).await {
            warn!(session_id = %self.session_id, %err, "failed to append agent event to journal");
        }
    }

    async fn handle_agent_request(
        &self,
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    ) {
        match method.as_str() {
            "permission/request" => self.handle_permission_request(id, params).await,
            "fs/readTextFile" => {
                // Reading the file is the concrete I/O concern of whatever
                // owns the workspace sandbox; the broker itself has no file
                // contents to offer beyond what the agent already has, so a
                // dead agent request (no reader wired up) returns null.
                let guard = self.state.read().await;
                if let Some(writer) = &guard.writer {
                    let _ = writer.send_response(id, serde_json::Value::Null).await;
                }
            }
            "session/promptComplete" | "prompt/complete" => {
                self.complete_prompt(params).await;
            }
            _ => {}
        }
    }

    async fn handle_permission_request(
        &self,
        id: serde_json::Value,
        params: Option<serde_json::Value>,
    ) {
        let Some(params) = params else { return };
        let request_id = params
            .get("requestId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let title = params
            .get("title")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let description = params
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let options: Vec<PermissionOption> = params
            .get("options")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let request = PermissionRequest {
            request_id: request_id.clone(),
            session_id: self.session_id.clone(),
            title: title.clone(),
            description: description.clone(),
            options: options.clone(),
            outcome: None,
        };

        {
            let mut guard = self.state.write().await;
            guard
                .pending_permissions
                .insert(request_id.clone(), request);
            // The agent's own JSON-RPC id for this request is not echoed
            // back separately: ACP permission requests resolve via the
            // `prompt/respondPermission` notification keyed by `requestId`,
            // not by replying to this call directly.
            let _ = id;
        }

        let _ = self
            .append_and_publish(
                EventKind::PermissionRequest,
                json!({
                    "request_id": request_id,
                    "title": title,
                    "description": description,
                    "options": options,
                }),
            )
            .await;
    }

    async fn complete_prompt(&self, params: Option<serde_json::Value>) {
        {
            let mut guard = self.state.write().await;
            guard.outstanding_prompt = false;
            if guard.runtime_status == RuntimeStatus::Busy
                || guard.runtime_status == RuntimeStatus::Cancelling
            {
                guard.runtime_status = RuntimeStatus::Ready;
                drop(guard);
                let _ = self.status_tx.send(RuntimeStatus::Ready);
            }
        }
        let event_count = self
            .journal
            .read_metadata(&self.session_id)
            .await
            .map(|m| m.event_count)
            .unwrap_or_default();
        let payload = params.unwrap_or_else(|| json!({}));
        let mut payload = payload;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("event_count".into(), json!(event_count));
        }
        let _ = self
            .append_and_publish(EventKind::PromptComplete, payload)
            .await;
    }

    async fn append_and_publish(&self, kind: EventKind, payload: serde_json::Value) -> Result<()> {
        let event = self.journal.append_event(&self.session_id, kind, payload).await?;
        self.publish(&event).await;
        Ok(())
    }

    async fn publish(&self, event: &Event) {
        let Some(message) = ServerMessage::from_event(event) else {
            return;
        };
        self.broadcast(message).await;
    }

    /// Fan a wire message out to every current subscriber, evicting any
    /// whose channel is full or closed. Used both for journaled events
    /// (via [`Self::publish`]) and for hub-only messages with no journal
    /// counterpart, such as a queued message's synthesised title.
    pub async fn broadcast(&self, message: ServerMessage) {
        let mut guard = self.state.write().await;
        let mut stale = Vec::new();
        for (client_id, subscriber) in &guard.subscribers {
            if subscriber.sender.try_send(message.clone()).is_err() {
                stale.push(client_id.clone());
            }
        }
        for client_id in stale {
            guard.subscribers.remove(&client_id);
        }
    }

    /// Submit a prompt. Rejects if the session is not `ready`; persists
    /// `user_prompt` and `prompt_received`, then relays to the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the session isn't ready or the
    /// write to the agent fails.
    pub async fn prompt(
        &self,
        text: &str,
        attachment_ids: &[String],
        origin_client_id: &str,
    ) -> Result<String> {
        let writer = {
            let mut guard = self.state.write().await;
            if guard.runtime_status != RuntimeStatus::Ready {
                return Err(AppError::Transport(format!(
                    "session not ready (currently {:?})",
                    guard.runtime_status
                )));
            }
            if guard.outstanding_prompt {
                return Err(AppError::Transport(
                    "a prompt is already outstanding for this session".into(),
                ));
            }
            guard.outstanding_prompt = true;
            guard.runtime_status = RuntimeStatus::Busy;
            guard.writer.clone().ok_or_else(|| {
                AppError::Transport("session has no live agent connection".into())
            })?
        };
        let _ = self.status_tx.send(RuntimeStatus::Busy);

        let prompt_id = Uuid::new_v4().to_string();
        self.append_and_publish(
            EventKind::UserPrompt,
            json!({ "sender_id": origin_client_id, "prompt_id": prompt_id, "message": text }),
        )
        .await?;
        self.append_and_publish(
            EventKind::PromptReceived,
            json!({ "prompt_id": prompt_id }),
        )
        .await?;

        let content_block = match self.acp_config.content_block_shape {
            ContentBlockShape::Flat => ContentBlock::flat_text(text),
            ContentBlockShape::Nested => ContentBlock::nested_text(text),
        };
        writer
            .send_notification(
                "session/prompt",
                Some(json!({
                    "prompt": [content_block],
                    "attachments": attachment_ids,
                })),
            )
            .await?;

        Ok(prompt_id)
    }

    /// Cancel the in-flight prompt. Idempotent; only meaningful while busy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the write to the agent fails.
    pub async fn cancel(&self) -> Result<()> {
        let writer = {
            let mut guard = self.state.write().await;
            if guard.runtime_status != RuntimeStatus::Busy {
                return Ok(());
            }
            guard.runtime_status = RuntimeStatus::Cancelling;
            guard.writer.clone()
        };
        let _ = self.status_tx.send(RuntimeStatus::Cancelling);
        if let Some(writer) = writer {
            writer.send_notification("session/cancel", None).await?;
        }
        Ok(())
    }

    /// Register a fan-out subscriber; delivery ordering matches seq.
    pub async fn subscribe(&self) -> (String, mpsc::Receiver<ServerMessage>) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.state
            .write()
            .await
            .subscribers
            .insert(client_id.clone(), Subscriber { sender: tx });
        (client_id, rx)
    }

    /// Remove a subscriber registered via [`Self::subscribe`].
    pub async fn unsubscribe(&self, client_id: &str) {
        self.state.write().await.subscribers.remove(client_id);
    }

    /// Options offered by a still-outstanding permission request, for a
    /// caller (the client hub) that needs to translate a simplified
    /// approve/deny answer into the agent's own `option_id` vocabulary.
    pub async fn permission_options(&self, request_id: &str) -> Option<Vec<PermissionOption>> {
        self.state
            .read()
            .await
            .pending_permissions
            .get(request_id)
            .map(|request| request.options.clone())
    }

    /// Answer an outstanding permission request. Duplicate answers are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such request is outstanding, or
    /// `AppError::Transport` if it was already answered or the write fails.
    pub async fn answer_permission(&self, request_id: &str, option_id: Option<&str>) -> Result<()> {
        let writer = {
            let mut guard = self.state.write().await;
            let request = guard
                .pending_permissions
                .get_mut(request_id)
                .ok_or_else(|| AppError::NotFound(format!("permission request {request_id}")))?;
            if request.is_resolved() {
                return Err(AppError::Transport(format!(
                    "permission request {request_id} already answered"
                )));
            }
            request.outcome = Some(match option_id {
                Some(id) => PermissionOutcome::Selected {
                    option_id: id.to_owned(),
                },
                None => PermissionOutcome::Cancelled,
            });
            guard.writer.clone()
        };

        self.append_and_publish(
            EventKind::PermissionAnswer,
            json!({ "request_id": request_id, "option_id": option_id }),
        )
        .await?;

        if let Some(writer) = writer {
            writer
                .send_notification(
                    "prompt/respondPermission",
                    Some(json!({ "requestId": request_id, "optionId": option_id })),
                )
                .await?;
        }
        Ok(())
    }

    /// Update the session's name and emit `session_renamed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the metadata rewrite fails.
    pub async fn rename(&self, new_name: &str) -> Result<()> {
        self.journal
            .update_metadata(
                &self.session_id,
                crate::persistence::journal::MetadataPatch {
                    name: Some(new_name.to_owned()),
                    last_user_data: None,
                },
            )
            .await?;
        self.append_and_publish(EventKind::SessionRenamed, json!({ "name": new_name }))
            .await?;
        Ok(())
    }

    /// Idempotently kill the subprocess group and close every subscriber.
    pub async fn close(&self, reason: Option<&str>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.kill.cancel();
        let mut guard = self.state.write().await;
        guard.runtime_status = RuntimeStatus::Dead;
        guard.writer = None;
        guard.subscribers.clear();
        drop(guard);
        let _ = self.status_tx.send(RuntimeStatus::Dead);
        if let Some(reason) = reason {
            let _ = self
                .append_and_publish(EventKind::Error, json!({ "message": reason }))
                .await;
        }
    }

    /// Session id this instance is bound to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Working directory this session's agent was spawned in; used by the
    /// message hooks pipeline to resolve a hook's workspace allow-list.
    #[must_use]
    pub fn workspace_dir(&self) -> &std::path::Path {
        &self.workspace_dir
    }
}
