//! Wire message types exchanged between a client hub connection and its
//! WebSocket peer.
//!
//! These are the payloads named in the client hub's server→client
//! vocabulary. They are kept in `models` rather than `hub` because
//! [`crate::models::subscription::ClientSubscription`] needs the type for its
//! send channel without creating a dependency from `models` onto `hub`.

use serde::{Deserialize, Serialize};

use crate::models::event::Event;
use crate::models::permission::PermissionOption;

/// Inbound message from a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit a new prompt to the session, with optional image attachments.
    Prompt {
        /// Prompt text.
        message: String,
        /// Referenced attachment identifiers.
        #[serde(default)]
        image_ids: Vec<String>,
    },
    /// Cancel the in-flight prompt.
    Cancel,
    /// Answer an outstanding permission request.
    PermissionAnswer {
        /// Identifier of the request being answered.
        request_id: String,
        /// Whether the operator approved the request.
        approved: bool,
    },
    /// Rename the session.
    RenameSession {
        /// New human-readable name.
        name: String,
    },
    /// Resynchronise after a reconnect.
    SyncSession {
        /// Session to resync.
        session_id: String,
        /// Last sequence number the client has already processed.
        after_seq: i64,
    },
    /// Liveness ping.
    Keepalive {
        /// Client-supplied timestamp, echoed back unmodified.
        timestamp: i64,
    },
}

/// Outbound message to a connected client.
///
/// Most variants mirror a journal [`Event`] kind one-to-one, carrying its
/// `seq` and opaque `payload` so the wire shape stays decoupled from the
/// journal's on-disk representation. `Connected`, `QueueTitle`, `UserPrompt`,
/// `Permission`, `SessionSync`, and `Error` have no journal counterpart.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once immediately after a successful WebSocket upgrade.
    Connected {
        /// Session the connection was routed to.
        session_id: String,
        /// Identifier assigned to this client connection.
        client_id: String,
        /// Name of the agent server backing the session, when known.
        acp_server: Option<String>,
    },
    /// Agent-authored text chunk.
    AgentMessage {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// Agent reasoning/thought chunk.
    AgentThought {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// A tool invocation was started.
    ToolCall {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// A previously reported tool call changed state.
    ToolUpdate {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// The agent read a file.
    FileRead {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// The agent wrote a file.
    FileWrite {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// The agent accepted a prompt and began working.
    PromptReceived {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// The agent finished (or errored out of) the in-flight prompt.
    PromptComplete {
        /// Journal sequence number.
        seq: i64,
        /// Opaque payload.
        payload: serde_json::Value,
    },
    /// A queued message's auxiliary-agent-synthesised title became ready.
    QueueTitle {
        /// Identifier of the queued message the title belongs to.
        message_id: String,
        /// The synthesised title.
        title: String,
    },
    /// Another client's prompt, observed so every subscriber can render it.
    UserPrompt {
        /// Client that issued the prompt.
        sender_id: String,
        /// Identifier of the queued prompt.
        prompt_id: String,
        /// Prompt text.
        message: String,
    },
    /// A permission request awaiting an answer.
    Permission {
        /// Identifier of the request.
        request_id: String,
        /// Short title.
        title: String,
        /// Longer description.
        description: String,
        /// Selectable options.
        options: Vec<PermissionOption>,
    },
    /// Replay of missed events, requested via `sync_session`.
    SessionSync {
        /// Events in the requested range, in seq order.
        events: Vec<Event>,
        /// The session's current high-water seq.
        event_count: i64,
    },
    /// An error surfaced to the connection.
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl ServerMessage {
    /// Build the live wire message corresponding to a freshly appended
    /// journal event. `user_prompt` maps to its own dedicated variant so
    /// every subscriber observes each other's prompts; `permission_answer`
    /// and `session_renamed` never reach the wire directly (a client
    /// resyncs those via `session_sync` instead).
    #[must_use]
    pub fn from_event(event: &Event) -> Option<Self> {
        use crate::models::event::EventKind;

        let seq = event.seq;
        let payload = event.payload.clone();
        Some(match event.kind {
            EventKind::AgentMessage => Self::AgentMessage { seq, payload },
            EventKind::AgentThought => Self::AgentThought { seq, payload },
            EventKind::ToolCall => Self::ToolCall { seq, payload },
            EventKind::ToolUpdate => Self::ToolUpdate { seq, payload },
            EventKind::FileRead => Self::FileRead { seq, payload },
            EventKind::FileWrite => Self::FileWrite { seq, payload },
            EventKind::PromptReceived => Self::PromptReceived { seq, payload },
            EventKind::PromptComplete => Self::PromptComplete { seq, payload },
            EventKind::Error => Self::Error {
                message: payload
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown error")
                    .to_owned(),
            },
            EventKind::PermissionRequest => Self::Permission {
                request_id: payload
                    .get("request_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                title: payload
                    .get("title")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                description: payload
                    .get("description")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                options: payload
                    .get("options")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default(),
            },
            EventKind::UserPrompt => Self::UserPrompt {
                sender_id: payload
                    .get("sender_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                prompt_id: payload
                    .get("prompt_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                message: payload
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            EventKind::PermissionAnswer | EventKind::SessionRenamed => return None,
        })
    }
}
