//! The per-session append-only journal entry.

use serde::{Deserialize, Serialize};

/// Kind of a journal [`Event`].
///
/// `user_prompt`, `permission_answer`, and `session_renamed` originate from
/// the client side (or the session manager); the remaining kinds originate
/// from the agent's `session/update` notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A user submitted a prompt.
    UserPrompt,
    /// Agent-authored text chunk.
    AgentMessage,
    /// Agent reasoning/thought chunk.
    AgentThought,
    /// A tool invocation was started.
    ToolCall,
    /// A previously reported tool call changed state.
    ToolUpdate,
    /// The agent read a file.
    FileRead,
    /// The agent wrote a file.
    FileWrite,
    /// A permission request was raised by the agent.
    PermissionRequest,
    /// A permission request was answered by a client.
    PermissionAnswer,
    /// The agent accepted a prompt and began working.
    PromptReceived,
    /// The agent finished (or errored out of) the in-flight prompt.
    PromptComplete,
    /// A transport- or protocol-level error occurred.
    Error,
    /// The session's human-readable name changed.
    SessionRenamed,
}

/// One entry in a session's append-only journal.
///
/// `seq` is strictly increasing from 1 per session, with no gaps, assigned
/// under the session's write lock; on-disk order equals seq order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number, unique and contiguous within a session.
    pub seq: i64,
    /// What kind of event this is.
    pub kind: EventKind,
    /// When the event was appended.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Opaque, kind-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// Construct an event with `seq` left unassigned (0); the journal store
    /// fills it in on append.
    #[must_use]
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            seq: 0,
            kind,
            timestamp: chrono::Utc::now(),
            payload,
        }
    }
}
