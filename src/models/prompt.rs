//! Per-session prompt queue entries.
//!
//! Agents accept only one prompt at a time, so a bounded FIFO (C4) holds
//! whatever the session manager hasn't yet been able to drain to the agent.

use serde::{Deserialize, Serialize};

/// Default bound on a per-session prompt queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// One entry in a session's prompt queue.
///
/// Unique `id`; FIFO ordering within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Unique identifier for this queued message.
    pub id: String,
    /// Session this message is queued against.
    pub session_id: String,
    /// Prompt text.
    pub text: String,
    /// Referenced attachment identifiers.
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    /// When the message was enqueued.
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    /// Client that submitted the message.
    pub client_id_origin: String,
    /// Short (2-3 word) title synthesised asynchronously by the auxiliary
    /// agent (C7); `None` until it resolves.
    #[serde(default)]
    pub auto_title: Option<String>,
}

impl QueuedMessage {
    /// Construct a queued message with no title yet assigned.
    #[must_use]
    pub fn new(
        id: String,
        session_id: String,
        text: String,
        attachment_ids: Vec<String>,
        client_id_origin: String,
    ) -> Self {
        Self {
            id,
            session_id,
            text,
            attachment_ids,
            enqueued_at: chrono::Utc::now(),
            client_id_origin,
            auto_title: None,
        }
    }
}
