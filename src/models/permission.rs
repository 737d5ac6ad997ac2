//! Agent-issued permission requests.

use serde::{Deserialize, Serialize};

/// One selectable option on a [`PermissionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOption {
    /// Identifier the client echoes back when answering.
    pub option_id: String,
    /// Human-readable label.
    pub label: String,
}

/// How a [`PermissionRequest`] was resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// A client selected one of the offered options.
    Selected {
        /// The chosen option's id.
        option_id: String,
    },
    /// The request was cancelled before any client answered (e.g. the
    /// session moved on, or the agent withdrew it).
    Cancelled,
}

/// An outstanding permission request raised by the agent.
///
/// One outstanding per (session, agent-issued id); resolved by exactly one
/// client answer or by cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Identifier assigned by the agent for this request.
    pub request_id: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Short title.
    pub title: String,
    /// Longer description of what is being permitted.
    pub description: String,
    /// Selectable options offered to the client.
    pub options: Vec<PermissionOption>,
    /// Resolution, once answered.
    #[serde(default)]
    pub outcome: Option<PermissionOutcome>,
}

impl PermissionRequest {
    /// Whether this request has already been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}
