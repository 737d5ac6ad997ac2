//! Session identity and its runtime state machine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runtime state of a [`Session`]'s background agent connection.
///
/// See the background session state machine: `cold -> starting -> ready`,
/// `ready <-> busy`, `busy -> cancelling -> ready`, and `any -> dead`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// No subprocess has been started yet.
    Cold,
    /// Subprocess spawned; ACP handshake in flight.
    Starting,
    /// Handshake complete; idle, able to accept a prompt.
    Ready,
    /// A prompt is in flight.
    Busy,
    /// A cancel was requested while busy; awaiting the agent's acknowledgment.
    Cancelling,
    /// Subprocess has exited or the session was explicitly closed.
    Dead,
}

impl RuntimeStatus {
    /// Whether `self -> next` is a legal state machine transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RuntimeStatus::{Busy, Cancelling, Cold, Dead, Ready, Starting};
        matches!(
            (self, next),
            (Cold, Starting)
                | (Starting, Ready)
                | (Starting, Dead)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Busy, Cancelling)
                | (Cancelling, Ready)
                | (_, Dead)
        )
    }
}

/// A registered workspace: a working directory plus the agent profile and
/// shell command template used to spawn sessions rooted there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute working directory.
    pub working_dir: PathBuf,
    /// Name of the agent profile associated with this workspace.
    pub agent_profile: String,
    /// Shell command template used to launch the agent, e.g.
    /// `"my-agent --port ${PORT}"`.
    pub agent_command: String,
}

/// A durable identity representing one conversation with an agent.
///
/// Exclusively owned by the session manager (C5) while alive; its journal
/// directory is exclusively owned by that session's event writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque, globally unique identifier.
    pub session_id: String,
    /// Absolute workspace directory this session is rooted in.
    pub workspace_dir: PathBuf,
    /// Name of the agent profile used to spawn this session.
    pub agent_profile_name: String,
    /// Shell command template used to launch the agent.
    pub agent_command: String,
    /// Human-readable, mutable title.
    pub name: String,
    /// When the session was first created.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the session's metadata was last modified.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Current point in the background session state machine.
    pub runtime_status: RuntimeStatus,
    /// ACP session identifier assigned by the current agent process.
    ///
    /// Transient: reassigned on every resume, never persisted across a
    /// subprocess restart.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub acp_session_id: Option<String>,
    /// High-water journal sequence number; equals the highest seq on disk.
    pub event_count: i64,
}

impl Session {
    /// Construct a brand-new, never-started session in the `cold` state.
    #[must_use]
    pub fn new(
        session_id: String,
        workspace_dir: PathBuf,
        agent_profile_name: String,
        agent_command: String,
        name: String,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id,
            workspace_dir,
            agent_profile_name,
            agent_command,
            name,
            created_at: now,
            updated_at: now,
            runtime_status: RuntimeStatus::Cold,
            acp_session_id: None,
            event_count: 0,
        }
    }
}
