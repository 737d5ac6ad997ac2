//! Message hooks pipeline (C10) manifest types.
//!
//! One [`HookSpec`] is parsed from each `*.yaml` manifest discovered under
//! the configured hooks directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// When a hook applies to an outbound user prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HookTrigger {
    /// Only the first prompt of a conversation.
    First,
    /// Every prompt.
    All,
    /// Every prompt except the first.
    AllExceptFirst,
}

/// Where a hook's output is spliced relative to the message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookPosition {
    /// Insert before the existing message.
    Prepend,
    /// Insert after the existing message.
    Append,
}

/// What a hook receives on stdin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookInputMode {
    /// Only the outbound message text.
    Message,
    /// The message plus recent conversation context.
    Conversation,
    /// No stdin payload.
    None,
}

/// How a hook's stdout is applied to the outbound message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookOutputMode {
    /// Replace the message with the hook's output.
    Transform,
    /// Prepend the hook's output to the message.
    Prepend,
    /// Append the hook's output to the message.
    Append,
    /// Run the hook for side effects only; its output is ignored.
    Discard,
}

/// What happens when a hook fails (non-zero exit, timeout, malformed
/// output).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookErrorPolicy {
    /// Drop this hook's contribution and continue the pipeline.
    Skip,
    /// Abort the pipeline with `AppError::Hook`.
    Fail,
}

/// One external-command hook declaration, parsed from a YAML manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HookSpec {
    /// Human-readable name, used in logs and error messages.
    pub name: String,
    /// When this hook applies.
    pub trigger: HookTrigger,
    /// Where its output is spliced, when `output_mode` isn't `transform`.
    #[serde(default = "default_position")]
    pub position: HookPosition,
    /// Lower runs first.
    #[serde(default)]
    pub priority: i32,
    /// Executable to invoke.
    pub command: String,
    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// What the hook receives on stdin.
    #[serde(default = "default_input_mode")]
    pub input_mode: HookInputMode,
    /// How the hook's stdout is applied.
    #[serde(default = "default_output_mode")]
    pub output_mode: HookOutputMode,
    /// Per-hook timeout in seconds; falls back to the pipeline default when
    /// absent.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Working directory the hook runs in; defaults to the session's
    /// workspace directory when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Additional environment variables set for this hook's process.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    /// What to do when the hook fails.
    #[serde(default = "default_error_policy")]
    pub on_error: HookErrorPolicy,
    /// When non-empty, this hook only runs for sessions whose workspace
    /// directory is in the list.
    #[serde(default)]
    pub workspaces: Vec<PathBuf>,
    /// Absolute path to the manifest this spec was parsed from; filled in by
    /// discovery, not part of the YAML body itself.
    #[serde(skip)]
    pub manifest_path: PathBuf,
}

fn default_position() -> HookPosition {
    HookPosition::Append
}

fn default_input_mode() -> HookInputMode {
    HookInputMode::Message
}

fn default_output_mode() -> HookOutputMode {
    HookOutputMode::Transform
}

fn default_error_policy() -> HookErrorPolicy {
    HookErrorPolicy::Skip
}

impl HookSpec {
    /// Whether this hook applies to a prompt at `prompt_index` (0-based)
    /// within its conversation.
    #[must_use]
    pub fn applies_to_turn(&self, prompt_index: usize) -> bool {
        match self.trigger {
            HookTrigger::First => prompt_index == 0,
            HookTrigger::All => true,
            HookTrigger::AllExceptFirst => prompt_index > 0,
        }
    }

    /// Whether this hook is eligible for a session rooted at `workspace_dir`.
    #[must_use]
    pub fn applies_to_workspace(&self, workspace_dir: &std::path::Path) -> bool {
        self.workspaces.is_empty() || self.workspaces.iter().any(|w| w == workspace_dir)
    }
}

/// A hook's stdin payload, written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct HookInput {
    /// The current message text.
    pub message: String,
    /// Recent conversation context, present when `input_mode` is
    /// `conversation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Vec<String>>,
}

/// A hook's stdout payload, parsed as JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookOutput {
    /// Replacement/contributed message text (`message` and `text` are
    /// accepted as aliases for the same field).
    #[serde(default, alias = "text")]
    pub message: Option<String>,
    /// Attachment identifiers the hook wants attached.
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Non-empty when the hook wants to report a soft error without a
    /// non-zero exit code.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form metadata the hook wants recorded, uninterpreted here.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}
