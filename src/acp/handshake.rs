//! ACP session handshake: `initialize` then `session/new`, driving the
//! session from `starting` to `ready`.

use std::path::Path;

use serde_json::{json, Value};

use crate::acp::writer::AcpWriter;
use crate::{AppError, Result};

/// Result of a successful handshake.
pub struct Handshake {
    /// Session id assigned by the agent for this process.
    pub acp_session_id: String,
}

/// Perform `initialize` followed by `session/new` against a freshly spawned
/// agent, returning the agent-assigned session id.
///
/// # Errors
///
/// Returns `AppError::Transport` if either request fails or the agent
/// returns a response this broker can't interpret.
pub async fn perform(writer: &AcpWriter, workspace_dir: &Path) -> Result<Handshake> {
    let (_, rx) = writer
        .send_request(
            "initialize",
            Some(json!({
                "protocolVersion": "1",
                "clientInfo": { "name": "mitto", "version": env!("CARGO_PKG_VERSION") },
            })),
        )
        .await?;
    rx.await
        .map_err(|_| AppError::Transport("agent closed before responding to initialize".into()))??;

    let (_, rx) = writer
        .send_request(
            "session/new",
            Some(json!({
                "cwd": workspace_dir.to_string_lossy(),
            })),
        )
        .await?;
    let result: Value = rx
        .await
        .map_err(|_| AppError::Transport("agent closed before responding to session/new".into()))??;

    let acp_session_id = result
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Transport("session/new response missing sessionId".into()))?
        .to_owned();

    Ok(Handshake { acp_session_id })
}
