//! Glue that ties [`super::spawner`], [`super::writer`], [`super::reader`],
//! and [`super::handshake`] together into one live agent connection.
//!
//! Not a spec component on its own — it is the "one ACP connection" half of
//! C3's "one ACP connection + state machine + event pub/sub", factored out
//! so [`crate::aux::agent`] (C7) can reuse exactly the same transport
//! plumbing for the auxiliary agent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::acp::protocol::InboundMessage;
use crate::acp::writer::AcpWriter;
use crate::acp::{handshake, reader, spawner};
use crate::{AppError, Result};

/// A live connection to one spawned ACP agent process.
pub struct AcpTransport {
    /// Outbound writer, shared by every caller that needs to talk to this
    /// agent.
    pub writer: AcpWriter,
    /// Session id the agent assigned during the handshake.
    pub acp_session_id: String,
    /// Inbound agent-originated requests/notifications (everything that
    /// isn't a response to one of our own requests).
    pub inbound: mpsc::Receiver<InboundMessage>,
    reader_task: JoinHandle<Result<()>>,
    pgid: i32,
    child: tokio::process::Child,
    teardown_grace: Duration,
    pending: crate::acp::writer::PendingMap,
}

/// Spawn an agent, perform the handshake, and hand back a live transport.
///
/// # Errors
///
/// Returns `AppError::Transport` if the process fails to spawn or the
/// handshake fails; the child is killed before returning in that case.
pub async fn connect(
    agent_command: &str,
    workspace_dir: &Path,
    max_line_bytes: usize,
    teardown_grace: Duration,
    extra_env: &HashMap<String, String>,
) -> Result<AcpTransport> {
    let argv = spawner::tokenise_command(agent_command)?;
    let mut grouped = spawner::spawn_grouped(&argv, workspace_dir, extra_env)?;

    let stdin = grouped
        .child
        .stdin
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture agent stdin".into()))?;
    let stdout = grouped
        .child
        .stdout
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture agent stdout".into()))?;

    let pending = Arc::new(Mutex::new(HashMap::new()));
    let writer = AcpWriter::new(stdin, max_line_bytes, Arc::clone(&pending));
    let (inbound_tx, inbound_rx) = mpsc::channel(256);

    let reader_task = tokio::spawn(reader::run(stdout, max_line_bytes, pending, inbound_tx));

    let handshake_result = handshake::perform(&writer, workspace_dir).await;
    let acp_session_id = match handshake_result {
        Ok(hs) => hs.acp_session_id,
        Err(err) => {
            let _ = spawner::teardown_group(&mut grouped.child, grouped.pgid, teardown_grace)
                .await;
            reader_task.abort();
            return Err(err);
        }
    };

    Ok(AcpTransport {
        writer,
        acp_session_id,
        inbound: inbound_rx,
        reader_task,
        pgid: grouped.pgid,
        child: grouped.child,
        teardown_grace,
        pending,
    })
}

impl AcpTransport {
    /// Tear down the agent's process group, stop the reader task, and fail
    /// any request still awaiting a response so its caller doesn't hang.
    pub async fn close(mut self) {
        if let Err(err) =
            spawner::teardown_group(&mut self.child, self.pgid, self.teardown_grace).await
        {
            warn!(%err, "error tearing down agent process group");
        }
        self.reader_task.abort();
        reader::fail_all_pending(&self.pending, "agent connection closed").await;
    }

    /// Await the child process exiting on its own (used by the session's
    /// exit-monitor loop to detect a crashed agent).
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }
}

/// Resolve a workspace-relative agent command template to an absolute
/// working directory default, used when a caller only has a relative path.
#[must_use]
pub fn resolve_workspace(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
