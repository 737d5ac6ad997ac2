//! Outbound writer task: serialises JSON-RPC requests/notifications to the
//! agent's stdin. One writer per agent, guarded by a mutex so requests
//! and responses never interleave mid-write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::SinkExt;
use serde_json::Value;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::FramedWrite;

use crate::acp::codec::AcpCodec;
use crate::acp::protocol::{Notification, Request};
use crate::{AppError, Result};

/// A pending request awaiting its response, keyed by id.
pub type PendingMap = Arc<Mutex<std::collections::HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Serialises outbound JSON-RPC traffic to a single agent process.
///
/// One `AcpWriter` per agent connection; cloning shares the same
/// underlying sink and id counter. The `Mutex` around the sink ensures
/// callers never interleave partial writes.
pub struct AcpWriter {
    sink: Arc<Mutex<FramedWrite<ChildStdin, AcpCodec>>>,
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
}

impl AcpWriter {
    /// Wrap a child's stdin with the ACP codec.
    #[must_use]
    pub fn new(stdin: ChildStdin, max_line_bytes: usize, pending: PendingMap) -> Self {
        Self {
            sink: Arc::new(Mutex::new(FramedWrite::new(
                stdin,
                AcpCodec::with_max_length(max_line_bytes),
            ))),
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
        }
    }

    /// Send a request and return a receiver for its eventual response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the write fails (e.g. the agent's
    /// stdin has been closed because the process died).
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<(u64, oneshot::Receiver<Result<Value>>)> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = Request::new(id, method, params);
        let line = serde_json::to_string(&request)?;
        self.write_line(line).await?;

        Ok((id, rx))
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the write fails.
    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<()> {
        let notification = Notification::new(method, params);
        let line = serde_json::to_string(&notification)?;
        self.write_line(line).await
    }

    /// Send a raw JSON-RPC response back to the agent (for agent-originated
    /// requests such as `fs/readTextFile`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the write fails.
    pub async fn send_response(&self, id: Value, result: Value) -> Result<()> {
        let line = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))?;
        self.write_line(line).await
    }

    async fn write_line(&self, line: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(line)
            .await
            .map_err(|err| AppError::Transport(format!("write to agent stdin failed: {err}")))
    }
}

impl Clone for AcpWriter {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
        }
    }
}

/// Channel type handed to callers that want agent-originated requests and
/// notifications (the reader forwards everything that isn't a response to
/// one of our own pending requests here).
pub type InboundSender = mpsc::Sender<crate::acp::protocol::InboundMessage>;
