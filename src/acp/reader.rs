//! Inbound reader task: drains the agent's stdout, applies the JSON-line
//! filter (skip any line that isn't valid JSON-RPC, logged at debug), and
//! routes each parsed message to either a pending request's oneshot (by
//! id) or the owning session's inbound channel.

use futures_util::StreamExt;
use tokio::process::ChildStdout;
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::acp::codec::AcpCodec;
use crate::acp::protocol::{parse_inbound, InboundMessage};
use crate::acp::writer::{InboundSender, PendingMap};
use crate::{AppError, Result};

/// Drive the inbound reader loop until the stream ends or errors.
///
/// Responses are resolved against `pending`; everything else
/// (agent-originated requests and notifications) is forwarded to `inbound`.
/// Returns the reason the loop stopped: `Ok(())` on clean EOF,
/// `Err(AppError::Transport)` on a framing I/O error, `Err(AppError::Protocol)`
/// if the line limit was exceeded.
pub async fn run(
    stdout: ChildStdout,
    max_line_bytes: usize,
    pending: PendingMap,
    inbound: InboundSender,
) -> Result<()> {
    let mut framed = FramedRead::new(stdout, AcpCodec::with_max_length(max_line_bytes));

    while let Some(next) = framed.next().await {
        let line = match next {
            Ok(line) => line,
            Err(AppError::Protocol(msg)) => return Err(AppError::Protocol(msg)),
            Err(err) => return Err(err),
        };

        let Some(message) = parse_inbound(&line) else {
            debug!(line, "skipping non-JSON-RPC line from agent stdout");
            continue;
        };

        match message {
            InboundMessage::Response { id, result } => {
                if let Some(sender) = pending.lock().await.remove(&id) {
                    let _: std::result::Result<(), _> = sender.send(result.map_err(|err| {
                        AppError::Transport(format!("agent error {}: {}", err.code, err.message))
                    }));
                } else {
                    debug!(id, "response to unknown or already-resolved request id");
                }
            }
            other => {
                if inbound.send(other).await.is_err() {
                    debug!("inbound channel closed; dropping agent message");
                }
            }
        }
    }

    Ok(())
}

/// Resolve every still-pending request with a transport error, used when
/// the connection is torn down (process exit, fatal protocol error) so no
/// awaiter blocks forever.
pub async fn fail_all_pending(pending: &PendingMap, reason: &str) {
    let mut guard = pending.lock().await;
    for (_, sender) in guard.drain() {
        let _: std::result::Result<(), Result<serde_json::Value>> =
            sender.send(Err(AppError::Transport(reason.to_owned())));
    }
}
