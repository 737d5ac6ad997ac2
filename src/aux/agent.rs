//! The shared utility agent connection.
//!
//! Lazily started on first use, serialised by a request mutex held across
//! the whole round trip so at most one `prompt()` is ever in flight.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::acp::protocol::{ContentBlock, InboundMessage, SessionUpdate};
use crate::acp::transport;
use crate::acp::writer::AcpWriter;
use crate::config::AuxiliaryConfig;
use crate::models::permission::PermissionOption;
use crate::{AppError, Result};

/// One item of a follow-up suggestion list synthesised from a completed
/// conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpSuggestion {
    /// Short label shown to the user.
    pub label: String,
    /// The prompt text submitted if the user picks this suggestion.
    pub value: String,
}

#[derive(Clone)]
struct Connected {
    writer: AcpWriter,
    buffer: Arc<Mutex<String>>,
    completion: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Default)]
struct Inner {
    connected: Option<Connected>,
}

/// Shared single-flight connection to the utility agent profile.
pub struct AuxiliaryAgent {
    config: AuxiliaryConfig,
    workspace_dir: PathBuf,
    max_line_bytes: usize,
    inner: Mutex<Inner>,
}

impl AuxiliaryAgent {
    /// Construct an agent that has not yet spawned its subprocess.
    #[must_use]
    pub fn new(config: AuxiliaryConfig, workspace_dir: PathBuf, max_line_bytes: usize) -> Self {
        Self {
            config,
            workspace_dir,
            max_line_bytes,
            inner: Mutex::new(Inner::default()),
        }
    }

    async fn ensure_started(&self, guard: &mut Inner) -> Result<Connected> {
        if let Some(connected) = &guard.connected {
            return Ok(connected.clone());
        }

        let mut transport = transport::connect(
            &self.config.agent_command,
            &self.workspace_dir,
            self.max_line_bytes,
            std::time::Duration::from_secs(2),
            &HashMap::new(),
        )
        .await?;

        let writer = transport.writer.clone();
        let buffer = Arc::new(Mutex::new(String::new()));
        let completion: Arc<Mutex<Option<oneshot::Sender<()>>>> = Arc::new(Mutex::new(None));

        let task_buffer = Arc::clone(&buffer);
        let task_completion = Arc::clone(&completion);
        let task_writer = writer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_msg = transport.inbound.recv() => {
                        match maybe_msg {
                            Some(msg) => {
                                handle_inbound(msg, &task_buffer, &task_completion, &task_writer).await;
                            }
                            None => break,
                        }
                    }
                    exit = transport.wait() => {
                        if let Err(err) = exit {
                            warn!(%err, "auxiliary agent wait failed");
                        }
                        break;
                    }
                }
            }
            transport.close().await;
        });

        let connected = Connected {
            writer,
            buffer,
            completion,
        };
        guard.connected = Some(connected.clone());
        Ok(connected)
    }

    /// Submit one utility prompt and wait for the agent's reply text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the agent can't be reached, or
    /// `AppError::Cancelled` if `request_timeout_seconds` elapses first.
    pub async fn prompt(&self, text: &str) -> Result<String> {
        let mut guard = self.inner.lock().await;
        let connected = self.ensure_started(&mut guard).await?;

        connected.buffer.lock().await.clear();
        let (tx, rx) = oneshot::channel();
        *connected.completion.lock().await = Some(tx);

        connected
            .writer
            .send_notification(
                "session/prompt",
                Some(json!({ "prompt": [ContentBlock::flat_text(text)] })),
            )
            .await?;

        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                guard.connected = None;
                return Err(AppError::Transport(
                    "auxiliary agent connection closed before completion".into(),
                ));
            }
            Err(_) => return Err(AppError::Cancelled),
        }

        Ok(connected.buffer.lock().await.clone())
    }

    /// Synthesise a short conversation title, truncated to 50 characters.
    ///
    /// # Errors
    ///
    /// See [`Self::prompt`].
    pub async fn title_for(&self, conversation_seed: &str) -> Result<String> {
        let raw = self
            .prompt(&format!(
                "Suggest a short conversation title (max 6 words, no punctuation at the end) for this exchange:\n{conversation_seed}"
            ))
            .await?;
        Ok(truncate_chars(raw.trim(), 50))
    }

    /// Synthesise a short title for one queued message, truncated to 30
    /// characters.
    ///
    /// # Errors
    ///
    /// See [`Self::prompt`].
    pub async fn queued_message_title(&self, message: &str) -> Result<String> {
        let raw = self
            .prompt(&format!(
                "Suggest a short label (max 4 words) summarising this queued instruction:\n{message}"
            ))
            .await?;
        Ok(truncate_chars(raw.trim(), 30))
    }

    /// Rewrite a user prompt into a clearer, more explicit version.
    ///
    /// # Errors
    ///
    /// See [`Self::prompt`].
    pub async fn polish_prompt(&self, message: &str) -> Result<String> {
        let raw = self
            .prompt(&format!(
                "Rewrite the following instruction to be clearer and more explicit, keeping its intent unchanged. Reply with only the rewritten instruction:\n{message}"
            ))
            .await?;
        Ok(raw.trim().to_owned())
    }

    /// Synthesise a follow-up suggestion list for a completed turn.
    /// Malformed model output degrades to an empty list rather than an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying [`Self::prompt`] call fails
    /// (transport/timeout); a parse failure is not treated as an error.
    pub async fn extract_follow_ups(&self, conversation_seed: &str) -> Result<Vec<FollowUpSuggestion>> {
        let raw = self
            .prompt(&format!(
                "Suggest up to 3 short follow-up actions for this exchange, as a JSON array of objects with \"label\" and \"value\" fields and nothing else:\n{conversation_seed}"
            ))
            .await?;
        Ok(serde_json::from_str(raw.trim()).unwrap_or_default())
    }
}

async fn handle_inbound(
    message: InboundMessage,
    buffer: &Arc<Mutex<String>>,
    completion: &Arc<Mutex<Option<oneshot::Sender<()>>>>,
    writer: &AcpWriter,
) {
    match message {
        InboundMessage::Notification { method, params } if method == "session/update" => {
            let Some(params) = params else { return };
            let Some(update_value) = params.get("update").cloned() else {
                return;
            };
            if let Ok(SessionUpdate::AgentMessageChunk { content }) =
                serde_json::from_value::<SessionUpdate>(update_value)
            {
                buffer.lock().await.push_str(content.text());
            }
        }
        InboundMessage::Notification { method, .. }
            if method == "session/promptComplete" || method == "prompt/complete" =>
        {
            if let Some(tx) = completion.lock().await.take() {
                let _ = tx.send(());
            }
        }
        InboundMessage::AgentRequest { id, method, params } => match method.as_str() {
            "permission/request" => respond_permission(params, writer).await,
            "fs/readTextFile" => {
                let _ = writer.send_response(id, serde_json::Value::Null).await;
            }
            "session/promptComplete" | "prompt/complete" => {
                if let Some(tx) = completion.lock().await.take() {
                    let _ = tx.send(());
                }
            }
            _ => {}
        },
        InboundMessage::Response { .. } => {}
    }
}

/// Auto-approve read-flavored permission requests, auto-deny write-flavored
/// ones: reads are allowed, writes are denied. Classification is a
/// best-effort keyword match over the request's title/description since ACP
/// does not carry a structured read/write discriminator on the permission
/// payload itself.
async fn respond_permission(params: Option<serde_json::Value>, writer: &AcpWriter) {
    let Some(params) = params else { return };
    let request_id = params
        .get("requestId")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let title = params
        .get("title")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let description = params
        .get("description")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let options: Vec<PermissionOption> = params
        .get("options")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let haystack = format!("{title} {description}").to_lowercase();
    let looks_like_write = ["write", "edit", "delete", "create", "modify"]
        .iter()
        .any(|kw| haystack.contains(kw));

    let chosen = if looks_like_write {
        options
            .iter()
            .find(|o| ["reject", "deny", "decline"].iter().any(|kw| o.option_id.to_lowercase().contains(kw)))
    } else {
        options
            .iter()
            .find(|o| ["allow", "accept", "approve"].iter().any(|kw| o.option_id.to_lowercase().contains(kw)))
            .or_else(|| options.first())
    };

    let option_id = chosen.map(|o| o.option_id.clone());
    let _ = writer
        .send_notification(
            "prompt/respondPermission",
            Some(json!({ "requestId": request_id, "optionId": option_id })),
        )
        .await;
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        let truncated = truncate_chars("hello world", 5);
        assert_eq!(truncated, "hello");
    }

    #[test]
    fn malformed_follow_up_json_is_not_fatal() {
        let parsed: Vec<FollowUpSuggestion> = serde_json::from_str("not json").unwrap_or_default();
        assert!(parsed.is_empty());
    }
}
