//! JSON-RPC 2.0 envelope and ACP-specific payload shapes.
//!
//! The wire format is newline-delimited JSON-RPC 2.0: a request carries
//! `id`; a notification omits it. Responses are correlated back to pending
//! requests by `id` in [`super::reader`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version tag, always `"2.0"`.
pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound JSON-RPC request (has an `id`, expects a response).
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlates the eventual response.
    pub id: u64,
    /// RPC method name, e.g. `"session/prompt"`.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request with the next id from the caller's counter.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// An outbound JSON-RPC notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// RPC method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Build a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured data.
    #[serde(default)]
    pub data: Option<Value>,
}

/// A message read from the agent's stdout: either a response to one of our
/// requests, or an agent-originated request/notification.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// A response (success or error) to a request we sent.
    Response {
        /// The id we assigned when sending the original request.
        id: u64,
        /// `Ok` payload or `Err` RPC error.
        result: std::result::Result<Value, RpcError>,
    },
    /// A request originating from the agent, expecting a response
    /// (e.g. `fs/readTextFile`).
    AgentRequest {
        /// Agent-assigned id to echo back in our response.
        id: Value,
        /// Method name.
        method: String,
        /// Parameters.
        params: Option<Value>,
    },
    /// A notification originating from the agent (e.g. `session/update`).
    Notification {
        /// Method name.
        method: String,
        /// Parameters.
        params: Option<Value>,
    },
}

/// Parse one NDJSON line into an [`InboundMessage`].
///
/// Returns `None` for a line that does not parse as a JSON-RPC 2.0 envelope
/// at all (the caller logs and skips it).
#[must_use]
pub fn parse_inbound(line: &str) -> Option<InboundMessage> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        let params = obj.get("params").cloned();
        return Some(match obj.get("id") {
            Some(id) => InboundMessage::AgentRequest {
                id: id.clone(),
                method: method.to_owned(),
                params,
            },
            None => InboundMessage::Notification {
                method: method.to_owned(),
                params,
            },
        });
    }

    let id = obj.get("id").and_then(Value::as_u64)?;
    if let Some(err) = obj.get("error") {
        let rpc_err: RpcError = serde_json::from_value(err.clone()).ok()?;
        return Some(InboundMessage::Response {
            id,
            result: Err(rpc_err),
        });
    }
    let result = obj.get("result").cloned().unwrap_or(Value::Null);
    Some(InboundMessage::Response {
        id,
        result: Ok(result),
    })
}

/// Content block accepted on read in either shape: flat
/// (`{"type":"text","text":...}`) or nested
/// (`{"type":"text","content":{"text":...}}`). Always emitted flat.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    /// `{"type": "text", "text": "..."}`.
    Flat {
        /// Block kind, expected to be `"text"`.
        #[serde(rename = "type")]
        kind: String,
        /// Text payload.
        text: String,
    },
    /// `{"type": "text", "content": {"text": "..."}}`.
    Nested {
        /// Block kind, expected to be `"text"`.
        #[serde(rename = "type")]
        kind: String,
        /// Nested text payload.
        content: NestedText,
    },
}

/// The `content` object of a [`ContentBlock::Nested`].
#[derive(Debug, Clone, Deserialize)]
pub struct NestedText {
    /// Text payload.
    pub text: String,
}

impl ContentBlock {
    /// Extract the text regardless of which shape was received.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Flat { text, .. } => text,
            Self::Nested { content, .. } => &content.text,
        }
    }

    /// Build the flat shape for an outbound text block, the only shape this
    /// broker emits regardless of `content_block_shape`'s nested option.
    #[must_use]
    pub fn flat_text(text: impl Into<String>) -> Value {
        serde_json::json!({ "type": "text", "text": text.into() })
    }

    /// Build the nested shape for an outbound text block.
    #[must_use]
    pub fn nested_text(text: impl Into<String>) -> Value {
        serde_json::json!({ "type": "text", "content": { "text": text.into() } })
    }
}

/// The tagged union carried by an agent's `session/update` notification.
/// The discriminator field is `sessionUpdate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "camelCase")]
pub enum SessionUpdate {
    /// A chunk of agent-authored reply text.
    AgentMessageChunk {
        /// Content of the chunk.
        content: ContentBlock,
    },
    /// A chunk of agent reasoning/thought text.
    AgentThoughtChunk {
        /// Content of the chunk.
        content: ContentBlock,
    },
    /// A new tool invocation.
    ToolCall {
        /// Opaque tool-call identifier assigned by the agent.
        tool_call_id: String,
        /// Free-form payload describing the call.
        #[serde(flatten)]
        payload: Value,
    },
    /// An update to a previously reported tool call.
    ToolCallUpdate {
        /// Identifier of the tool call being updated.
        tool_call_id: String,
        /// Free-form payload describing the update.
        #[serde(flatten)]
        payload: Value,
    },
    /// A plan/step-list update.
    Plan {
        /// Free-form plan payload.
        #[serde(flatten)]
        payload: Value,
    },
    /// The agent's current mode changed.
    CurrentModeUpdate {
        /// New mode identifier.
        #[serde(rename = "modeId")]
        mode_id: String,
    },
}
