//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Each variant maps to a specific HTTP status or WebSocket close behavior
/// at the hub boundary; see [`AppError::status_code`].
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure. Fatal at startup.
    Config(String),
    /// I/O failure in the event journal or metadata store. Surfaced to the
    /// client; never crashes the broker.
    Storage(String),
    /// ACP framing or subprocess death. The owning session transitions to
    /// `dead`.
    Transport(String),
    /// Malformed ACP payload. Logged and skipped; fatal only if persistent.
    Protocol(String),
    /// The per-session prompt queue is at capacity.
    QueueFull,
    /// The session manager is already at `MaxSessions`.
    TooManySessions,
    /// Requested entity (session, prompt, workspace, permission request)
    /// does not exist.
    NotFound(String),
    /// The remote peer is on the scanner-defense blocklist.
    Blocked,
    /// A message hook failed and its `on_error` policy is `fail`.
    Hook(String),
    /// The operation was cancelled before completion.
    Cancelled,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::QueueFull => write!(f, "prompt queue is full"),
            Self::TooManySessions => write!(f, "session cap reached"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Blocked => write!(f, "remote address is blocked"),
            Self::Hook(msg) => write!(f, "hook: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("json: {err}"))
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Storage(format!("file watcher: {err}"))
    }
}

impl From<serde_yaml_ng::Error> for AppError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        Self::Hook(format!("invalid hook manifest: {err}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Storage(format!("background task panicked: {err}"))
    }
}

impl AppError {
    /// HTTP status code this error maps to at the REST/WS boundary.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::QueueFull => 409,
            Self::Blocked => 429,
            Self::TooManySessions => 503,
            Self::Config(_)
            | Self::Storage(_)
            | Self::Transport(_)
            | Self::Protocol(_)
            | Self::Hook(_)
            | Self::Cancelled => 500,
        }
    }
}

/// Maps an [`AppError`] to a REST status code: `404`, `409`, `429`, `503`,
/// `500` for everything else, each carrying
/// `{"error": {"message": "..."}}`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({ "error": { "message": self.to_string() } });
        (status, axum::Json(body)).into_response()
    }
}
