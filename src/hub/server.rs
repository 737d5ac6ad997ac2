//! Router assembly and listener bootstrap for the client hub.
//!
//! Each listener binds a `TcpListener`, `axum::serve`s the router, and wires
//! `with_graceful_shutdown` to the same broker-wide cancellation signal
//! every other long-lived task watches.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aux::agent::AuxiliaryAgent;
use crate::hooks::discovery::HookCache;
use crate::hub::listener::FilteredListener;
use crate::scanner::defense::{self, ScannerDefense};
use crate::session::manager::SessionManager;
use crate::{AppError, Result};

/// Shared state threaded through every hub handler.
#[derive(Clone)]
pub struct HubState {
    /// Session lifecycle, workspace routing, and queues.
    pub session_manager: Arc<SessionManager>,
    /// Shared utility agent for title/polish/follow-up synthesis.
    pub auxiliary: Arc<AuxiliaryAgent>,
    /// Currently discovered outbound message hooks.
    pub hook_cache: HookCache,
    /// Default per-hook timeout for manifests that omit one.
    pub hooks_default_timeout: Duration,
    /// Whether permission requests are answered automatically rather than
    /// routed to a connected client (`--auto-approve`).
    pub auto_approve: bool,
    /// Per-session count of prompts submitted so far, used to classify a
    /// turn as the opening one for `first`-triggered hooks.
    prompt_counters: Arc<RwLock<HashMap<String, usize>>>,
}

impl HubState {
    /// Construct hub state with an empty prompt-index counter table.
    #[must_use]
    pub fn new(
        session_manager: Arc<SessionManager>,
        auxiliary: Arc<AuxiliaryAgent>,
        hook_cache: HookCache,
        hooks_default_timeout: Duration,
        auto_approve: bool,
    ) -> Self {
        Self {
            session_manager,
            auxiliary,
            hook_cache,
            hooks_default_timeout,
            auto_approve,
            prompt_counters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return this turn's zero-based prompt index for `session_id`, and
    /// advance the counter for next time.
    pub async fn next_prompt_index(&self, session_id: &str) -> usize {
        let mut counters = self.prompt_counters.write().await;
        let counter = counters.entry(session_id.to_owned()).or_insert(0);
        let index = *counter;
        *counter += 1;
        index
    }

    /// Fire-and-forget a background title synthesis for a freshly queued
    /// message: rename the session on its first prompt, and label the
    /// queued item itself either way. Failures are logged and otherwise
    /// swallowed — this is a cosmetic enhancement, not load-bearing.
    pub fn spawn_title_synthesis(&self, session_id: String, message_id: String, text: String) {
        let auxiliary = Arc::clone(&self.auxiliary);
        let session_manager = Arc::clone(&self.session_manager);
        tokio::spawn(async move {
            let Some(queue) = session_manager.get_queue(&session_id).await else {
                return;
            };
            match auxiliary.queued_message_title(&text).await {
                Ok(title) => {
                    if queue.set_title(&message_id, title.clone()).await {
                        if let Some(session) = session_manager.get_session(&session_id).await {
                            session
                                .broadcast(crate::models::wire::ServerMessage::QueueTitle {
                                    message_id: message_id.clone(),
                                    title,
                                })
                                .await;
                        }
                    }
                }
                Err(err) => warn!(session_id, %err, "queued message title synthesis failed"),
            }

            let is_opening_turn = session_manager
                .session_metadata(&session_id)
                .await
                .is_ok_and(|meta| meta.name == "New session");
            if !is_opening_turn {
                return;
            }
            let Some(session) = session_manager.get_session(&session_id).await else {
                return;
            };
            match auxiliary.title_for(&text).await {
                Ok(title) if !title.is_empty() => {
                    if let Err(err) = session.rename(&title).await {
                        warn!(session_id, %err, "session title synthesis failed to persist");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(session_id, %err, "session title synthesis failed"),
            }
        });
    }
}

/// Build the hub's router, nested under `base_path`.
#[must_use]
pub fn router(state: HubState, base_path: &str) -> Router {
    let api = Router::new()
        .route(
            "/sessions",
            get(super::rest::list_sessions).post(super::rest::create_session),
        )
        .route(
            "/sessions/{id}",
            get(super::rest::get_session).delete(super::rest::delete_session),
        )
        .route(
            "/sessions/{id}/queue",
            get(super::rest::list_queue).post(super::rest::enqueue_message),
        )
        .route(
            "/sessions/{id}/queue/{mid}",
            axum::routing::delete(super::rest::remove_queued_message),
        )
        .route("/sessions/{id}/ws", get(super::connection::upgrade))
        .route("/workspaces", get(super::rest::list_workspaces))
        .with_state(state);

    Router::new().nest(base_path, api)
}

/// Serve the trusted, loopback-bound listener (no scanner defense).
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound or the server
/// exits with an I/O error.
pub async fn serve_loopback(app: Router, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind loopback listener on {addr}: {err}")))?;
    info!(%addr, "loopback listener started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("loopback listener error: {err}")))?;

    info!("loopback listener shut down");
    Ok(())
}

/// Serve the externally reachable listener.
///
/// A blocked peer is rejected at accept time by [`FilteredListener`], before
/// any HTTP parsing; the scanner defense middleware layered onto `app` only
/// records each completed response so later requests see fresh accounting.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound or the server
/// exits with an I/O error.
pub async fn serve_external(
    app: Router,
    port: u16,
    scanner: Arc<ScannerDefense>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = app.layer(axum::middleware::from_fn_with_state(
        Arc::clone(&scanner),
        defense::middleware,
    ));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind external listener on {addr}: {err}")))?;
    info!(%addr, "external listener started");
    let listener = FilteredListener::new(listener, scanner);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|err| AppError::Config(format!("external listener error: {err}")))?;

    info!("external listener shut down");
    Ok(())
}
