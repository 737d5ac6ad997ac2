#![forbid(unsafe_code)]

//! `mitto` — multi-client ACP session broker binary.
//!
//! Bootstraps configuration, the event journal, the session manager, the
//! auxiliary agent, the message hooks watcher, and the scanner defense, then
//! serves the client hub's loopback (and optionally external) listeners
//! until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mitto::aux::agent::AuxiliaryAgent;
use mitto::config::GlobalConfig;
use mitto::hooks::discovery::HookWatcher;
use mitto::hub::server::{self, HubState};
use mitto::lifecycle::hooks as lifecycle_hooks;
use mitto::lifecycle::shutdown::ShutdownManager;
use mitto::models::session::Workspace;
use mitto::persistence::atomic::write_json_atomic;
use mitto::persistence::journal::JournalStore;
use mitto::scanner::defense::ScannerDefense;
use mitto::session::manager::SessionManager;
use mitto::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mitto", about = "Multi-client ACP session broker", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the broker's HTTP/WebSocket server.
    Web(WebArgs),
    /// Placeholder for an interactive terminal client.
    ///
    /// A real TUI is out of scope here; this exists so `mitto cli` fails
    /// with a clear message instead of clap's "unknown subcommand".
    Cli,
}

#[derive(Debug, Args)]
struct WebArgs {
    /// Path to the TOML configuration file. Missing file falls back to
    /// built-in defaults rather than a fatal error.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Agent profile to register or select as the default workspace.
    #[arg(long)]
    acp: Option<String>,

    /// Register a workspace as `<profile>:<path>`; repeatable.
    #[arg(long = "dir", value_name = "PROFILE:PATH")]
    dirs: Vec<String>,

    /// Override the loopback listener port.
    #[arg(long)]
    port: Option<u16>,

    /// Override (or enable) the externally reachable listener port.
    #[arg(long)]
    port_external: Option<u16>,

    /// Auto-approve every permission request instead of routing it to a
    /// connected client.
    #[arg(long)]
    auto_approve: bool,

    /// Shorthand for `--log-format text` plus a `debug` default tracing
    /// filter.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Cli => {
            eprintln!(
                "mitto cli: no interactive terminal client is bundled with this binary; \
                 connect a WebSocket client to the broker's /sessions/{{id}}/ws endpoint instead."
            );
            std::process::exit(2);
        }
        Command::Web(args) => {
            init_tracing(args.log_format, args.debug)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
                .block_on(run(args))
        }
    }
}

/// Maximum time to wait for graceful shutdown before force-exiting.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[allow(clippy::too_many_lines)] // Startup sequence is inherently sequential.
async fn run(args: WebArgs) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match std::fs::read_to_string(&args.config) {
        Ok(raw) => GlobalConfig::from_toml_str(&raw)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %args.config.display(), "no config file found, using defaults");
            GlobalConfig::from_toml_str("")?
        }
        Err(err) => {
            return Err(AppError::Config(format!(
                "cannot read config file '{}': {err}",
                args.config.display()
            )))
        }
    };

    apply_cli_overrides(&mut config, &args)?;
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|err| AppError::Config(format!("cannot create data directory: {err}")))?;
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Event journal (C1) ───────────────────────────────
    let journal = Arc::new(JournalStore::new(config.data_dir.join("sessions")));

    // ── Workspace registry persistence ───────────────────
    let workspaces_path = config.data_dir.join("workspaces.json");
    let persist_workspaces: mitto::session::manager::WorkspacePersistCallback = {
        let workspaces_path = workspaces_path.clone();
        Arc::new(move |workspaces: &[Workspace]| {
            if let Err(err) = write_json_atomic(&workspaces_path, &workspaces) {
                warn!(%err, "failed to persist workspace registry");
            }
        })
    };

    // ── Session manager (C5) ─────────────────────────────
    let session_manager = Arc::new(SessionManager::new(
        Arc::clone(&journal),
        config.acp.clone(),
        config.session.clone(),
        config.workspaces.clone(),
        config.default_workspace.clone(),
        Some(persist_workspaces),
    ));

    // ── Auxiliary agent (C7) ──────────────────────────────
    let auxiliary_workspace = config
        .default_workspace()
        .map_or_else(|| PathBuf::from("."), |ws| ws.working_dir.clone());
    let auxiliary = Arc::new(AuxiliaryAgent::new(
        config.auxiliary.clone(),
        auxiliary_workspace,
        config.acp.max_line_bytes,
    ));

    // ── Message hooks pipeline (C10) ──────────────────────
    let hook_watcher = Arc::new(HookWatcher::new());
    let hooks_dir = config.data_dir.join(&config.hooks.directory);
    hook_watcher.register(&hooks_dir).await?;

    // ── Scanner defense (C9) ──────────────────────────────
    let scanner = Arc::new(ScannerDefense::new(
        config.scanner.clone(),
        config.data_dir.join("blocklist.json"),
    ));
    if config.scanner.enabled {
        scanner.spawn_pruner();
    }

    // ── Shutdown coordination (C8) ─────────────────────────
    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let shutdown_manager = Arc::new(ShutdownManager::new(
        config.lifecycle.down_hook.clone(),
        working_dir.clone(),
        config.listener.port,
        config.acp.teardown_grace(),
    ));

    if let Some(command) = &config.lifecycle.up_hook {
        let grouped = lifecycle_hooks::start_up_hook(command, config.listener.port, &working_dir)?;
        shutdown_manager.track_up_hook(grouped).await;
        info!("up hook started");
    }

    let scanner_for_cleanup = Arc::clone(&scanner);
    shutdown_manager
        .register_cleanup(Box::new(move || {
            let scanner = Arc::clone(&scanner_for_cleanup);
            Box::pin(async move {
                scanner.persist().await;
            })
        }))
        .await;

    // ── Client hub (C6) ───────────────────────────────────
    let hub_state = HubState::new(
        Arc::clone(&session_manager),
        Arc::clone(&auxiliary),
        hook_watcher.cache().clone(),
        std::time::Duration::from_secs(config.hooks.default_timeout_seconds),
        args.auto_approve || config.auto_approve,
    );
    let app = server::router(hub_state, &config.listener.base_path);

    let shutdown_token = CancellationToken::new();

    let loopback_handle = {
        let app = app.clone();
        let port = config.listener.port;
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(err) = server::serve_loopback(app, port, shutdown_token.clone()).await {
                error!(%err, "loopback listener failed — initiating shutdown");
                shutdown_token.cancel();
            }
        })
    };

    let external_handle = config.listener.port_external.map(|port| {
        let app = app.clone();
        let scanner = Arc::clone(&scanner);
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(err) = server::serve_external(app, port, scanner, shutdown_token.clone()).await {
                error!(%err, "external listener failed — initiating shutdown");
                shutdown_token.cancel();
            }
        })
    });

    info!(
        port = config.listener.port,
        port_external = ?config.listener.port_external,
        "mitto broker ready"
    );

    // ── Wait for first shutdown signal ────────────────────
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received — starting graceful shutdown");
        }
        () = shutdown_token.cancelled() => {
            info!("a listener failed — starting graceful shutdown");
        }
    }
    shutdown_token.cancel();

    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    let shutdown_fut = async {
        shutdown_manager.shutdown("signal").await;
        let _ = loopback_handle.await;
        if let Some(handle) = external_handle {
            let _ = handle.await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_fut)
        .await
        .is_err()
    {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }

    info!("mitto shut down");
    Ok(())
}

/// Apply `--acp`/`--dir`/`--port`/`--port-external`/`--auto-approve`
/// overrides on top of the loaded file configuration.
fn apply_cli_overrides(config: &mut GlobalConfig, args: &WebArgs) -> Result<()> {
    for entry in &args.dirs {
        let (profile, path) = entry.split_once(':').ok_or_else(|| {
            AppError::Config(format!("--dir expects PROFILE:PATH, got '{entry}'"))
        })?;
        let agent_command = config
            .workspaces
            .iter()
            .find(|w| w.agent_profile == profile)
            .map_or_else(String::new, |w| w.agent_command.clone());
        let workspace = Workspace {
            working_dir: PathBuf::from(path),
            agent_profile: profile.to_owned(),
            agent_command,
        };
        if let Some(existing) = config
            .workspaces
            .iter_mut()
            .find(|w| w.agent_profile == profile)
        {
            *existing = workspace;
        } else {
            config.workspaces.push(workspace);
        }
    }

    if let Some(profile) = &args.acp {
        config.default_workspace = Some(profile.clone());
    }
    if let Some(port) = args.port {
        config.listener.port = port;
    }
    if let Some(port_external) = args.port_external {
        config.listener.port_external = Some(port_external);
    }
    if args.auto_approve {
        config.auto_approve = true;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
