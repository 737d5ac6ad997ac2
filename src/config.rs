//! Global configuration: parsing, validation, and environment overrides.
//!
//! A single validated struct loaded from TOML, plus environment-variable
//! overrides applied after parse: workspaces, listener ports, the scanner
//! defense thresholds (C9), the message hooks directory (C10), and the
//! auxiliary agent profile (C7).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::session::Workspace;
use crate::{AppError, Result};

/// Which shape of ACP content block this broker emits on outbound prompts.
///
/// Both shapes are always accepted on read regardless of this setting.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlockShape {
    /// `{"type": "text", "text": "..."}`
    #[default]
    Flat,
    /// `{"type": "text", "content": {"text": "..."}}`
    Nested,
}

/// ACP transport tuning (C2).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AcpConfig {
    /// Longest accepted inbound NDJSON line before the connection fails
    /// with `ProtocolError`.
    pub max_line_bytes: usize,
    /// Grace period between `SIGTERM` and `SIGKILL` on teardown.
    pub teardown_grace_seconds: u64,
    /// Shape of outbound content blocks.
    pub content_block_shape: ContentBlockShape,
}

impl Default for AcpConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 2 * 1024 * 1024,
            teardown_grace_seconds: 2,
            content_block_shape: ContentBlockShape::default(),
        }
    }
}

impl AcpConfig {
    /// The configured teardown grace period as a [`Duration`].
    #[must_use]
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_secs(self.teardown_grace_seconds)
    }
}

/// Session manager limits and resume behavior (C5).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SessionConfig {
    /// Maximum number of concurrently live sessions.
    pub max_sessions: usize,
    /// Bound on a per-session prompt queue (C4).
    pub queue_capacity: usize,
    /// Number of trailing journal events to replay as a synthetic priming
    /// prompt on resume; `None` (the default) performs no priming, leaving
    /// the documented "agent has no memory of prior turns" behavior intact.
    pub resume_priming_events: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            queue_capacity: crate::models::prompt::DEFAULT_QUEUE_CAPACITY,
            resume_priming_events: None,
        }
    }
}

/// Auxiliary agent configuration (C7).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AuxiliaryConfig {
    /// Agent profile name used to spawn the shared utility session.
    pub agent_profile: String,
    /// Shell command template used to launch the utility agent.
    pub agent_command: String,
    /// Per-request timeout for utility prompts.
    pub request_timeout_seconds: u64,
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            agent_profile: "default".to_owned(),
            agent_command: String::new(),
            request_timeout_seconds: 20,
        }
    }
}

impl AuxiliaryConfig {
    /// The configured per-request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Scanner defense thresholds (C9).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct ScannerConfig {
    /// Whether the external listener is wrapped by scanner defense at all.
    pub enabled: bool,
    /// Size of the per-IP ring buffer of recent requests.
    pub ring_buffer_size: usize,
    /// Window (seconds) the rate limit is evaluated over.
    pub rate_window_seconds: u64,
    /// Requests within `rate_window_seconds` that trigger a block.
    pub rate_limit: u32,
    /// Minimum total requests before the error-rate rule can trigger.
    pub min_requests_for_error_rate: u32,
    /// Error rate (`0.0..=1.0`) that triggers a block once
    /// `min_requests_for_error_rate` is met.
    pub error_rate_threshold: f64,
    /// Suspicious-path hits that trigger a block.
    pub suspicious_path_threshold: u32,
    /// Duration a block remains in effect.
    pub block_duration_seconds: u64,
    /// How often the background pruning task sweeps expired entries.
    pub prune_interval_seconds: u64,
    /// CIDR ranges exempt from accounting and blocking. Localhost is always
    /// implied in addition to this list.
    pub whitelist_cidrs: Vec<String>,
    /// Path prefixes treated as scanner signatures.
    pub suspicious_path_prefixes: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ring_buffer_size: 200,
            rate_window_seconds: 60,
            rate_limit: 120,
            min_requests_for_error_rate: 20,
            error_rate_threshold: 0.5,
            suspicious_path_threshold: 3,
            block_duration_seconds: 24 * 60 * 60,
            prune_interval_seconds: 5 * 60,
            whitelist_cidrs: Vec::new(),
            suspicious_path_prefixes: vec![
                "/.env".to_owned(),
                "/.git/".to_owned(),
                "/wp-admin".to_owned(),
                "/wp-login.php".to_owned(),
                "/.aws/".to_owned(),
                "/phpmyadmin".to_owned(),
                "/.ssh/".to_owned(),
                "/xmlrpc.php".to_owned(),
            ],
        }
    }
}

/// Message hooks pipeline configuration (C10).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct HooksConfig {
    /// Directory discovery walks recursively for `*.yaml` hook manifests.
    pub directory: PathBuf,
    /// Default per-hook timeout when a manifest omits one.
    pub default_timeout_seconds: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("hooks"),
            default_timeout_seconds: 10,
        }
    }
}

/// Up/down lifecycle hook commands (C8).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", default)]
pub struct LifecycleConfig {
    /// Shell command run asynchronously at startup; `${PORT}` is expanded.
    pub up_hook: Option<String>,
    /// Shell command run synchronously during shutdown.
    pub down_hook: Option<String>,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ListenerConfig {
    /// Loopback-bound port serving trusted (local) clients.
    pub port: u16,
    /// Externally reachable port, wrapped by scanner defense.
    pub port_external: Option<u16>,
    /// Base path every endpoint is nested under.
    pub base_path: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 7997,
            port_external: None,
            base_path: "/mitto".to_owned(),
        }
    }
}

/// Global configuration parsed from `settings.json`/`config.toml` plus
/// environment overrides.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Directory the broker persists its on-disk state under.
    pub data_dir: PathBuf,
    /// Registered workspaces, keyed by working directory.
    pub workspaces: Vec<Workspace>,
    /// Name of the default workspace, if one is designated.
    pub default_workspace: Option<String>,
    /// ACP transport tuning.
    pub acp: AcpConfig,
    /// Session manager limits.
    pub session: SessionConfig,
    /// Auxiliary agent settings.
    pub auxiliary: AuxiliaryConfig,
    /// Scanner defense thresholds.
    pub scanner: ScannerConfig,
    /// Message hooks pipeline settings.
    pub hooks: HooksConfig,
    /// Up/down lifecycle hooks.
    pub lifecycle: LifecycleConfig,
    /// Network listeners.
    pub listener: ListenerConfig,
    /// Whether to auto-approve every permission request (debug/dev mode).
    pub auto_approve: bool,
    /// Extra environment variables forwarded to spawned subprocesses.
    pub env: HashMap<String, String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            workspaces: Vec::new(),
            default_workspace: None,
            acp: AcpConfig::default(),
            session: SessionConfig::default(),
            auxiliary: AuxiliaryConfig::default(),
            scanner: ScannerConfig::default(),
            hooks: HooksConfig::default(),
            lifecycle: LifecycleConfig::default(),
            listener: ListenerConfig::default(),
            auto_approve: false,
            env: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(&path).map_err(|err| {
            AppError::Config(format!(
                "failed to read config {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MITTO_DIR`, `MITTO_TEST_MODE`, `MITTO_ACP_SERVER`, and
    /// `MITTO_WORK_DIR` overrides, letting the environment win over the
    /// file for deployment-specific values.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MITTO_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if std::env::var("MITTO_TEST_MODE").is_ok() {
            self.session.max_sessions = self.session.max_sessions.max(4);
            self.scanner.enabled = false;
        }
        if let (Ok(profile), Ok(work_dir)) =
            (std::env::var("MITTO_ACP_SERVER"), std::env::var("MITTO_WORK_DIR"))
        {
            self.default_workspace = Some(profile.clone());
            if !self.workspaces.iter().any(|w| w.agent_profile == profile) {
                self.workspaces.push(Workspace {
                    working_dir: PathBuf::from(work_dir),
                    agent_profile: profile,
                    agent_command: self.auxiliary.agent_command.clone(),
                });
            }
        }
    }

    /// Resolve the `MITTORC` path, defaulting to `./.mittorc` if unset.
    #[must_use]
    pub fn rc_path() -> PathBuf {
        std::env::var("MITTORC").map_or_else(|_| PathBuf::from(".mittorc"), PathBuf::from)
    }

    /// Look up a registered workspace by its working directory.
    #[must_use]
    pub fn workspace_for_dir(&self, dir: &Path) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.working_dir == dir)
    }

    /// The designated default workspace, if any.
    #[must_use]
    pub fn default_workspace(&self) -> Option<&Workspace> {
        let name = self.default_workspace.as_ref()?;
        self.workspaces.iter().find(|w| &w.agent_profile == name)
    }

    fn validate(&mut self) -> Result<()> {
        if self.session.max_sessions == 0 {
            return Err(AppError::Config(
                "session.max_sessions must be greater than zero".into(),
            ));
        }
        if self.session.queue_capacity == 0 {
            return Err(AppError::Config(
                "session.queue_capacity must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.scanner.error_rate_threshold) {
            return Err(AppError::Config(
                "scanner.error_rate_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        for cidr in &self.scanner.whitelist_cidrs {
            cidr.parse::<ipnet::IpNet>().map_err(|err| {
                AppError::Config(format!(
                    "invalid scanner.whitelist_cidrs entry {cidr}: {err}"
                ))
            })?;
        }
        Ok(())
    }
}
