//! Applies discovered message hooks to an outbound user prompt (spec
//! §4.10).
//!
//! Hook processes are spawned directly (not via `acp::spawner::spawn_grouped`
//! — hooks are short request/response utilities, not long-running agent
//! connections) but reuse its environment-allowlist discipline, since a
//! hook command is just as untrusted-by-default as the agent process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::acp::spawner::ALLOWED_ENV_VARS;
use crate::models::hook::{
    HookErrorPolicy, HookInput, HookInputMode, HookOutput, HookOutputMode, HookSpec,
};
use crate::{AppError, Result};

/// Result of running the full hook pipeline over one outbound message.
pub struct PipelineOutcome {
    /// The (possibly transformed) message to send to the agent.
    pub message: String,
    /// Attachment identifiers contributed by any hook.
    pub attachments: Vec<String>,
}

/// Run every applicable hook, in priority order, over `message`.
///
/// # Errors
///
/// Returns the first `AppError::Hook` raised by a hook whose `on_error`
/// policy is `fail`. Hooks whose policy is `skip` are logged and ignored.
pub async fn run_pipeline(
    hooks: &[HookSpec],
    message: String,
    prompt_index: usize,
    workspace_dir: &Path,
    default_timeout: Duration,
) -> Result<PipelineOutcome> {
    let mut applicable: Vec<&HookSpec> = hooks
        .iter()
        .filter(|h| h.applies_to_turn(prompt_index) && h.applies_to_workspace(workspace_dir))
        .collect();
    applicable.sort_by_key(|h| h.priority);

    let mut running = message;
    let mut attachments = Vec::new();

    for hook in applicable {
        match run_one(hook, &running, workspace_dir, default_timeout).await {
            Ok(Some(output)) => {
                attachments.extend(output.attachments);
                apply_output(hook, output.message, &mut running);
            }
            Ok(None) => {}
            Err(err) => match hook.on_error {
                HookErrorPolicy::Skip => {
                    warn!(hook = %hook.name, %err, "message hook failed, skipping");
                }
                HookErrorPolicy::Fail => return Err(err),
            },
        }
    }

    Ok(PipelineOutcome {
        message: running,
        attachments,
    })
}

fn apply_output(hook: &HookSpec, text: Option<String>, running: &mut String) {
    let Some(text) = text else { return };
    match hook.output_mode {
        HookOutputMode::Transform => *running = text,
        HookOutputMode::Prepend => *running = format!("{text}\n{running}"),
        HookOutputMode::Append => *running = format!("{running}\n{text}"),
        HookOutputMode::Discard => {}
    }
}

async fn run_one(
    hook: &HookSpec,
    message: &str,
    workspace_dir: &Path,
    default_timeout: Duration,
) -> Result<Option<HookOutput>> {
    let mut cmd = tokio::process::Command::new(&hook.command);
    cmd.args(&hook.args);
    cmd.current_dir(
        hook.working_dir
            .clone()
            .unwrap_or_else(|| workspace_dir.to_path_buf()),
    );
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    for (key, val) in &hook.env {
        cmd.env(key, val);
    }
    cmd.stdin(if hook.input_mode == HookInputMode::None {
        Stdio::null()
    } else {
        Stdio::piped()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Hook(format!("failed to spawn hook {}: {err}", hook.name)))?;

    if hook.input_mode != HookInputMode::None {
        let input = HookInput {
            message: message.to_owned(),
            conversation: None,
        };
        let payload = serde_json::to_vec(&input)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| AppError::Hook(format!("failed to write hook stdin for {}: {err}", hook.name)))?;
        }
    }

    let timeout = hook
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);

    let wait_result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    let output = match wait_result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(AppError::Hook(format!("hook {} failed: {err}", hook.name)));
        }
        Err(_) => {
            return Err(AppError::Hook(format!("hook {} timed out", hook.name)));
        }
    };

    if !output.status.success() {
        return Err(AppError::Hook(format!(
            "hook {} exited with {}",
            hook.name, output.status
        )));
    }

    if hook.output_mode == HookOutputMode::Discard {
        return Ok(None);
    }

    let parsed: HookOutput = serde_json::from_slice(&output.stdout).map_err(|err| {
        AppError::Hook(format!("hook {} produced invalid JSON: {err}", hook.name))
    })?;
    if let Some(err) = &parsed.error {
        return Err(AppError::Hook(format!(
            "hook {} reported error: {err}",
            hook.name
        )));
    }
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hook::{HookPosition, HookTrigger};
    use std::path::PathBuf;

    fn base_hook(name: &str, command: &str, args: Vec<String>) -> HookSpec {
        HookSpec {
            name: name.to_owned(),
            trigger: HookTrigger::All,
            position: HookPosition::Append,
            priority: 0,
            command: command.to_owned(),
            args,
            input_mode: HookInputMode::Message,
            output_mode: HookOutputMode::Transform,
            timeout_seconds: Some(5),
            working_dir: None,
            env: std::collections::HashMap::new(),
            on_error: HookErrorPolicy::Skip,
            workspaces: Vec::new(),
            manifest_path: PathBuf::new(),
        }
    }

    #[tokio::test]
    async fn transform_hook_replaces_message() {
        let script = r#"import sys, json; print(json.dumps({"message": "replaced"}))"#;
        let hook = base_hook("transform", "python3", vec!["-c".into(), script.into()]);

        let outcome = run_pipeline(&[hook], "original".into(), 0, Path::new("."), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.message, "replaced");
    }

    #[tokio::test]
    async fn failing_hook_with_skip_policy_preserves_message() {
        let mut hook = base_hook("broken", "false", vec![]);
        hook.on_error = HookErrorPolicy::Skip;

        let outcome = run_pipeline(&[hook], "original".into(), 0, Path::new("."), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.message, "original");
    }

    #[tokio::test]
    async fn failing_hook_with_fail_policy_aborts_pipeline() {
        let mut hook = base_hook("broken", "false", vec![]);
        hook.on_error = HookErrorPolicy::Fail;

        let result = run_pipeline(&[hook], "original".into(), 0, Path::new("."), Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[test]
    fn first_trigger_only_matches_the_opening_turn() {
        let mut hook = base_hook("first-only", "/bin/true", vec![]);
        hook.trigger = HookTrigger::First;
        assert!(hook.applies_to_turn(0));
        assert!(!hook.applies_to_turn(1));
    }
}
