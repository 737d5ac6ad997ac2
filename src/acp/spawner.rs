//! Subprocess spawning and teardown for ACP agents and lifecycle hooks.
//!
//! The child is placed in its own process group so a single `SIGTERM`/
//! `SIGKILL` pair can reach every descendant it may have forked, not just
//! the immediate child.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::{AppError, Result};

/// Environment variables inherited by every spawned child in addition to
/// whatever the caller passes explicitly via `extra_env`. The environment
/// is cleared and rebuilt from this explicit allowlist rather than passed
/// through in full.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Tokenise a shell command template with shell-style quoting.
///
/// No globbing, no subshells, no `${PORT}`-style expansion — expansion is
/// the caller's concern and must happen before this is called.
///
/// # Errors
///
/// Returns `AppError::Config` if the template has unbalanced quoting.
pub fn tokenise_command(template: &str) -> Result<Vec<String>> {
    shell_words::split(template)
        .map_err(|err| AppError::Config(format!("invalid command template: {err}")))
}

/// Substitute `${PORT}` in a command template with a concrete port number.
#[must_use]
pub fn expand_port(template: &str, port: u16) -> String {
    template.replace("${PORT}", &port.to_string())
}

/// A spawned child placed in its own process group, with piped stdio.
pub struct GroupedChild {
    /// The child process handle.
    pub child: Child,
    /// Process group id (negate for `kill`/`killpg`-style targeting).
    pub pgid: i32,
}

/// Spawn `argv[0] argv[1..]` in `working_dir`, piping stdin/stdout and
/// inheriting stderr, in a fresh process group.
///
/// # Errors
///
/// Returns `AppError::Transport` if the OS spawn fails, or `AppError::Config`
/// if `argv` is empty.
pub fn spawn_grouped(
    argv: &[String],
    working_dir: &Path,
    extra_env: &HashMap<String, String>,
) -> Result<GroupedChild> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::Config("empty command template".into()))?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(working_dir);
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    for (key, val) in extra_env {
        cmd.env(key, val);
    }
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::inherit());
    cmd.kill_on_drop(true);

    place_in_new_group(&mut cmd);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Transport(format!("failed to spawn {program}: {err}")))?;

    let pgid = child
        .id()
        .map(|id| i32::try_from(id).unwrap_or(i32::MAX))
        .ok_or_else(|| AppError::Transport("spawned child has no pid".into()))?;

    Ok(GroupedChild { child, pgid })
}

/// Spawn `argv[0] argv[1..]` in `working_dir` with inherited stdio, in a
/// fresh process group. Used for lifecycle up/down hooks, which unlike the
/// ACP agent have no piped protocol of their own.
///
/// # Errors
///
/// Returns `AppError::Transport` if the OS spawn fails, or `AppError::Config`
/// if `argv` is empty.
pub fn spawn_grouped_inherited(
    argv: &[String],
    working_dir: &Path,
    extra_env: &HashMap<String, String>,
) -> Result<GroupedChild> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::Config("empty command template".into()))?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(working_dir);
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    for (key, val) in extra_env {
        cmd.env(key, val);
    }
    cmd.stdin(std::process::Stdio::inherit());
    cmd.stdout(std::process::Stdio::inherit());
    cmd.stderr(std::process::Stdio::inherit());
    cmd.kill_on_drop(false);

    place_in_new_group(&mut cmd);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Transport(format!("failed to spawn {program}: {err}")))?;

    let pgid = child
        .id()
        .map(|id| i32::try_from(id).unwrap_or(i32::MAX))
        .ok_or_else(|| AppError::Transport("spawned child has no pid".into()))?;

    Ok(GroupedChild { child, pgid })
}

#[cfg(unix)]
fn place_in_new_group(cmd: &mut Command) {
    use std::io;
    use tokio::process::CommandExt;

    // SAFETY: `setsid` is async-signal-safe and is the only call made in
    // the child between `fork` and `exec`.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(|err| io::Error::from_raw_os_error(err as i32))?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn place_in_new_group(_cmd: &mut Command) {}

/// Tear down a process group: `SIGTERM`, wait up to `grace`, then
/// `SIGKILL` if it hasn't exited.
///
/// # Errors
///
/// Returns `AppError::Transport` if waiting on the child fails for a
/// reason other than it already having exited.
pub async fn teardown_group(child: &mut Child, pgid: i32, grace: Duration) -> Result<()> {
    signal_group(pgid, Signal::Term);

    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return Ok(());
    }

    signal_group(pgid, Signal::Kill);
    child
        .wait()
        .await
        .map_err(|err| AppError::Transport(format!("failed to reap process group: {err}")))?;
    Ok(())
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: Signal) {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    // Negative pid targets the whole process group.
    let _ = kill(Pid::from_raw(-pgid), sig);
}

#[cfg(not(unix))]
fn signal_group(_pgid: i32, _signal: Signal) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenises_a_quoted_template() {
        let argv = tokenise_command("my-agent --flag \"value with spaces\"").unwrap();
        assert_eq!(argv, vec!["my-agent", "--flag", "value with spaces"]);
    }

    #[test]
    fn rejects_unbalanced_quoting() {
        assert!(tokenise_command("my-agent \"unterminated").is_err());
    }

    #[test]
    fn expands_port_placeholder() {
        assert_eq!(expand_port("agent --port ${PORT}", 4321), "agent --port 4321");
    }
}
