//! Up/down lifecycle hook processes.
//!
//! Distinct from the message hooks pipeline (C10, `crate::hooks`): these
//! run once per broker lifetime, not once per prompt.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::acp::spawner::{self, GroupedChild};
use crate::Result;

/// Launch the configured "up" hook. `${PORT}` is substituted before the
/// command is tokenised. The child inherits stdio and runs in its own
/// process group; the caller is responsible for tearing it down (via
/// [`crate::acp::spawner::teardown_group`]) during shutdown.
///
/// # Errors
///
/// Returns `AppError::Config` if the template is malformed, or
/// `AppError::Transport` if the OS spawn fails.
pub fn start_up_hook(command_template: &str, port: u16, working_dir: &Path) -> Result<GroupedChild> {
    let expanded = spawner::expand_port(command_template, port);
    let argv = spawner::tokenise_command(&expanded)?;
    spawner::spawn_grouped_inherited(&argv, working_dir, &std::collections::HashMap::new())
}

/// Run the configured "down" hook to completion, synchronously from the
/// shutdown sequence's point of view (the caller awaits this before moving
/// on to registered cleanups).
///
/// # Errors
///
/// Returns `AppError::Config` if the template is malformed, or
/// `AppError::Transport` if the OS spawn or wait fails.
pub async fn run_down_hook(command_template: &str, port: u16, working_dir: &Path) -> Result<()> {
    let expanded = spawner::expand_port(command_template, port);
    let argv = spawner::tokenise_command(&expanded)?;
    let mut grouped =
        spawner::spawn_grouped_inherited(&argv, working_dir, &std::collections::HashMap::new())?;

    if tokio::time::timeout(Duration::from_secs(10), grouped.child.wait())
        .await
        .is_err()
    {
        warn!("down hook exceeded its grace period, terminating its process group");
        spawner::teardown_group(&mut grouped.child, grouped.pgid, Duration::from_secs(2)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_substituted_before_tokenising() {
        let expanded = spawner::expand_port("notify-hook --port ${PORT}", 9100);
        assert_eq!(expanded, "notify-hook --port 9100");
    }
}
