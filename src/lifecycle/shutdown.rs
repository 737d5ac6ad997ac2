//! Coordinated, exactly-once shutdown.
//!
//! Driven by SIGINT/SIGTERM, an explicit `Shutdown(reason)` call, or a
//! fatal error. Concurrent triggers coalesce onto the first caller's run;
//! everyone observes the same completion.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::acp::spawner::{self, GroupedChild};
use crate::lifecycle::hooks;

/// A registered cleanup callback, run to completion in registration order.
pub type CleanupFn = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct UpHookState {
    grouped: Option<GroupedChild>,
    teardown_grace: Duration,
}

/// Coordinates the broker's exactly-once teardown sequence: stop the up-hook
/// process group, run the down-hook synchronously, run every registered
/// cleanup in order, then mark shutdown done.
pub struct ShutdownManager {
    triggered: AtomicBool,
    done_tx: watch::Sender<bool>,
    cleanups: Mutex<Vec<CleanupFn>>,
    up_hook: Mutex<UpHookState>,
    down_hook_command: Option<String>,
    working_dir: PathBuf,
    port: u16,
}

impl ShutdownManager {
    /// Construct a manager with no up-hook running yet and no cleanups
    /// registered.
    #[must_use]
    pub fn new(
        down_hook_command: Option<String>,
        working_dir: PathBuf,
        port: u16,
        teardown_grace: Duration,
    ) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            triggered: AtomicBool::new(false),
            done_tx,
            cleanups: Mutex::new(Vec::new()),
            up_hook: Mutex::new(UpHookState {
                grouped: None,
                teardown_grace,
            }),
            down_hook_command,
            working_dir,
            port,
        }
    }

    /// Record the up-hook's process handle so shutdown can tear it down,
    /// and start polling it for an early exit: a long-running hook stays
    /// attached for the server's life, but a short-lived one exiting on
    /// its own is logged rather than treated as an error.
    pub async fn track_up_hook(self: &Arc<Self>, grouped: GroupedChild) {
        self.up_hook.lock().await.grouped = Some(grouped);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let mut guard = this.up_hook.lock().await;
                let Some(state) = &mut guard.grouped else {
                    break;
                };
                match state.child.try_wait() {
                    Ok(Some(status)) => {
                        info!(%status, "up hook exited");
                        guard.grouped = None;
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(%err, "failed to poll up hook for exit");
                        break;
                    }
                }
            }
        });
    }

    /// Register a cleanup callback, run in the order callbacks were added.
    pub async fn register_cleanup(&self, cleanup: CleanupFn) {
        self.cleanups.lock().await.push(cleanup);
    }

    /// Whether a shutdown has already completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Trigger shutdown, or wait for an already-in-progress one to finish.
    pub async fn shutdown(&self, reason: &str) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            self.wait_until_done().await;
            return;
        }

        info!(reason, "shutdown initiated");

        let taken = {
            let mut guard = self.up_hook.lock().await;
            guard.grouped.take().map(|grouped| (grouped, guard.teardown_grace))
        };
        if let Some((mut grouped, grace)) = taken {
            if let Err(err) =
                spawner::teardown_group(&mut grouped.child, grouped.pgid, grace).await
            {
                warn!(%err, "failed to tear down up-hook process group");
            }
        }

        if let Some(command) = &self.down_hook_command {
            if let Err(err) = hooks::run_down_hook(command, self.port, &self.working_dir).await {
                warn!(%err, "down hook failed");
            }
        }

        let cleanups = std::mem::take(&mut *self.cleanups.lock().await);
        for cleanup in cleanups {
            cleanup().await;
        }

        info!("shutdown complete");
        let _ = self.done_tx.send(true);
    }

    /// Wait for a shutdown triggered by any caller to complete.
    pub async fn wait_until_done(&self) {
        let mut rx = self.done_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_shutdowns_run_cleanups_exactly_once() {
        let manager = Arc::new(ShutdownManager::new(
            None,
            PathBuf::from("."),
            0,
            Duration::from_millis(50),
        ));
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter_for_cleanup = Arc::clone(&counter);
        manager
            .register_cleanup(Box::new(move || {
                let counter = Arc::clone(&counter_for_cleanup);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.shutdown("test").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(manager.is_done());
    }
}
