//! Recursive discovery of YAML-declared message hooks, with hot-reload on
//! change.
//!
//! Caches parsed specs behind an `RwLock` and rebuilds the cache on any
//! `notify` event under the watched directory tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, info_span, warn};

use crate::models::hook::HookSpec;
use crate::{AppError, Result};

const DISABLED_DIRNAME: &str = "disabled";

/// Shared, hot-reloaded set of currently discovered hooks.
pub type HookCache = Arc<RwLock<Vec<HookSpec>>>;

/// Walk `dir` recursively, parsing every `*.yaml`/`*.yml` file into a
/// [`HookSpec`], skipping any `disabled/` subtree. Manifests that fail to
/// parse are logged and skipped rather than failing the whole scan.
///
/// # Errors
///
/// Returns `AppError::Storage` only if `dir` itself cannot be read (a
/// missing hooks directory is not an error — it yields an empty list).
pub fn discover_hooks(dir: &Path) -> Result<Vec<HookSpec>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut specs = Vec::new();
    walk(dir, &mut specs)?;
    specs.sort_by_key(|s| s.priority);
    Ok(specs)
}

fn walk(dir: &Path, specs: &mut Vec<HookSpec>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        AppError::Storage(format!("failed to read hooks directory {}: {err}", dir.display()))
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| AppError::Storage(format!("failed to read directory entry: {err}")))?;
        let path = entry.path();

        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == DISABLED_DIRNAME) {
                continue;
            }
            walk(&path, specs)?;
            continue;
        }

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if !is_yaml {
            continue;
        }

        match std::fs::read_to_string(&path)
            .map_err(AppError::from)
            .and_then(|raw| serde_yaml_ng::from_str::<HookSpec>(&raw).map_err(AppError::from))
        {
            Ok(mut spec) => {
                spec.manifest_path = path.clone();
                specs.push(spec);
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to parse message hook manifest, skipping");
            }
        }
    }

    Ok(())
}

/// Owns the `notify` watcher for the hooks directory and keeps a
/// [`HookCache`] in sync with it.
pub struct HookWatcher {
    watcher: Mutex<Option<RecommendedWatcher>>,
    cache: HookCache,
}

impl HookWatcher {
    /// Construct a watcher with an empty cache; call [`Self::register`] to
    /// perform the initial scan and start watching.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watcher: Mutex::new(None),
            cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Shared handle to the currently discovered hooks.
    #[must_use]
    pub fn cache(&self) -> &HookCache {
        &self.cache
    }

    /// Run the initial discovery scan and start watching `dir` for changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the initial scan fails, or
    /// `AppError::Storage` if the watcher cannot be created.
    pub async fn register(&self, dir: &Path) -> Result<()> {
        let _span = info_span!("hook_watcher_register", dir = %dir.display()).entered();

        let specs = discover_hooks(dir)?;
        *self.cache.write().await = specs;
        info!(count = self.cache.read().await.len(), "loaded message hooks");

        if !dir.exists() {
            info!("hooks directory does not exist yet, watcher deferred");
            return Ok(());
        }

        let cache = Arc::clone(&self.cache);
        let watched_dir = dir.to_path_buf();
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if is_relevant_event(&event) {
                        let _span = info_span!("hooks_reload", dir = %watched_dir.display()).entered();
                        match discover_hooks(&watched_dir) {
                            Ok(specs) => {
                                let mut guard = cache.blocking_write();
                                *guard = specs;
                                info!(count = guard.len(), "hot-reloaded message hooks");
                            }
                            Err(err) => {
                                warn!(%err, "failed to reload message hooks");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "hook directory watcher error");
                }
            },
        )
        .map_err(|err| AppError::Storage(format!("failed to create hook watcher: {err}")))?;

        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|err| AppError::Storage(format!("failed to watch hooks directory: {err}")))?;

        *self.watcher.lock().await = Some(watcher);
        Ok(())
    }
}

impl Default for HookWatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_disabled_subtree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("active.yaml"),
            "name: active\ntrigger: all\ncommand: /bin/true\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("disabled")).unwrap();
        std::fs::write(
            dir.path().join("disabled").join("off.yaml"),
            "name: off\ntrigger: all\ncommand: /bin/true\n",
        )
        .unwrap();

        let specs = discover_hooks(dir.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "active");
    }

    #[test]
    fn missing_directory_yields_empty_list() {
        let specs = discover_hooks(Path::new("/nonexistent/hooks/dir")).unwrap();
        assert!(specs.is_empty());
    }
}
