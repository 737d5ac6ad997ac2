//! Atomic file writes: write to a temp file in the same directory, then
//! rename over the destination.
//!
//! Used by the event journal's metadata rewrites and the scanner
//! defense's blocklist persistence. There is no notion of a "workspace
//! root" to validate against — callers here always write into paths this
//! broker itself manages.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Write `bytes` to `path`, creating parent directories as needed, via a
/// temp file in the same directory followed by an atomic rename.
///
/// # Errors
///
/// Returns `AppError::Storage` if directory creation, the temp file write,
/// or the rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Storage(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Storage(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(bytes)
        .map_err(|err| AppError::Storage(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path).map_err(|err| {
        AppError::Storage(format!(
            "failed to persist file to {}: {err}",
            path.display()
        ))
    })?;

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically to `path`.
///
/// # Errors
///
/// Returns `AppError::Storage` on serialization or I/O failure.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| AppError::Storage(format!("failed to serialize {}: {err}", path.display())))?;
    write_atomic(path, &bytes)
}
