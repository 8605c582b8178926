//! Atomic file replacement.

use std::fs::{DirBuilder, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, WorklogError};

/// Creates `dir` and missing ancestors with mode 0o755.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(|e| WorklogError::io(format!("creating directory {}", dir.display()), e))
}

/// Writes `contents` to `path` via a sibling temp file, fsync and rename.
///
/// Readers see either the old file or the complete new one, never a prefix.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = prepare(path, contents)?;
    tmp.persist(path).map_err(|e| {
        WorklogError::io(format!("persisting temp file to {}", path.display()), e.error)
    })?;
    Ok(())
}

/// Like [`atomic_write`], but fails with `AlreadyExists` instead of replacing
/// an existing `path`.
pub fn atomic_create(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = prepare(path, contents)?;
    tmp.persist_noclobber(path).map_err(|e| {
        WorklogError::io(format!("creating {}", path.display()), e.error)
    })?;
    Ok(())
}

/// Fully written, synced, 0644 temp file next to `path`.
fn prepare(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        WorklogError::io(format!("creating temp file in {}", dir.display()), e)
    })?;

    tmp.write_all(contents)
        .map_err(|e| WorklogError::io(format!("writing temp file for {}", path.display()), e))?;

    tmp.as_file()
        .sync_all()
        .map_err(|e| WorklogError::io(format!("syncing temp file for {}", path.display()), e))?;

    // NamedTempFile creates 0600; artifacts are meant to be readable.
    tmp.as_file()
        .set_permissions(Permissions::from_mode(0o644))
        .map_err(|e| WorklogError::io(format!("setting mode on {}", path.display()), e))?;

    Ok(tmp)
}

/// Serializes `value` as 2-space pretty JSON with a trailing newline.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    atomic_write(path, pretty_json(path, value)?.as_bytes())
}

/// [`atomic_create`] counterpart of [`atomic_write_json`].
pub fn atomic_create_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    atomic_create(path, pretty_json(path, value)?.as_bytes())
}

fn pretty_json<T: Serialize>(path: &Path, value: &T) -> Result<String> {
    let mut content = serde_json::to_string_pretty(value)
        .map_err(|e| WorklogError::json(format!("serializing {}", path.display()), e))?;
    content.push('\n');
    Ok(content)
}
