//! Recursive file counting by extension.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::termination::CancelToken;
use crate::types::FileCounts;

/// Directory names never descended into, besides dot-directories.
const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "venv", ".git"];

/// How many entries pass between budget checks.
const BUDGET_CHECK_EVERY: u64 = 256;

/// Counts regular files under `root`.
///
/// Symlinks are never followed, so a link loop cannot trap the walk and each
/// real file is counted at most once. Past `budget`, or once `cancel` is set,
/// the walk stops and the partial counts are returned with `error` set.
pub fn count_files(
    root: &Path,
    exclude: Option<&Path>,
    budget: Duration,
    cancel: &CancelToken,
) -> FileCounts {
    let started = Instant::now();
    let mut counts = FileCounts::default();
    let mut seen: u64 = 0;
    let mut unreadable: u64 = 0;

    if cancel.is_cancelled() {
        counts.error = Some("file walk skipped: shutdown in progress".to_string());
        return counts;
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry, exclude));

    for entry in walker {
        seen += 1;
        if seen % BUDGET_CHECK_EVERY == 0 && cancel.is_cancelled() {
            debug!(files = counts.total_files, "File walk interrupted by shutdown");
            counts.error =
                Some("file walk interrupted: shutdown in progress; counts are partial".to_string());
            break;
        }
        if seen % BUDGET_CHECK_EVERY == 0 && started.elapsed() > budget {
            warn!(
                root = %root.display(),
                files = counts.total_files,
                "File walk exceeded its budget; counts are partial"
            );
            counts.error = Some(format!(
                "file walk exceeded {}s budget; counts are partial",
                budget.as_secs()
            ));
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                unreadable += 1;
                debug!(error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        counts.total_files += 1;
        *counts.by_extension.entry(extension_key(entry.path())).or_insert(0) += 1;
    }

    if unreadable > 0 {
        debug!(unreadable, "Some entries could not be read during the walk");
    }
    counts
}

fn is_skipped(entry: &DirEntry, exclude: Option<&Path>) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    if exclude.is_some_and(|path| entry.path() == path) {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Lowercase extension without the dot; `""` when there is none.
fn extension_key(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
