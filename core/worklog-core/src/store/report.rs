//! Summary artifacts and the status document.
//!
//! Append-only from the daemon's point of view: per-tick files are never
//! rewritten, and nothing is deleted unless [`ReportStore::prune`] or
//! [`ReportStore::prune_sessions`] is called explicitly.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::atomic::{atomic_create_json, atomic_write_json};
use crate::clock::compact;
use crate::config::ControlPaths;
use crate::error::{Result, WorklogError};
use crate::types::{FinalArtifact, LifecycleRecord, SessionSummary, Snapshot, TickArtifact, TickDerived};

static ARTIFACT_STEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}_\d{6}$").expect("valid regex"));

/// A compact stamp, optionally followed by a 6-digit sequence number.
static TICK_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8}_\d{6})(?:_(\d{6}))?$").expect("valid regex"));

/// True for names shaped like a session id.
pub fn is_compact_stamp(name: &str) -> bool {
    ARTIFACT_STEM.is_match(name)
}

/// True for tick artifact stems: a compact stamp, or a stamp plus sequence.
pub fn is_tick_stem(name: &str) -> bool {
    TICK_STEM.is_match(name)
}

/// Stem for a tick captured at `captured`, given the session's newest stem.
///
/// Normally just `captured`. When the wall clock repeats (DST fall-back) or
/// steps back, `captured` would collide with or sort before an existing
/// file, so the name continues from `newest` with the next sequence number.
fn next_tick_stem(captured: &str, newest: Option<&str>) -> String {
    let Some(newest) = newest.filter(|newest| *newest >= captured) else {
        return captured.to_string();
    };
    let Some(caps) = TICK_STEM.captures(newest) else {
        return captured.to_string();
    };
    let sequence = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0);
    format!("{}_{:06}", &caps[1], sequence + 1)
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    paths: ControlPaths,
}

impl ReportStore {
    pub fn new(paths: ControlPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ControlPaths {
        &self.paths
    }

    /// Persists one tick; the file name is the compact `captured_at`.
    ///
    /// Never replaces an existing tick file, and the new name always sorts
    /// after every earlier one (see [`next_tick_stem`]).
    pub fn write_tick(
        &self,
        session_id: &str,
        snapshot: &Snapshot,
        derived: &TickDerived,
    ) -> Result<PathBuf> {
        let captured = compact(&snapshot.captured_at);
        let newest = self.newest_tick_stem(session_id)?;
        let stem = next_tick_stem(&captured, newest.as_deref());
        if stem != captured {
            warn!(
                session_id,
                captured = %captured,
                name = %stem,
                "Wall clock repeated or stepped back; tick name continues the sequence"
            );
        }
        let path = self.paths.tick_file(session_id, &stem);
        atomic_create_json(&path, &TickArtifact::new(snapshot, derived))?;
        debug!(path = %path.display(), tick_index = derived.tick_index, "Tick artifact written");
        Ok(path)
    }

    fn newest_tick_stem(&self, session_id: &str) -> Result<Option<String>> {
        if !self.paths.session_dir(session_id).is_dir() {
            return Ok(None);
        }
        Ok(self.tick_files(session_id)?.last().and_then(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        }))
    }

    pub fn write_final(
        &self,
        session_id: &str,
        snapshot: &Snapshot,
        summary: &SessionSummary,
    ) -> Result<PathBuf> {
        let path = self.paths.final_file(session_id);
        let artifact = FinalArtifact {
            session_id: session_id.to_string(),
            summary: summary.clone(),
            final_snapshot: snapshot.clone(),
        };
        atomic_write_json(&path, &artifact)?;
        Ok(path)
    }

    /// Replaces `status/current.json`. Last writer wins.
    pub fn update_status(&self, record: &LifecycleRecord) -> Result<()> {
        atomic_write_json(&self.paths.status_file(), record)
    }

    /// Session ids with a directory under `summaries/`, oldest first.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let dir = self.paths.summaries_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions: Vec<String> = read_dir_names(&dir)?
            .into_iter()
            .filter(|name| is_compact_stamp(name))
            .filter(|name| dir.join(name).is_dir())
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    /// Tick artifact paths of one session, in capture order.
    pub fn tick_files(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.paths.session_dir(session_id);
        if !dir.is_dir() {
            return Err(WorklogError::SessionNotFound(session_id.to_string()));
        }
        // Stems sort lexically in write order: "." sorts before "_", so a
        // sequenced name follows the plain stamp it extends.
        let mut names: Vec<String> = read_dir_names(&dir)?
            .into_iter()
            .filter(|name| name.strip_suffix(".json").is_some_and(is_tick_stem))
            .collect();
        names.sort();
        Ok(names.into_iter().map(|name| dir.join(name)).collect())
    }

    pub fn load_ticks(&self, session_id: &str) -> Result<Vec<TickArtifact>> {
        self.tick_files(session_id)?
            .iter()
            .map(|path| read_json(path))
            .collect()
    }

    /// `Ok(None)` when the session ended without a clean shutdown.
    pub fn load_final(&self, session_id: &str) -> Result<Option<FinalArtifact>> {
        let path = self.paths.final_file(session_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Deletes the oldest tick files of `session_id`, keeping the newest `keep_n`.
    /// `final.json` is never touched. Returns how many files were removed.
    pub fn prune(&self, session_id: &str, keep_n: usize) -> Result<usize> {
        let files = self.tick_files(session_id)?;
        let excess = files.len().saturating_sub(keep_n);
        for path in &files[..excess] {
            fs_err::remove_file(path)
                .map_err(|e| WorklogError::io("pruning tick artifact", e))?;
        }
        if excess > 0 {
            info!(session_id, removed = excess, "Pruned tick artifacts");
        }
        Ok(excess)
    }

    /// Deletes the oldest session directories, keeping the newest `keep_n`.
    /// `protect` (the live session) survives regardless.
    pub fn prune_sessions(&self, keep_n: usize, protect: Option<&str>) -> Result<Vec<String>> {
        let sessions = self.list_sessions()?;
        let excess = sessions.len().saturating_sub(keep_n);
        let mut removed = Vec::new();
        for session_id in &sessions[..excess] {
            if protect == Some(session_id.as_str()) {
                continue;
            }
            fs_err::remove_dir_all(self.paths.session_dir(session_id))
                .map_err(|e| WorklogError::io("pruning session directory", e))?;
            removed.push(session_id.clone());
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), kept = keep_n, "Pruned session directories");
        }
        Ok(removed)
    }
}

fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let entries = fs_err::read_dir(dir).map_err(|e| WorklogError::io("listing directory", e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WorklogError::io("listing directory", e))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs_err::read_to_string(path).map_err(|e| WorklogError::io("reading artifact", e))?;
    serde_json::from_str(&content)
        .map_err(|e| WorklogError::json(format!("parsing {}", path.display()), e))
}
