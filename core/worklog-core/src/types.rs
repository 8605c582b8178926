//! Serialized types shared by the daemon, the supervisor and the stores.
//!
//! Field names are part of the on-disk contract under the control directory;
//! renaming one breaks every reader of existing sessions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clock::{seconds_between, WallTime};
use crate::session::SessionRecord;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// What the inspector saw during one tick. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: WallTime,
    pub monotonic_ns: u64,
    pub workspace_root: PathBuf,
    pub git: GitState,
    pub counts: FileCounts,
    pub activities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GitState {
    /// Empty when detached or not a repository.
    pub branch: String,
    /// Raw `git status --porcelain` lines, in git's order.
    pub dirty_entries: Vec<String>,
    /// Newest first, at most five.
    pub recent_subjects: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileCounts {
    pub total_files: u64,
    /// Lowercase extension without the dot; `""` for extensionless files.
    pub by_extension: BTreeMap<String, u64>,
    pub error: Option<String>,
}

/// Per-tick values computed from the monotonic clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDerived {
    pub tick_index: u64,
    pub time_since_start_seconds: f64,
    /// `None` for the first tick of a session.
    pub time_since_last_tick_seconds: Option<f64>,
}

/// Contents of `summaries/<session_id>/<YYYYmmdd_HHMMSS>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickArtifact {
    pub captured_at: WallTime,
    pub monotonic_ns: u64,
    pub workspace_root: PathBuf,
    #[serde(flatten)]
    pub derived: TickDerived,
    pub git: GitState,
    pub counts: FileCounts,
    pub activities: Vec<String>,
}

impl TickArtifact {
    pub fn new(snapshot: &Snapshot, derived: &TickDerived) -> Self {
        Self {
            captured_at: snapshot.captured_at,
            monotonic_ns: snapshot.monotonic_ns,
            workspace_root: snapshot.workspace_root.clone(),
            derived: derived.clone(),
            git: snapshot.git.clone(),
            counts: snapshot.counts.clone(),
            activities: snapshot.activities.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl LifecycleStatus {
    /// Statuses that claim a daemon process is (or was about to be) alive.
    pub fn claims_live_process(self) -> bool {
        matches!(
            self,
            LifecycleStatus::Starting | LifecycleStatus::Running | LifecycleStatus::Stopping
        )
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleStatus::Starting => "starting",
            LifecycleStatus::Running => "running",
            LifecycleStatus::Stopping => "stopping",
            LifecycleStatus::Stopped => "stopped",
            LifecycleStatus::Crashed => "crashed",
        };
        f.write_str(label)
    }
}

/// Contents of `status/current.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub pid: Option<u32>,
    pub status: LifecycleStatus,
    pub started_at: WallTime,
    pub last_heartbeat_at: WallTime,
    pub session_id: String,
    pub workspace_root: PathBuf,
}

// ─────────────────────────────────────────────────────────────────────────────
// Final artifact
// ─────────────────────────────────────────────────────────────────────────────

/// Session totals written alongside the last snapshot on clean shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: WallTime,
    pub finished_at: WallTime,
    /// Tick artifacts actually persisted in the session directory.
    pub tick_count: u64,
    /// Ticks whose artifact could not be written.
    pub failed_ticks: u64,
    pub total_duration_seconds: f64,
    pub activity_counts: BTreeMap<String, u64>,
}

impl SessionSummary {
    pub fn from_session(session: &SessionRecord, finished_at: WallTime, now_ns: u64) -> Self {
        Self {
            started_at: session.started_at,
            finished_at,
            tick_count: session.persisted_ticks(),
            failed_ticks: session.failed_ticks(),
            total_duration_seconds: seconds_between(session.started_monotonic_ns, now_ns),
            activity_counts: session.activity_counts.clone(),
        }
    }
}

/// Contents of `summaries/<session_id>/final.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub session_id: String,
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub final_snapshot: Snapshot,
}
