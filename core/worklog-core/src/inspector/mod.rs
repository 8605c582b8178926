//! Workspace inspection.
//!
//! [`Inspect`] is the seam the scheduler depends on; [`WorkspaceInspector`] is
//! the real implementation (git probes plus a file walk). Inspection never
//! fails as a whole: probe problems are written into the snapshot.

mod activity;
mod git;
mod probe;
mod walk;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::termination::CancelToken;
use crate::types::Snapshot;

pub use activity::{derive_activities, BUGFIX, CLEANUP, EDITING, FEATURE, ROUTINE, SECURITY, UPDATE};
pub use git::RECENT_SUBJECT_LIMIT;
pub use probe::ProbeError;
pub use walk::count_files;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const WALK_BUDGET: Duration = Duration::from_secs(10);

pub trait Inspect {
    /// Captures one snapshot of `workspace_root`.
    ///
    /// Probes already running when `cancel` is set finish within their own
    /// timeout; no new probe starts afterwards and the file walk stops at its
    /// next check.
    fn inspect(&self, workspace_root: &Path, clock: &dyn Clock, cancel: &CancelToken) -> Snapshot;
}

#[derive(Debug, Clone)]
pub struct WorkspaceInspector {
    git_program: OsString,
    /// Absolute control directory; excluded from status lines and the walk.
    control_dir: Option<PathBuf>,
    probe_timeout: Duration,
    walk_budget: Duration,
}

impl Default for WorkspaceInspector {
    fn default() -> Self {
        Self {
            git_program: OsString::from("git"),
            control_dir: None,
            probe_timeout: PROBE_TIMEOUT,
            walk_budget: WALK_BUDGET,
        }
    }
}

impl WorkspaceInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control_dir(mut self, control_dir: PathBuf) -> Self {
        self.control_dir = Some(control_dir);
        self
    }

    pub fn with_git_program(mut self, program: impl Into<OsString>) -> Self {
        self.git_program = program.into();
        self
    }

    /// Control dir relative to the workspace, `/`-joined, if it lives inside.
    fn control_rel(&self, workspace_root: &Path) -> Option<String> {
        let rel = self.control_dir.as_ref()?.strip_prefix(workspace_root).ok()?;
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        (!joined.is_empty()).then_some(joined)
    }
}

impl Inspect for WorkspaceInspector {
    fn inspect(&self, workspace_root: &Path, clock: &dyn Clock, cancel: &CancelToken) -> Snapshot {
        let captured_at = clock.now_wall();
        let monotonic_ns = clock.now_monotonic_ns();

        let control_rel = self.control_rel(workspace_root);
        let git = git::GitProbes {
            program: &self.git_program,
            workspace_root,
            control_rel: control_rel.as_deref(),
            timeout: self.probe_timeout,
        }
        .collect(cancel);

        let counts = walk::count_files(
            workspace_root,
            self.control_dir.as_deref(),
            self.walk_budget,
            cancel,
        );
        let activities = derive_activities(&git.recent_subjects, !git.dirty_entries.is_empty());

        debug!(
            branch = %git.branch,
            dirty = git.dirty_entries.len(),
            files = counts.total_files,
            git_error = git.error.as_deref().unwrap_or(""),
            "Workspace inspected"
        );

        Snapshot {
            captured_at,
            monotonic_ns,
            workspace_root: workspace_root.to_path_buf(),
            git,
            counts,
            activities,
        }
    }
}
