//! In-memory bookkeeping for one daemon session.
//!
//! Never persisted as a single document: its pieces surface through the tick
//! artifacts, the status document and `final.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::clock::{compact, WallTime};

#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// `YYYYmmdd_HHMMSS` of `started_at`.
    pub session_id: String,
    pub workspace_root: PathBuf,
    pub started_at: WallTime,
    pub started_monotonic_ns: u64,
    /// Updated on every scheduler iteration, including ones that failed.
    pub last_tick_at: Option<WallTime>,
    pub last_tick_monotonic_ns: Option<u64>,
    pub tick_count: u64,
    /// Artifact path per tick; `None` marks a tick whose write failed.
    pub snapshots: Vec<Option<PathBuf>>,
    pub activity_counts: BTreeMap<String, u64>,
    tick_in_progress: bool,
}

impl SessionRecord {
    pub fn new(workspace_root: PathBuf, started_at: WallTime, started_monotonic_ns: u64) -> Self {
        Self {
            session_id: compact(&started_at),
            workspace_root,
            started_at,
            started_monotonic_ns,
            last_tick_at: None,
            last_tick_monotonic_ns: None,
            tick_count: 0,
            snapshots: Vec::new(),
            activity_counts: BTreeMap::new(),
            tick_in_progress: false,
        }
    }

    /// Opens a tick and returns its 0-based index.
    pub fn begin_tick(&mut self) -> u64 {
        debug_assert!(!self.tick_in_progress, "ticks never overlap");
        self.tick_in_progress = true;
        self.tick_count += 1;
        self.snapshots.len() as u64
    }

    /// Closes the tick opened by [`begin_tick`](Self::begin_tick).
    pub fn complete_tick(
        &mut self,
        at: WallTime,
        monotonic_ns: u64,
        artifact: Option<PathBuf>,
        activities: &[String],
    ) {
        self.last_tick_at = Some(at);
        self.last_tick_monotonic_ns = Some(monotonic_ns);
        if artifact.is_some() {
            for activity in activities {
                *self.activity_counts.entry(activity.clone()).or_insert(0) += 1;
            }
        }
        self.snapshots.push(artifact);
        self.tick_in_progress = false;
        debug_assert!(self.invariant_holds());
    }

    pub fn tick_in_progress(&self) -> bool {
        self.tick_in_progress
    }

    pub fn persisted_ticks(&self) -> u64 {
        self.snapshots.iter().filter(|s| s.is_some()).count() as u64
    }

    pub fn failed_ticks(&self) -> u64 {
        self.snapshots.iter().filter(|s| s.is_none()).count() as u64
    }

    /// `tick_count == len(snapshots) + (1 if a tick is in progress)`.
    pub fn invariant_holds(&self) -> bool {
        self.tick_count == self.snapshots.len() as u64 + u64::from(self.tick_in_progress)
    }
}
