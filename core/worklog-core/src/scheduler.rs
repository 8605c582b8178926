//! The daemon's main loop.
//!
//! ```text
//! Idle -> Sleeping -> Ticking -> Sleeping ... -> Draining -> Finalized
//! ```
//!
//! One thread, no concurrent ticks. The loop suspends in exactly two places:
//! the wall-clock sleep and the inspector's external probes. Cancellation is
//! observed at both; a tick that has started always runs to completion.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{next_boundary_after, seconds_between, Clock, SleepOutcome, WallTime};
use crate::inspector::Inspect;
use crate::session::SessionRecord;
use crate::store::{LifecycleStore, ReportStore};
use crate::termination::{run_crash_shutdown, run_final_shutdown, CancelToken, ShutdownContext};
use crate::types::{LifecycleRecord, LifecycleStatus, TickDerived};

/// Consecutive failed ticks that make the daemon give up.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Sleeping,
    Ticking,
    Draining,
    Finalized,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Cancellation observed; clean shutdown with `final.json`.
    Cancelled,
    /// Too many consecutive write failures; status `crashed`, no `final.json`.
    WriteFailures,
}

pub struct Scheduler<'a> {
    clock: &'a dyn Clock,
    inspector: &'a dyn Inspect,
    reports: &'a ReportStore,
    lifecycle: &'a mut LifecycleStore,
    session: SessionRecord,
    record: LifecycleRecord,
    interval: Duration,
    cancel: CancelToken,
    state: SchedulerState,
    consecutive_failures: u32,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: &'a dyn Clock,
        inspector: &'a dyn Inspect,
        reports: &'a ReportStore,
        lifecycle: &'a mut LifecycleStore,
        session: SessionRecord,
        record: LifecycleRecord,
        interval: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            clock,
            inspector,
            reports,
            lifecycle,
            session,
            record,
            interval,
            cancel,
            state: SchedulerState::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    /// Runs until cancelled or until writes keep failing, then finalizes.
    pub fn run(&mut self) -> LoopExit {
        self.enter_running();

        let exit = loop {
            self.state = SchedulerState::Sleeping;
            let next_tick = self.next_tick_at();
            debug!(next_tick = %next_tick.to_rfc3339(), "Sleeping until next tick");

            if self.clock.sleep_until_wall(next_tick, &self.cancel) == SleepOutcome::Cancelled
                || self.cancel.is_cancelled()
            {
                break LoopExit::Cancelled;
            }

            self.state = SchedulerState::Ticking;
            self.tick();

            if self.consecutive_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                break LoopExit::WriteFailures;
            }
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }
        };

        self.finish(exit);
        exit
    }

    /// A single immediate tick followed by the clean shutdown sequence.
    pub fn run_once(&mut self) -> Option<PathBuf> {
        self.enter_running();
        self.state = SchedulerState::Ticking;
        let written = self.tick();
        self.finish(LoopExit::Cancelled);
        written
    }

    /// One inspection written through the report store.
    ///
    /// Returns the artifact path, or `None` if the write failed.
    pub fn tick(&mut self) -> Option<PathBuf> {
        let tick_index = self.session.begin_tick();
        let snapshot =
            self.inspector
                .inspect(&self.session.workspace_root, self.clock, &self.cancel);

        let derived = TickDerived {
            tick_index,
            time_since_start_seconds: seconds_between(
                self.session.started_monotonic_ns,
                snapshot.monotonic_ns,
            ),
            time_since_last_tick_seconds: self
                .session
                .last_tick_monotonic_ns
                .map(|last| seconds_between(last, snapshot.monotonic_ns)),
        };

        let written = match self
            .reports
            .write_tick(&self.session.session_id, &snapshot, &derived)
        {
            Ok(path) => Some(path),
            Err(err) => {
                error!(
                    session_id = %self.session.session_id,
                    tick_index,
                    error = %err,
                    "Failed to write tick artifact"
                );
                None
            }
        };

        self.session.complete_tick(
            snapshot.captured_at,
            snapshot.monotonic_ns,
            written.clone(),
            &snapshot.activities,
        );

        if written.is_none() {
            // A heartbeat promises a completed tick; a failed one gets none.
            self.consecutive_failures += 1;
            warn!(
                consecutive_failures = self.consecutive_failures,
                limit = MAX_CONSECUTIVE_WRITE_FAILURES,
                "Tick failed"
            );
            return None;
        }

        if let Err(err) = self.heartbeat() {
            self.consecutive_failures += 1;
            error!(error = %err, "Failed to refresh heartbeat");
        } else {
            self.consecutive_failures = 0;
        }

        info!(
            session_id = %self.session.session_id,
            tick_index,
            activities = ?snapshot.activities,
            git_error = snapshot.git.error.as_deref().unwrap_or(""),
            "Tick recorded"
        );
        written
    }

    /// Draining then Finalized. Safe to call once the loop has stopped.
    pub fn finish(&mut self, exit: LoopExit) {
        self.state = SchedulerState::Draining;
        match exit {
            LoopExit::Cancelled => {
                info!(session_id = %self.session.session_id, "Shutdown requested");
                self.record.status = LifecycleStatus::Stopping;
                self.record.last_heartbeat_at = self.clock.now_wall();
                if let Err(err) = self.reports.update_status(&self.record) {
                    warn!(error = %err, "Failed to record stopping status");
                }
                run_final_shutdown(ShutdownContext {
                    clock: self.clock,
                    inspector: self.inspector,
                    reports: self.reports,
                    lifecycle: &mut *self.lifecycle,
                    session: &self.session,
                    record: &mut self.record,
                });
            }
            LoopExit::WriteFailures => run_crash_shutdown(
                self.clock,
                self.reports,
                &mut *self.lifecycle,
                &mut self.record,
                "repeated write failures",
            ),
        }
        self.state = SchedulerState::Finalized;
    }

    /// First boundary after both now and the previous tick's capture time,
    /// so a wall clock stepped backwards cannot schedule a repeat of an
    /// already-recorded boundary.
    fn next_tick_at(&self) -> WallTime {
        let now = self.clock.now_wall();
        let reference = match self.session.last_tick_at {
            Some(last) if last > now => last,
            _ => now,
        };
        next_boundary_after(&reference, self.interval)
    }

    /// Idle -> loop entry: status `running` and an initial heartbeat.
    fn enter_running(&mut self) {
        self.record.status = LifecycleStatus::Running;
        if let Err(err) = self.heartbeat() {
            warn!(error = %err, "Failed to write initial heartbeat");
        }
        info!(
            session_id = %self.session.session_id,
            interval_secs = self.interval.as_secs(),
            "Scheduler running"
        );
    }

    /// Heartbeat file first, then the status document's timestamp.
    fn heartbeat(&mut self) -> crate::error::Result<()> {
        self.lifecycle.mark_heartbeat(self.clock.now_monotonic_ns())?;
        self.record.last_heartbeat_at = self.clock.now_wall();
        self.reports.update_status(&self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ControlPaths;
    use crate::types::{FileCounts, GitState, Snapshot};
    use chrono::{FixedOffset, TimeZone};
    use std::path::Path;

    fn at(h: u32, m: u32, s: u32) -> WallTime {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, h, m, s)
            .unwrap()
    }

    /// Takes `duration` of simulated time per inspection.
    struct ScriptedInspector {
        duration: Duration,
    }

    impl Inspect for ScriptedInspector {
        fn inspect(&self, workspace_root: &Path, clock: &dyn Clock, _cancel: &CancelToken) -> Snapshot {
            let captured_at = clock.now_wall();
            let monotonic_ns = clock.now_monotonic_ns();
            clock.pause(self.duration);
            Snapshot {
                captured_at,
                monotonic_ns,
                workspace_root: workspace_root.to_path_buf(),
                git: GitState {
                    branch: "main".to_string(),
                    dirty_entries: vec![],
                    recent_subjects: vec!["fix: bad index".to_string()],
                    error: None,
                },
                counts: FileCounts::default(),
                activities: vec!["バグ修正".to_string()],
            }
        }
    }

    /// Steps `clock` back by `step` right after its first inspection.
    struct SteppingInspector<'c> {
        clock: &'c ManualClock,
        step: chrono::Duration,
        stepped: std::cell::Cell<bool>,
    }

    impl Inspect for SteppingInspector<'_> {
        fn inspect(&self, workspace_root: &Path, clock: &dyn Clock, cancel: &CancelToken) -> Snapshot {
            let instant = ScriptedInspector { duration: Duration::ZERO };
            let snapshot = instant.inspect(workspace_root, clock, cancel);
            if !self.stepped.replace(true) {
                self.clock.set_wall(snapshot.captured_at - self.step);
            }
            snapshot
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        reports: ReportStore,
        lifecycle: LifecycleStore,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let paths = ControlPaths::with_root(dir.path().join("ctl"));
            let mut lifecycle = LifecycleStore::new(paths.clone());
            assert!(lifecycle.acquire_pid_file().unwrap());
            Self {
                _dir: dir,
                reports: ReportStore::new(paths),
                lifecycle,
            }
        }

        fn run(
            &mut self,
            clock: &ManualClock,
            inspector: &dyn Inspect,
            interval: Duration,
        ) -> (LoopExit, SessionRecord, SchedulerState) {
            let started_at = clock.now_wall();
            let session =
                SessionRecord::new(PathBuf::from("/work"), started_at, clock.now_monotonic_ns());
            let record = LifecycleRecord {
                pid: Some(std::process::id()),
                status: LifecycleStatus::Starting,
                started_at,
                last_heartbeat_at: started_at,
                session_id: session.session_id.clone(),
                workspace_root: PathBuf::from("/work"),
            };
            let mut scheduler = Scheduler::new(
                clock,
                inspector,
                &self.reports,
                &mut self.lifecycle,
                session,
                record,
                interval,
                CancelToken::new(),
            );
            let exit = scheduler.run();
            (exit, scheduler.session().clone(), scheduler.state())
        }

        fn status(&self) -> LifecycleRecord {
            self.lifecycle.read().unwrap()
        }
    }

    #[test]
    fn ticks_align_to_the_top_of_the_hour() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 37, 0));
        clock.set_horizon(at(14, 30, 0));
        let inspector = ScriptedInspector { duration: Duration::ZERO };

        let (exit, session, state) = harness.run(&clock, &inspector, Duration::from_secs(3600));
        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(state, SchedulerState::Finalized);

        let ticks = harness.reports.load_ticks(&session.session_id).unwrap();
        let captured: Vec<WallTime> = ticks.iter().map(|t| t.captured_at).collect();
        assert_eq!(captured, vec![at(13, 0, 0), at(14, 0, 0)]);
        assert_eq!(ticks[0].derived.time_since_last_tick_seconds, None);
        assert_eq!(ticks[1].derived.time_since_last_tick_seconds, Some(3600.0));
        assert_eq!(ticks[0].derived.time_since_start_seconds, 23.0 * 60.0);
    }

    #[test]
    fn wall_clock_stepped_back_does_not_repeat_a_boundary() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 37, 0));
        clock.set_horizon(at(14, 30, 0));
        let inspector = SteppingInspector {
            clock: &clock,
            step: chrono::Duration::minutes(29),
            stepped: std::cell::Cell::new(false),
        };

        let (_, session, _) = harness.run(&clock, &inspector, Duration::from_secs(3600));
        let ticks = harness.reports.load_ticks(&session.session_id).unwrap();
        let captured: Vec<WallTime> = ticks.iter().map(|t| t.captured_at).collect();
        assert_eq!(captured, vec![at(13, 0, 0), at(14, 0, 0)]);
        let files = harness.reports.tick_files(&session.session_id).unwrap();
        assert!(files[1].ends_with("20261016_140000.json"));
    }

    #[test]
    fn clean_exit_writes_final_and_releases_pid() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 37, 0));
        clock.set_horizon(at(14, 30, 0));
        let inspector = ScriptedInspector { duration: Duration::ZERO };

        let (_, session, _) = harness.run(&clock, &inspector, Duration::from_secs(3600));
        let final_artifact = harness.reports.load_final(&session.session_id).unwrap().unwrap();
        assert_eq!(final_artifact.summary.tick_count, 2);
        assert_eq!(final_artifact.summary.failed_ticks, 0);
        assert_eq!(final_artifact.summary.activity_counts.get("バグ修正"), Some(&2));
        assert_eq!(final_artifact.summary.finished_at, at(14, 30, 0));

        let status = harness.status();
        assert_eq!(status.status, LifecycleStatus::Stopped);
        assert_eq!(status.pid, None);
        assert!(!harness.reports.paths().pid_file().exists());
        assert!(!harness.reports.paths().heartbeat_file().exists());
    }

    #[test]
    fn long_ticks_never_double_run() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 0, 30));
        clock.set_horizon(at(12, 5, 30));
        let inspector = ScriptedInspector {
            duration: Duration::from_secs(90),
        };

        let (_, session, _) = harness.run(&clock, &inspector, Duration::from_secs(60));
        let ticks = harness.reports.load_ticks(&session.session_id).unwrap();
        assert!(ticks.len() <= 3, "got {} ticks", ticks.len());
        assert!(!ticks.is_empty());
        for pair in ticks.windows(2) {
            assert!(pair[1].monotonic_ns > pair[0].monotonic_ns);
            assert!((pair[1].captured_at - pair[0].captured_at).num_seconds() >= 60);
        }
        for (i, tick) in ticks.iter().enumerate() {
            assert_eq!(tick.derived.tick_index, i as u64);
        }
    }

    #[test]
    fn one_second_interval_with_slow_inspector_never_overlaps() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 0, 0));
        clock.set_horizon(at(12, 0, 20));
        let inspector = ScriptedInspector {
            duration: Duration::from_millis(2500),
        };

        let (_, session, _) = harness.run(&clock, &inspector, Duration::from_secs(1));
        let ticks = harness.reports.load_ticks(&session.session_id).unwrap();
        assert!(ticks.len() >= 2);
        for pair in ticks.windows(2) {
            assert!((pair[1].captured_at - pair[0].captured_at).num_milliseconds() >= 2500);
        }
        let final_artifact = harness.reports.load_final(&session.session_id).unwrap().unwrap();
        assert_eq!(final_artifact.summary.tick_count, ticks.len() as u64);
    }

    #[test]
    fn repeated_write_failures_shut_down_as_crashed() {
        let mut harness = Harness::new();
        // A regular file where the summaries directory should be.
        std::fs::write(harness.reports.paths().summaries_dir(), "blocker").unwrap();

        let clock = ManualClock::new(at(12, 37, 0));
        clock.set_horizon(at(23, 0, 0));
        let inspector = ScriptedInspector { duration: Duration::ZERO };

        let (exit, session, state) = harness.run(&clock, &inspector, Duration::from_secs(3600));
        assert_eq!(exit, LoopExit::WriteFailures);
        assert_eq!(state, SchedulerState::Finalized);
        assert_eq!(session.tick_count, 3);
        assert_eq!(session.failed_ticks(), 3);
        assert!(session.snapshots.iter().all(Option::is_none));
        assert!(session.invariant_holds());

        let status = harness.status();
        assert_eq!(status.status, LifecycleStatus::Crashed);
        assert!(!harness.reports.paths().pid_file().exists());
        assert!(!harness.reports.paths().final_file(&session.session_id).exists());
    }

    #[test]
    fn cancellation_before_first_boundary_yields_empty_final() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 37, 0));
        clock.set_horizon(at(12, 40, 0));
        let inspector = ScriptedInspector { duration: Duration::ZERO };

        let (exit, session, _) = harness.run(&clock, &inspector, Duration::from_secs(3600));
        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(session.tick_count, 0);
        let final_artifact = harness.reports.load_final(&session.session_id).unwrap().unwrap();
        assert_eq!(final_artifact.summary.tick_count, 0);
        assert!(harness.reports.tick_files(&session.session_id).unwrap().is_empty());
    }

    #[test]
    fn run_once_ticks_immediately_and_finalizes() {
        let mut harness = Harness::new();
        let clock = ManualClock::new(at(12, 37, 5));
        let inspector = ScriptedInspector { duration: Duration::ZERO };
        let session = SessionRecord::new(PathBuf::from("/work"), clock.now_wall(), clock.now_monotonic_ns());
        let record = LifecycleRecord {
            pid: Some(std::process::id()),
            status: LifecycleStatus::Starting,
            started_at: clock.now_wall(),
            last_heartbeat_at: clock.now_wall(),
            session_id: session.session_id.clone(),
            workspace_root: PathBuf::from("/work"),
        };
        let mut scheduler = Scheduler::new(
            &clock,
            &inspector,
            &harness.reports,
            &mut harness.lifecycle,
            session,
            record,
            Duration::from_secs(3600),
            CancelToken::new(),
        );

        let path = scheduler.run_once().expect("tick written");
        assert!(path.ends_with("20261016_123705.json"));
        assert_eq!(scheduler.state(), SchedulerState::Finalized);
        let session_id = scheduler.session().session_id.clone();
        drop(scheduler);

        assert_eq!(harness.status().status, LifecycleStatus::Stopped);
        let final_artifact = harness.reports.load_final(&session_id).unwrap().unwrap();
        assert_eq!(final_artifact.summary.tick_count, 1);
    }
}
