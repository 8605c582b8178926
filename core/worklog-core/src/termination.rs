//! Signal handling and the cooperative cancel token.
//!
//! Handlers never do work themselves: they flip an `AtomicBool` that the main
//! loop polls at its two suspension points (the hourly sleep and the inspector
//! probes). Everything after that happens on the main thread, including the
//! final-shutdown sequence in [`run_final_shutdown`].
//!
//! | signal | daemon mode | foreground mode |
//! |--------|-------------|-----------------|
//! | TERM   | cancel      | cancel          |
//! | INT    | cancel      | cancel          |
//! | HUP    | ignored     | cancel          |
//!
//! KILL cannot be caught; the supervisor detects it on the next `start`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::SigId;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{Result, WorklogError};
use crate::inspector::Inspect;
use crate::session::SessionRecord;
use crate::store::{LifecycleStore, ReportStore};
use crate::types::{LifecycleRecord, LifecycleStatus, SessionSummary};

/// Upper bound on the last inspection taken during a clean shutdown.
pub const FINAL_INSPECTION_BUDGET: Duration = Duration::from_secs(5);

/// Shared flag observed by the scheduler. Cloning shares the flag.
///
/// A token may also carry a deadline, after which it reads as cancelled
/// whether or not anyone called [`CancelToken::cancel`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token that cancels itself once `budget` has elapsed.
    pub fn expiring_after(budget: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Detached from the terminal; hangup must not stop us.
    Daemon,
    /// Attached to a terminal; hangup means the user went away.
    Foreground,
}

/// Registered signal handlers. Dropping it unregisters them.
pub struct TerminationHandler {
    cancel: CancelToken,
    hangup_seen: Arc<AtomicBool>,
    registrations: Vec<SigId>,
}

impl TerminationHandler {
    pub fn install(mode: RunMode, cancel: CancelToken) -> Result<Self> {
        let hangup_seen = Arc::new(AtomicBool::new(false));
        let mut registrations = Vec::with_capacity(3);

        for signal in [SIGTERM, SIGINT] {
            let id = signal_hook::flag::register(signal, cancel.flag())
                .map_err(|e| WorklogError::io(format!("registering signal {}", signal), e))?;
            registrations.push(id);
        }

        // With a handler registered the default "terminate" action never runs,
        // so routing HUP into a flag nobody acts on is how it gets ignored.
        let hup_target = match mode {
            RunMode::Daemon => Arc::clone(&hangup_seen),
            RunMode::Foreground => cancel.flag(),
        };
        let id = signal_hook::flag::register(SIGHUP, hup_target)
            .map_err(|e| WorklogError::io("registering SIGHUP", e))?;
        registrations.push(id);

        info!(mode = ?mode, "Termination handlers installed");
        Ok(Self {
            cancel,
            hangup_seen,
            registrations,
        })
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// True if a hangup arrived and was swallowed (daemon mode only).
    pub fn hangup_ignored(&self) -> bool {
        self.hangup_seen.load(Ordering::SeqCst)
    }
}

impl Drop for TerminationHandler {
    fn drop(&mut self) {
        for id in self.registrations.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Everything the final-shutdown sequence touches.
pub struct ShutdownContext<'a> {
    pub clock: &'a dyn Clock,
    pub inspector: &'a dyn Inspect,
    pub reports: &'a ReportStore,
    pub lifecycle: &'a mut LifecycleStore,
    pub session: &'a SessionRecord,
    pub record: &'a mut LifecycleRecord,
}

/// Clean shutdown: one last inspection, `final.json`, status `stopped`, then
/// the PID and heartbeat files go away.
///
/// The last inspection gets [`FINAL_INSPECTION_BUDGET`]: probes stop being
/// started and the walk stops once it runs out, so a huge workspace cannot
/// hold `stop` past its TERM timeout.
///
/// Runs once the scheduler has drained. Further signals only re-set the
/// already-set token, so a second TERM during this sequence changes nothing.
pub fn run_final_shutdown(ctx: ShutdownContext<'_>) {
    let ShutdownContext {
        clock,
        inspector,
        reports,
        lifecycle,
        session,
        record,
    } = ctx;

    let budget = CancelToken::expiring_after(FINAL_INSPECTION_BUDGET);
    let snapshot = inspector.inspect(&session.workspace_root, clock, &budget);
    let finished_at = clock.now_wall();
    let summary = SessionSummary::from_session(session, finished_at, clock.now_monotonic_ns());

    match reports.write_final(&session.session_id, &snapshot, &summary) {
        Ok(path) => info!(
            session_id = %session.session_id,
            path = %path.display(),
            tick_count = summary.tick_count,
            "Final summary written"
        ),
        Err(err) => error!(
            session_id = %session.session_id,
            error = %err,
            "Failed to write final summary"
        ),
    }

    record.status = LifecycleStatus::Stopped;
    record.pid = None;
    record.last_heartbeat_at = finished_at;
    if let Err(err) = reports.update_status(record) {
        error!(error = %err, "Failed to record stopped status");
    }

    if let Err(err) = lifecycle.release_pid_file() {
        warn!(error = %err, "Failed to release PID file");
    }
    info!(session_id = %session.session_id, "Daemon stopped cleanly");
}

/// Voluntary shutdown after repeated write failures: status `crashed`, no
/// `final.json`, PID file released so the next `start` is not blocked.
pub fn run_crash_shutdown(
    clock: &dyn Clock,
    reports: &ReportStore,
    lifecycle: &mut LifecycleStore,
    record: &mut LifecycleRecord,
    reason: &str,
) {
    error!(session_id = %record.session_id, reason, "Daemon shutting down as crashed");
    record.status = LifecycleStatus::Crashed;
    record.pid = None;
    record.last_heartbeat_at = clock.now_wall();
    if let Err(err) = reports.update_status(record) {
        error!(error = %err, "Failed to record crashed status");
    }
    if let Err(err) = lifecycle.release_pid_file() {
        warn!(error = %err, "Failed to release PID file");
    }
}
