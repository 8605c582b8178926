//! User-facing lifecycle commands: start, stop, status, once.
//!
//! The supervisor only writes to the control directory when no daemon holds
//! the PID-file lock (recovery, KILL escalation). Everything else is the
//! daemon's to write.
//!
//! Startup handshake: `start` spawns the detached child and polls the PID file
//! until it names the child, which happens only after the child holds the
//! lock.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::clock::{compact, wait_for_fresh_second, Clock, SystemClock};
use crate::config::{DaemonConfig, CONTROL_DIR_ENV, WORKSPACE_ROOT_ENV};
use crate::error::{Result, WorklogError};
use crate::inspector::{Inspect, WorkspaceInspector};
use crate::process::{is_daemon_alive, send_signal, Signal};
use crate::scheduler::{LoopExit, Scheduler};
use crate::session::SessionRecord;
use crate::store::{ensure_dir, LifecycleStore, ReportStore};
use crate::termination::{CancelToken, RunMode, TerminationHandler};
use crate::types::{LifecycleRecord, LifecycleStatus};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the daemon process gets created. The default re-executes this binary
/// with the hidden `daemon` subcommand.
pub trait Spawner {
    fn spawn(&self, config: &DaemonConfig) -> io::Result<Child>;
}

/// Spawns `program daemon` detached from the controlling terminal: new
/// session, stdin from /dev/null, stdout and stderr appended to `daemon.log`,
/// working directory at the workspace root.
#[derive(Debug, Clone)]
pub struct DetachedSpawner {
    program: PathBuf,
}

impl DetachedSpawner {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| WorklogError::io("locating current executable", e))?;
        Ok(Self::new(program))
    }
}

impl Spawner for DetachedSpawner {
    fn spawn(&self, config: &DaemonConfig) -> io::Result<Child> {
        ensure_dir(config.control.root()).map_err(|e| io::Error::other(e.to_string()))?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.control.log_file())?;

        let mut command = Command::new(&self.program);
        command
            .arg("daemon")
            .env(WORKSPACE_ROOT_ENV, &config.workspace_root)
            .env(CONTROL_DIR_ENV, config.control.root())
            .current_dir(&config.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        // SAFETY: pre_exec runs between fork() and exec() in the child; setsid
        // is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        command.spawn()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32 },
    /// TERM was ignored past the deadline; KILL was sent.
    Killed { pid: u32 },
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    /// `status/current.json` exactly as found on disk.
    pub raw: Option<String>,
    pub record: Option<LifecycleRecord>,
    pub live: bool,
}

#[derive(Debug, Clone)]
pub struct OnceOutcome {
    pub session_id: String,
    /// `None` if the tick artifact could not be written.
    pub artifact: Option<PathBuf>,
}

/// Summary of an unclean exit found on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub session_id: String,
    pub previous_pid: Option<u32>,
    pub tick_files: usize,
}

pub struct Supervisor {
    config: DaemonConfig,
    reports: ReportStore,
    lifecycle: LifecycleStore,
    clock: Box<dyn Clock>,
    handshake_timeout: Duration,
    stop_timeout: Duration,
}

impl Supervisor {
    pub fn new(config: DaemonConfig) -> Self {
        let reports = ReportStore::new(config.control.clone());
        let lifecycle = LifecycleStore::new(config.control.clone());
        Self {
            config,
            reports,
            lifecycle,
            clock: Box::new(SystemClock::new()),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    // ─────────────────────────────────────────────────────────────────────
    // start
    // ─────────────────────────────────────────────────────────────────────

    pub fn start(&mut self, spawner: &dyn Spawner) -> Result<StartOutcome> {
        if let Some(pid) = self.healthy_daemon() {
            info!(pid, "Daemon already running");
            return Ok(StartOutcome::AlreadyRunning { pid: Some(pid) });
        }
        if self.lifecycle.is_locked_by_peer() {
            // Stale-looking status, but someone holds the lock: a daemon
            // between ticks on a suspended host, or a `once` in flight.
            let pid = self.lifecycle.read_pid();
            info!(pid = ?pid, "PID file lock is held; treating as running");
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        self.recover_unclean_exit()?;

        let mut child = spawner.spawn(&self.config).map_err(WorklogError::Spawn)?;
        let pid = child.id();
        debug!(pid, "Daemon process spawned; waiting for PID file");

        let deadline = Instant::now() + self.handshake_timeout;
        loop {
            if self.lifecycle.read_pid() == Some(pid) {
                info!(pid, "Daemon started");
                return Ok(StartOutcome::Started { pid });
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    if self.lifecycle.is_locked_by_peer() {
                        // Lost a race with another start.
                        return Ok(StartOutcome::AlreadyRunning {
                            pid: self.lifecycle.read_pid(),
                        });
                    }
                    return Err(WorklogError::StartupFailed(status.to_string()));
                }
                Ok(None) => {}
                Err(err) => return Err(WorklogError::io("polling daemon process", err)),
            }
            if Instant::now() >= deadline {
                error!(pid, "Daemon did not acquire the PID file in time");
                let _ = child.kill();
                let _ = child.wait();
                return Err(WorklogError::HandshakeTimeout(self.handshake_timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // stop
    // ─────────────────────────────────────────────────────────────────────

    pub fn stop(&mut self) -> Result<StopOutcome> {
        let Some((pid, started_at)) = self.stop_target() else {
            info!("Daemon not running");
            return Ok(StopOutcome::NotRunning);
        };

        info!(pid, "Sending TERM to daemon");
        if let Err(err) = send_signal(pid, Signal::Terminate) {
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(StopOutcome::NotRunning);
            }
            return Err(WorklogError::io("signalling daemon", err));
        }

        if self.wait_for_exit(pid, &started_at, self.stop_timeout) {
            info!(pid, "Daemon stopped");
            return Ok(StopOutcome::Stopped { pid });
        }

        warn!(
            pid,
            timeout_secs = self.stop_timeout.as_secs(),
            "Daemon ignored TERM; escalating to KILL"
        );
        if let Err(err) = send_signal(pid, Signal::Kill) {
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(WorklogError::io("killing daemon", err));
            }
        }
        self.wait_for_exit(pid, &started_at, Duration::from_secs(5));

        self.mark_killed(started_at)?;
        Ok(StopOutcome::Killed { pid })
    }

    /// Records a daemon we had to KILL as `crashed`.
    ///
    /// A missing or unreadable status document is replaced by a fresh record,
    /// attributed to the newest session on disk.
    fn mark_killed(&self, started_at: crate::clock::WallTime) -> Result<()> {
        let now = self.clock.now_wall();
        let mut record = match self.lifecycle.read() {
            Some(record) => record,
            None => {
                let session_id = match self.reports.list_sessions() {
                    Ok(mut sessions) => sessions.pop(),
                    Err(err) => {
                        warn!(error = %err, "Cannot list sessions for the crashed record");
                        None
                    }
                }
                .unwrap_or_else(|| compact(&started_at));
                warn!(
                    session_id = %session_id,
                    "Status document missing; writing a fresh crashed record"
                );
                LifecycleRecord {
                    pid: None,
                    status: LifecycleStatus::Crashed,
                    started_at,
                    last_heartbeat_at: now,
                    session_id,
                    workspace_root: self.config.workspace_root.clone(),
                }
            }
        };
        record.status = LifecycleStatus::Crashed;
        record.pid = None;
        record.last_heartbeat_at = now;
        self.lifecycle.write(&record)
    }

    // ─────────────────────────────────────────────────────────────────────
    // status
    // ─────────────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusReport {
        let raw = fs_err::read_to_string(self.config.control.status_file()).ok();
        let record = self.lifecycle.read();
        let live = record.as_ref().is_some_and(record_is_live);
        StatusReport { raw, record, live }
    }

    // ─────────────────────────────────────────────────────────────────────
    // once / daemon body
    // ─────────────────────────────────────────────────────────────────────

    /// One synchronous tick with the full lifecycle around it.
    ///
    /// Fails with [`WorklogError::LockContention`] while a daemon is running.
    pub fn once(&mut self, inspector: &dyn Inspect) -> Result<OnceOutcome> {
        let handler = TerminationHandler::install(RunMode::Foreground, CancelToken::new())?;
        let (session, record) = self.begin_session()?;
        let session_id = session.session_id.clone();

        let mut scheduler = Scheduler::new(
            self.clock.as_ref(),
            inspector,
            &self.reports,
            &mut self.lifecycle,
            session,
            record,
            self.config.tick_interval,
            handler.cancel_token().clone(),
        );
        let artifact = scheduler.run_once();
        Ok(OnceOutcome {
            session_id,
            artifact,
        })
    }

    /// The daemon process body: lock, new session, scheduler loop, shutdown.
    pub fn run_daemon(&mut self, mode: RunMode, inspector: &dyn Inspect) -> Result<LoopExit> {
        // Handlers first, so a TERM during startup still shuts down cleanly.
        let handler = TerminationHandler::install(mode, CancelToken::new())?;
        let (session, record) = self.begin_session()?;

        let mut scheduler = Scheduler::new(
            self.clock.as_ref(),
            inspector,
            &self.reports,
            &mut self.lifecycle,
            session,
            record,
            self.config.tick_interval,
            handler.cancel_token().clone(),
        );
        let exit = scheduler.run();
        if handler.hangup_ignored() {
            debug!("Hangup was received and ignored during this session");
        }
        Ok(exit)
    }

    /// Default inspector for this workspace.
    pub fn inspector(&self) -> WorkspaceInspector {
        WorkspaceInspector::new().with_control_dir(self.config.control.root().to_path_buf())
    }

    /// Takes the lock, handles any unclean predecessor, and records
    /// `starting` for a fresh session.
    fn begin_session(&mut self) -> Result<(SessionRecord, LifecycleRecord)> {
        ensure_dir(self.config.control.root())?;
        if !self.lifecycle.acquire_pid_file()? {
            return Err(WorklogError::LockContention(self.config.control.pid_file()));
        }

        if let Err(err) = self.recover_unclean_exit() {
            let _ = self.lifecycle.release_pid_file();
            return Err(err);
        }
        if let Some(previous) = self.lifecycle.read() {
            wait_for_fresh_second(self.clock.as_ref(), &previous.last_heartbeat_at);
        }

        let started_at = self.clock.now_wall();
        let session = SessionRecord::new(
            self.config.workspace_root.clone(),
            started_at,
            self.clock.now_monotonic_ns(),
        );
        let record = LifecycleRecord {
            pid: Some(std::process::id()),
            status: LifecycleStatus::Starting,
            started_at,
            last_heartbeat_at: started_at,
            session_id: session.session_id.clone(),
            workspace_root: self.config.workspace_root.clone(),
        };
        if let Err(err) = self.reports.update_status(&record) {
            let _ = self.lifecycle.release_pid_file();
            return Err(err);
        }
        info!(
            session_id = %session.session_id,
            pid = std::process::id(),
            workspace = %self.config.workspace_root.display(),
            "Session starting"
        );
        Ok((session, record))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────

    /// Marks a predecessor that died without shutting down as `crashed`.
    ///
    /// Must only run when no live daemon holds the lock (either nobody does,
    /// or we do).
    pub fn recover_unclean_exit(&mut self) -> Result<Option<Recovery>> {
        let Some(mut record) = self.lifecycle.read() else {
            return Ok(None);
        };
        if !record.status.claims_live_process() || self.is_own_record(&record) {
            return Ok(None);
        }

        let tick_files = self
            .reports
            .tick_files(&record.session_id)
            .map(|files| files.len())
            .unwrap_or(0);
        warn!(
            session_id = %record.session_id,
            previous_status = %record.status,
            previous_pid = ?record.pid,
            tick_files,
            "Detected unclean previous exit; marking session crashed"
        );

        let recovery = Recovery {
            session_id: record.session_id.clone(),
            previous_pid: record.pid,
            tick_files,
        };
        record.status = LifecycleStatus::Crashed;
        record.pid = None;
        self.lifecycle.write(&record)?;
        if !self.lifecycle.holds_lock() {
            self.lifecycle.clear_stale_files()?;
        }
        Ok(Some(recovery))
    }

    fn is_own_record(&self, record: &LifecycleRecord) -> bool {
        self.lifecycle.holds_lock() && record.pid == Some(std::process::id())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Liveness
    // ─────────────────────────────────────────────────────────────────────

    /// Pid of a daemon that is alive and has a fresh heartbeat.
    fn healthy_daemon(&self) -> Option<u32> {
        let record = self.lifecycle.read()?;
        if !record_is_live(&record) {
            return None;
        }
        let threshold = self.config.staleness_threshold();
        let fresh = match self.lifecycle.read_heartbeat() {
            Some(heartbeat) => heartbeat.age() < threshold,
            None => {
                let age = self.clock.now_wall() - record.last_heartbeat_at;
                age.to_std().map(|age| age < threshold).unwrap_or(true)
            }
        };
        if !fresh {
            warn!(session_id = %record.session_id, "Daemon heartbeat is stale");
            return None;
        }
        record.pid
    }

    /// The pid `stop` should signal, with the start time used to recognise it.
    fn stop_target(&self) -> Option<(u32, crate::clock::WallTime)> {
        let record = self.lifecycle.read();
        if let Some(record) = record.as_ref().filter(|r| record_is_live(r)) {
            return record.pid.map(|pid| (pid, record.started_at));
        }
        // Status lost or already final, but a lock holder may still be around.
        if self.lifecycle.is_locked_by_peer() {
            let pid = self.lifecycle.read_pid()?;
            let started_at = record
                .map(|r| r.started_at)
                .unwrap_or_else(|| self.clock.now_wall());
            if is_daemon_alive(pid, &started_at) {
                return Some((pid, started_at));
            }
        }
        None
    }

    fn wait_for_exit(&self, pid: u32, started_at: &crate::clock::WallTime, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !is_daemon_alive(pid, started_at) {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        !is_daemon_alive(pid, started_at)
    }
}

/// Status claims a live process and that process exists.
fn record_is_live(record: &LifecycleRecord) -> bool {
    record.status.claims_live_process()
        && record
            .pid
            .is_some_and(|pid| is_daemon_alive(pid, &record.started_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlPaths;
    use chrono::Local;

    fn config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            workspace_root: dir.to_path_buf(),
            control: ControlPaths::with_root(dir.join(".session_logs")),
            tick_interval: Duration::from_secs(3600),
        }
    }

    fn record(status: LifecycleStatus, pid: Option<u32>) -> LifecycleRecord {
        let now = Local::now().fixed_offset();
        LifecycleRecord {
            pid,
            status,
            started_at: now,
            last_heartbeat_at: now,
            session_id: "20261016_120000".to_string(),
            workspace_root: PathBuf::from("/work"),
        }
    }

    /// Writes the pid file the way a daemon would, then idles.
    struct ScriptSpawner {
        script: &'static str,
    }

    impl Spawner for ScriptSpawner {
        fn spawn(&self, config: &DaemonConfig) -> io::Result<Child> {
            Command::new("sh")
                .arg("-c")
                .arg(self.script)
                .arg("sh")
                .arg(config.control.pid_file())
                .stdin(Stdio::null())
                .spawn()
        }
    }

    #[test]
    fn recovery_marks_dead_running_record_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        // A pid that cannot exist.
        supervisor
            .lifecycle
            .write(&record(LifecycleStatus::Running, Some(u32::MAX / 2)))
            .unwrap();
        std::fs::write(supervisor.config.control.pid_file(), "12345\n").unwrap();

        let recovery = supervisor.recover_unclean_exit().unwrap().expect("recovered");
        assert_eq!(recovery.session_id, "20261016_120000");
        let status = supervisor.lifecycle.read().unwrap();
        assert_eq!(status.status, LifecycleStatus::Crashed);
        assert_eq!(status.pid, None);
        assert!(!supervisor.config.control.pid_file().exists());
    }

    #[test]
    fn clean_records_need_no_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        supervisor
            .lifecycle
            .write(&record(LifecycleStatus::Stopped, None))
            .unwrap();
        assert_eq!(supervisor.recover_unclean_exit().unwrap(), None);
    }

    #[test]
    fn status_reports_live_flag() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(config(dir.path()));
        assert!(supervisor.status().raw.is_none());

        supervisor
            .lifecycle
            .write(&record(LifecycleStatus::Running, Some(std::process::id())))
            .unwrap();
        let report = supervisor.status();
        assert!(report.live);
        assert!(report.raw.unwrap().contains("\"status\": \"running\""));

        supervisor
            .lifecycle
            .write(&record(LifecycleStatus::Stopped, None))
            .unwrap();
        assert!(!supervisor.status().live);
    }

    #[test]
    fn stop_without_daemon_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
    }

    #[test]
    fn stop_escalates_to_kill_when_term_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor =
            Supervisor::new(config(dir.path())).with_stop_timeout(Duration::from_millis(300));
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; exec sleep 30")
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        supervisor
            .lifecycle
            .write(&record(LifecycleStatus::Running, Some(child.id())))
            .unwrap();

        let outcome = supervisor.stop().unwrap();
        let _ = child.wait();
        assert_eq!(outcome, StopOutcome::Killed { pid: child.id() });
        let status = supervisor.lifecycle.read().unwrap();
        assert_eq!(status.status, LifecycleStatus::Crashed);
        assert_eq!(status.pid, None);
    }

    #[test]
    fn killed_daemon_without_status_gets_a_crashed_record() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(config(dir.path()));
        ensure_dir(&supervisor.config.control.session_dir("20261016_090000")).unwrap();
        ensure_dir(&supervisor.config.control.session_dir("20261016_120000")).unwrap();
        assert!(supervisor.lifecycle.read().is_none());

        let started_at = Local::now().fixed_offset();
        supervisor.mark_killed(started_at).unwrap();

        let status = supervisor.lifecycle.read().expect("crashed record written");
        assert_eq!(status.status, LifecycleStatus::Crashed);
        assert_eq!(status.pid, None);
        assert_eq!(status.session_id, "20261016_120000");
        assert_eq!(status.workspace_root, dir.path());
    }

    #[test]
    fn killed_daemon_with_corrupt_status_gets_a_crashed_record() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(config(dir.path()));
        ensure_dir(&supervisor.config.control.status_dir()).unwrap();
        std::fs::write(supervisor.config.control.status_file(), "{\"status\": ").unwrap();

        let started_at = Local::now().fixed_offset();
        supervisor.mark_killed(started_at).unwrap();

        let status = supervisor.lifecycle.read().expect("crashed record written");
        assert_eq!(status.status, LifecycleStatus::Crashed);
        assert_eq!(status.session_id, compact(&started_at));
    }

    #[test]
    fn start_completes_handshake_when_pid_file_names_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        ensure_dir(supervisor.config.control.root()).unwrap();
        let spawner = ScriptSpawner {
            script: "echo $$ > \"$1\"; sleep 2",
        };
        match supervisor.start(&spawner).unwrap() {
            StartOutcome::Started { pid } => {
                assert_eq!(supervisor.lifecycle.read_pid(), Some(pid));
                let _ = send_signal(pid, Signal::Kill);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn start_reports_child_that_exits_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        let spawner = ScriptSpawner { script: "exit 3" };
        assert!(matches!(
            supervisor.start(&spawner),
            Err(WorklogError::StartupFailed(_))
        ));
    }

    #[test]
    fn start_times_out_without_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor =
            Supervisor::new(config(dir.path())).with_handshake_timeout(Duration::from_millis(300));
        let spawner = ScriptSpawner { script: "sleep 5" };
        assert!(matches!(
            supervisor.start(&spawner),
            Err(WorklogError::HandshakeTimeout(_))
        ));
    }

    #[test]
    fn start_with_lock_held_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut holder = LifecycleStore::new(cfg.control.clone());
        assert!(holder.acquire_pid_file().unwrap());

        let mut supervisor = Supervisor::new(cfg);
        let spawner = ScriptSpawner { script: "exit 0" };
        assert_eq!(
            supervisor.start(&spawner).unwrap(),
            StartOutcome::AlreadyRunning {
                pid: Some(std::process::id())
            }
        );
    }

    #[test]
    fn once_writes_tick_and_final() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        let inspector = supervisor.inspector();

        let outcome = supervisor.once(&inspector).unwrap();
        assert!(outcome.artifact.unwrap().exists());
        let final_artifact = supervisor
            .reports()
            .load_final(&outcome.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(final_artifact.summary.tick_count, 1);
        let status = supervisor.lifecycle.read().unwrap();
        assert_eq!(status.status, LifecycleStatus::Stopped);
        assert!(!supervisor.config.control.pid_file().exists());
    }

    #[test]
    fn once_is_refused_while_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut holder = LifecycleStore::new(cfg.control.clone());
        assert!(holder.acquire_pid_file().unwrap());

        let mut supervisor = Supervisor::new(cfg);
        let inspector = supervisor.inspector();
        assert!(matches!(
            supervisor.once(&inspector),
            Err(WorklogError::LockContention(_))
        ));
    }

    #[test]
    fn consecutive_once_runs_get_distinct_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(config(dir.path()));
        let inspector = supervisor.inspector();
        let first = supervisor.once(&inspector).unwrap();
        let second = supervisor.once(&inspector).unwrap();
        assert!(second.session_id > first.session_id);
    }
}
