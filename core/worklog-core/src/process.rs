//! Process-table helpers: liveness checks and signal delivery.
//!
//! A bare `kill(pid, 0)` is not enough to trust a pid from the status
//! document. The pid may belong to an unreaped zombie, or it may have been
//! recycled for an unrelated process since the daemon died. [`is_daemon_alive`]
//! rules out both with sysinfo.

use std::cell::RefCell;
use std::io;

use crate::clock::WallTime;

/// Slack between the kernel's process start time and the recorded
/// `started_at` (the daemon writes its record shortly after exec).
const START_TIME_TOLERANCE_SECS: i64 = 2;

// Reuse one System per thread and refresh single pids only; a full process
// scan is O(n) in the size of the process table.
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<sysinfo::System>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// True if a process with `pid` exists (zombies included).
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

struct ProcessInfo {
    start_time: u64,
    zombie: bool,
}

fn process_info(pid: u32) -> Option<ProcessInfo> {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);
        let sysinfo_pid = Pid::from(pid as usize);
        if !sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new()) {
            return None;
        }
        sys.process(sysinfo_pid).map(|process| ProcessInfo {
            start_time: process.start_time(),
            zombie: matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        })
    })
}

/// True if `pid` is a running (non-zombie) process that could be the daemon
/// which recorded `started_at`.
///
/// A process that started after `started_at` (beyond a small tolerance) is a
/// recycled pid, not our daemon.
pub fn is_daemon_alive(pid: u32, started_at: &WallTime) -> bool {
    if !is_pid_alive(pid) {
        return false;
    }
    match process_info(pid) {
        Some(info) if info.zombie => false,
        Some(info) => {
            let Ok(actual) = i64::try_from(info.start_time) else {
                return false;
            };
            actual <= started_at.timestamp() + START_TIME_TOLERANCE_SECS
        }
        // kill(0) succeeded but the process table has no entry we can read;
        // trust the kernel.
        None => true,
    }
}

pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let raw = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: plain syscall; failure is reported through errno.
    let rc = unsafe { libc::kill(raw, signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
