//! PID file, heartbeat and status document.
//!
//! The PID file carries an exclusive advisory lock (flock) for the daemon's
//! lifetime. The lock, not the file's presence, is what proves a daemon is
//! alive: a crashed daemon leaves the file behind but the kernel drops its
//! lock.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::Path;
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use tracing::{debug, warn};

use super::atomic::{atomic_write, atomic_write_json, ensure_dir};
use crate::config::ControlPaths;
use crate::error::{Result, WorklogError};
use crate::types::LifecycleRecord;

/// Rounds of open-then-lock before giving up on a PID file that keeps being
/// replaced underneath us.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Contents and age of the heartbeat file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub monotonic_ns: u64,
    pub modified: SystemTime,
}

impl Heartbeat {
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.modified)
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug)]
pub struct LifecycleStore {
    paths: ControlPaths,
    /// Open, locked PID file while this process owns the control directory.
    pid_lock: Option<File>,
}

impl LifecycleStore {
    pub fn new(paths: ControlPaths) -> Self {
        Self {
            paths,
            pid_lock: None,
        }
    }

    pub fn paths(&self) -> &ControlPaths {
        &self.paths
    }

    /// The current status document. A missing or unreadable one is `None`.
    pub fn read(&self) -> Option<LifecycleRecord> {
        let path = self.paths.status_file();
        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(error = %err, "Failed to read status document");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Ignoring corrupt status document");
                None
            }
        }
    }

    pub fn write(&self, record: &LifecycleRecord) -> Result<()> {
        atomic_write_json(&self.paths.status_file(), record)
    }

    /// Rewrites the heartbeat file with `monotonic_ns`; its mtime is the
    /// wall-clock proof of life.
    pub fn mark_heartbeat(&self, monotonic_ns: u64) -> Result<()> {
        atomic_write(
            &self.paths.heartbeat_file(),
            format!("{}\n", monotonic_ns).as_bytes(),
        )
    }

    pub fn read_heartbeat(&self) -> Option<Heartbeat> {
        let path = self.paths.heartbeat_file();
        let content = fs_err::read_to_string(&path).ok()?;
        let monotonic_ns = content.trim().parse().ok()?;
        let modified = fs_err::metadata(&path).ok()?.modified().ok()?;
        Some(Heartbeat {
            monotonic_ns,
            modified,
        })
    }

    pub fn read_pid(&self) -> Option<u32> {
        fs_err::read_to_string(self.paths.pid_file())
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Takes the exclusive PID-file lock and records our pid in it.
    ///
    /// `Ok(false)` means another live process holds the lock.
    pub fn acquire_pid_file(&mut self) -> Result<bool> {
        if self.pid_lock.is_some() {
            return Ok(true);
        }
        ensure_dir(self.paths.root())?;
        let path = self.paths.pid_file();

        for _ in 0..ACQUIRE_ATTEMPTS {
            // No truncation before the lock is ours: a live peer's pid must
            // stay readable.
            let mut file = open_pid_file(&path)?;
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    debug!(path = %path.display(), "PID file is locked by another process");
                    return Ok(false);
                }
                Err(err) => return Err(WorklogError::io("locking PID file", err)),
            }

            // A peer's release may have unlinked the file between our open and
            // our lock; that inode is no longer the PID file.
            if !still_linked(&file, &path) {
                continue;
            }

            file.set_len(0)
                .map_err(|e| WorklogError::io("truncating PID file", e))?;
            writeln!(file, "{}", std::process::id())
                .map_err(|e| WorklogError::io("writing PID file", e))?;
            file.sync_all()
                .map_err(|e| WorklogError::io("syncing PID file", e))?;

            self.pid_lock = Some(file);
            return Ok(true);
        }
        Err(WorklogError::LockContention(path))
    }

    /// Unlinks the PID and heartbeat files, then drops the lock.
    pub fn release_pid_file(&mut self) -> Result<()> {
        remove_if_present(&self.paths.heartbeat_file())?;
        if self.pid_lock.is_some() {
            remove_if_present(&self.paths.pid_file())?;
        }
        if let Some(file) = self.pid_lock.take() {
            let _ = FileExt::unlock(&file);
        }
        Ok(())
    }

    pub fn holds_lock(&self) -> bool {
        self.pid_lock.is_some()
    }

    /// True if some process currently holds the PID-file lock.
    ///
    /// Never takes the lock for longer than the probe itself.
    pub fn is_locked_by_peer(&self) -> bool {
        let path = self.paths.pid_file();
        let file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(_) => return false,
        };
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(err) => err.kind() == ErrorKind::WouldBlock,
        }
    }

    /// Removes PID and heartbeat files left by a dead daemon.
    ///
    /// Only legal when no process holds the lock.
    pub fn clear_stale_files(&self) -> Result<()> {
        remove_if_present(&self.paths.heartbeat_file())?;
        remove_if_present(&self.paths.pid_file())
    }
}

impl Drop for LifecycleStore {
    fn drop(&mut self) {
        if let Some(file) = self.pid_lock.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

fn open_pid_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
        .map_err(|e| WorklogError::io(format!("opening PID file {}", path.display()), e))
}

fn still_linked(file: &File, path: &Path) -> bool {
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs_err::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(WorklogError::io("removing control file", err)),
    }
}
