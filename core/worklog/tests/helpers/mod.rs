//! Shared fixtures for driving the real `worklog` binary.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

pub const BIN: &str = env!("CARGO_BIN_EXE_worklog");

/// A temporary workspace with its control directory at `.session_logs`.
pub struct TestWorkspace {
    _dir: TempDir,
    pub root: PathBuf,
}

impl TestWorkspace {
    pub fn plain() -> Self {
        let dir = TempDir::new().expect("create temp workspace");
        let root = dir.path().canonicalize().expect("canonicalize temp workspace");
        fs_err::write(root.join("README.md"), "# scratch\n").expect("seed file");
        Self { _dir: dir, root }
    }

    /// A git repository on branch `main` with one commit.
    pub fn git() -> Self {
        let ws = Self::plain();
        ws.git_cmd(&["init", "-q"]);
        ws.git_cmd(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        ws.commit("Initial import");
        ws
    }

    pub fn git_cmd(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=worklog", "-c", "user.email=worklog@example.com"])
            .args(args)
            .current_dir(&self.root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .expect("run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    pub fn commit(&self, subject: &str) {
        self.git_cmd(&["add", "-A", "--", ".", ":!.session_logs"]);
        self.git_cmd(&["commit", "-q", "--allow-empty", "-m", subject]);
    }

    pub fn control(&self) -> PathBuf {
        self.root.join(".session_logs")
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(BIN);
        command
            .args(args)
            .current_dir(&self.root)
            .env("WORKSPACE_ROOT", &self.root)
            .env("TICK_INTERVAL_SECONDS", "1")
            .env_remove("CONTROL_DIR")
            .env_remove("RUST_LOG")
            .env_remove("WORKLOG_DEBUG_LOG")
            .stdin(Stdio::null());
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run worklog")
    }

    pub fn status(&self) -> Option<Value> {
        let raw = fs_err::read_to_string(self.control().join("status/current.json")).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn status_field(&self, field: &str) -> Option<String> {
        self.status()?
            .get(field)?
            .as_str()
            .map(str::to_string)
    }

    pub fn pid_file_pid(&self) -> Option<u32> {
        fs_err::read_to_string(self.control().join("pid"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn sessions(&self) -> Vec<String> {
        let Ok(entries) = fs_err::read_dir(self.control().join("summaries")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.control().join("summaries").join(session_id)
    }

    /// Tick artifact paths for a session, oldest first.
    pub fn tick_files(&self, session_id: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs_err::read_dir(self.session_dir(session_id)) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && path.file_stem().is_some_and(|stem| stem != "final")
            })
            .collect();
        files.sort();
        files
    }

    pub fn read_json(path: &Path) -> Value {
        let raw = fs_err::read_to_string(path).expect("read artifact");
        serde_json::from_str(&raw).expect("parse artifact")
    }

    pub fn log(&self) -> String {
        fs_err::read_to_string(self.control().join("daemon.log")).unwrap_or_default()
    }
}

/// Kills whatever daemon the workspace's PID file names when dropped.
pub struct DaemonGuard<'a> {
    ws: &'a TestWorkspace,
}

impl<'a> DaemonGuard<'a> {
    pub fn new(ws: &'a TestWorkspace) -> Self {
        Self { ws }
    }
}

impl Drop for DaemonGuard<'_> {
    fn drop(&mut self) {
        if let Some(pid) = self.ws.pid_file_pid() {
            if pid != std::process::id() {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGKILL);
                }
            }
        }
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    condition()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
