//! Configuration and control-directory path management.
//!
//! Resolution order for every setting: explicit value (CLI flag), then the
//! environment, then the default.
//!
//! | setting        | env                     | default                        |
//! |----------------|-------------------------|--------------------------------|
//! | workspace root | `WORKSPACE_ROOT`        | `git rev-parse --show-toplevel`, else cwd |
//! | control dir    | `CONTROL_DIR`           | `<workspace>/.session_logs`    |
//! | tick interval  | `TICK_INTERVAL_SECONDS` | 3600                           |
//!
//! `TICK_INTERVAL_SECONDS` exists for tests; production never sets it.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Result, WorklogError};

pub const WORKSPACE_ROOT_ENV: &str = "WORKSPACE_ROOT";
pub const CONTROL_DIR_ENV: &str = "CONTROL_DIR";
pub const TICK_INTERVAL_ENV: &str = "TICK_INTERVAL_SECONDS";

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_CONTROL_DIR_NAME: &str = ".session_logs";

/// Every path under the control directory.
///
/// ```text
/// <control_dir>/
///   pid
///   heartbeat
///   status/current.json
///   summaries/<session_id>/<YYYYmmdd_HHMMSS>.json
///   summaries/<session_id>/final.json
///   daemon.log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPaths {
    root: PathBuf,
}

impl ControlPaths {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("pid")
    }

    pub fn heartbeat_file(&self) -> PathBuf {
        self.root.join("heartbeat")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }

    pub fn status_file(&self) -> PathBuf {
        self.status_dir().join("current.json")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.summaries_dir().join(session_id)
    }

    pub fn tick_file(&self, session_id: &str, captured_compact: &str) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{}.json", captured_compact))
    }

    pub fn final_file(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("final.json")
    }

    pub fn log_file_name(&self) -> &'static str {
        "daemon.log"
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(self.log_file_name())
    }
}

/// Resolved daemon settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub workspace_root: PathBuf,
    pub control: ControlPaths,
    pub tick_interval: Duration,
}

/// Values supplied on the command line; `None` falls through to env/defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workspace_root: Option<PathBuf>,
    pub control_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        let cwd = env::current_dir()
            .map_err(|e| WorklogError::io("reading current directory", e))?;

        let workspace_root = match overrides.workspace_root.or_else(|| env_path(WORKSPACE_ROOT_ENV)) {
            Some(path) => absolutize(&cwd, path),
            None => detect_workspace_root(&cwd),
        };
        if !workspace_root.is_dir() {
            return Err(WorklogError::InvalidConfig(format!(
                "workspace root {} is not a directory",
                workspace_root.display()
            )));
        }
        let workspace_root = fs_err::canonicalize(&workspace_root)
            .map_err(|e| WorklogError::io("canonicalizing workspace root", e))?;

        let control_root = match overrides.control_dir.or_else(|| env_path(CONTROL_DIR_ENV)) {
            Some(path) => absolutize(&cwd, path),
            None => workspace_root.join(DEFAULT_CONTROL_DIR_NAME),
        };

        let tick_interval = parse_tick_interval(env::var(TICK_INTERVAL_ENV).ok().as_deref())?;

        Ok(Self {
            workspace_root,
            control: ControlPaths::with_root(control_root),
            tick_interval,
        })
    }

    /// Builds a config directly; used by tests and embedders.
    pub fn new(workspace_root: PathBuf, control_root: PathBuf, tick_interval: Duration) -> Self {
        Self {
            workspace_root,
            control: ControlPaths::with_root(control_root),
            tick_interval,
        }
    }

    /// A heartbeat older than this means the daemon stopped ticking.
    pub fn staleness_threshold(&self) -> Duration {
        self.tick_interval * 2
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

/// Top of the enclosing git working copy, or `cwd` when there is none.
fn detect_workspace_root(cwd: &Path) -> PathBuf {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if top.is_empty() {
                cwd.to_path_buf()
            } else {
                PathBuf::from(top)
            }
        }
        _ => cwd.to_path_buf(),
    }
}

pub fn parse_tick_interval(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS));
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(WorklogError::InvalidConfig(format!(
            "{} must be a positive integer, got {:?}",
            TICK_INTERVAL_ENV, raw
        ))),
    }
}
