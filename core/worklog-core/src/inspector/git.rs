//! Git probes: branch, porcelain status, recent subjects.
//!
//! Every failure lands in [`GitState::error`]. A directory that is not a
//! repository is not a failure: it yields an empty state with no error.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::probe::{Probe, ProbeError, ProbeOutput};
use crate::termination::CancelToken;
use crate::types::GitState;

pub const RECENT_SUBJECT_LIMIT: usize = 5;

// Keeps `git status` from refreshing the index, so inspection never writes
// into the workspace. LC_ALL pins the stderr wording we match on.
const GIT_ENV: &[(&str, &str)] = &[("GIT_OPTIONAL_LOCKS", "0"), ("LC_ALL", "C")];

pub struct GitProbes<'a> {
    pub program: &'a OsStr,
    pub workspace_root: &'a Path,
    /// Workspace-relative control directory, filtered out of the status lines.
    pub control_rel: Option<&'a str>,
    pub timeout: Duration,
}

enum Branch {
    Named(String),
    Detached,
    NotARepository,
}

impl GitProbes<'_> {
    pub fn collect(&self, cancel: &CancelToken) -> GitState {
        let mut state = GitState::default();
        let mut errors: Vec<String> = Vec::new();

        match self.branch(cancel) {
            Ok(Branch::NotARepository) => {
                debug!(workspace = %self.workspace_root.display(), "Workspace is not a git repository");
                return state;
            }
            Ok(Branch::Named(name)) => state.branch = name,
            Ok(Branch::Detached) => {}
            Err(err @ ProbeError::Spawn { .. }) => {
                // No git binary: the remaining probes would fail the same way.
                state.error = Some(err.to_string());
                return state;
            }
            Err(err) => errors.push(err.to_string()),
        }

        match self.dirty_entries(cancel) {
            Ok(entries) => state.dirty_entries = entries,
            Err(err) => errors.push(err.to_string()),
        }

        match self.recent_subjects(cancel) {
            Ok(subjects) => state.recent_subjects = subjects,
            Err(err) => errors.push(err.to_string()),
        }

        if !errors.is_empty() {
            state.error = Some(errors.join("; "));
        }
        state
    }

    fn run(&self, label: &str, args: &[&str], cancel: &CancelToken) -> Result<ProbeOutput, ProbeError> {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled {
                probe: label.to_string(),
            });
        }
        let probe = Probe {
            label,
            program: self.program,
            cwd: self.workspace_root,
            timeout: self.timeout,
        };
        let mut full_args = vec!["-c", "core.quotePath=false"];
        full_args.extend_from_slice(args);
        probe.run(full_args, GIT_ENV)
    }

    fn branch(&self, cancel: &CancelToken) -> Result<Branch, ProbeError> {
        let label = "git symbolic-ref";
        let output = self.run(label, &["symbolic-ref", "-q", "--short", "HEAD"], cancel)?;
        match output.code() {
            Some(0) => Ok(Branch::Named(output.stdout.trim().to_string())),
            Some(1) => Ok(Branch::Detached),
            _ if output.stderr.to_lowercase().contains("not a git repository") => {
                Ok(Branch::NotARepository)
            }
            _ => Err(failed(label, &output)),
        }
    }

    fn dirty_entries(&self, cancel: &CancelToken) -> Result<Vec<String>, ProbeError> {
        let label = "git status";
        let output = self.run(label, &["status", "--porcelain"], cancel)?;
        if !output.status.success() {
            return Err(failed(label, &output));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .filter(|line| !self.is_control_entry(line))
            .map(str::to_string)
            .collect())
    }

    fn recent_subjects(&self, cancel: &CancelToken) -> Result<Vec<String>, ProbeError> {
        let label = "git log";
        let limit = format!("-{}", RECENT_SUBJECT_LIMIT);
        let output = self.run(label, &["log", &limit, "--format=%s"], cancel)?;
        if !output.status.success() {
            // A fresh repository has a branch but no commits yet.
            if output.stderr.contains("does not have any commits") {
                return Ok(Vec::new());
            }
            return Err(failed(label, &output));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .take(RECENT_SUBJECT_LIMIT)
            .map(str::to_string)
            .collect())
    }

    /// Porcelain lines are `XY <path>`; the path starts at column 3.
    fn is_control_entry(&self, line: &str) -> bool {
        let Some(control) = self.control_rel else {
            return false;
        };
        let path = line.get(3..).unwrap_or("").trim_matches('"');
        let path = path.trim_end_matches('/');
        path == control || path.starts_with(&format!("{}/", control))
    }
}

fn failed(label: &str, output: &ProbeOutput) -> ProbeError {
    let status = match output.code() {
        Some(code) => format!("exit {}", code),
        None => "terminated by signal".to_string(),
    };
    ProbeError::Failed {
        probe: label.to_string(),
        status,
        stderr: output.stderr.trim().to_string(),
    }
}
