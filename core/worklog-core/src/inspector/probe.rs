//! Bounded external process invocation.
//!
//! Output is captured into anonymous temp files rather than pipes, so a chatty
//! child can never fill a pipe buffer and stall while we poll `try_wait`.

use std::ffi::OsStr;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Why a probe produced no usable result. Rendered into the snapshot, never
/// propagated out of the inspector.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{program} unavailable: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{probe} timed out after {}s", .timeout.as_secs())]
    Timeout { probe: String, timeout: Duration },

    #[error("{probe} failed ({status}): {stderr}")]
    Failed {
        probe: String,
        status: String,
        stderr: String,
    },

    #[error("{probe}: {source}")]
    Io {
        probe: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{probe} skipped: shutdown in progress")]
    Cancelled { probe: String },
}

#[derive(Debug)]
pub struct ProbeOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProbeOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// One external command with a hard wall-clock budget.
pub struct Probe<'a> {
    pub label: &'a str,
    pub program: &'a OsStr,
    pub cwd: &'a Path,
    pub timeout: Duration,
}

impl Probe<'_> {
    /// Runs to completion or kills the child at the deadline.
    ///
    /// A non-zero exit is returned as `Ok`; callers decide which codes are
    /// meaningful.
    pub fn run<I, S>(&self, args: I, envs: &[(&str, &str)]) -> Result<ProbeOutput, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let io_err = |source: std::io::Error| ProbeError::Io {
            probe: self.label.to_string(),
            source,
        };

        let mut stdout = tempfile::tempfile().map_err(io_err)?;
        let mut stderr = tempfile::tempfile().map_err(io_err)?;

        let mut command = Command::new(self.program);
        command
            .args(args)
            .current_dir(self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone().map_err(io_err)?))
            .stderr(Stdio::from(stderr.try_clone().map_err(io_err)?));
        for (key, value) in envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ProbeError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProbeError::Timeout {
                        probe: self.label.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(io_err(source));
                }
            }
        };

        Ok(ProbeOutput {
            status,
            stdout: read_back(&mut stdout).map_err(io_err)?,
            stderr: read_back(&mut stderr).map_err(io_err)?,
        })
    }
}

fn read_back(file: &mut std::fs::File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
