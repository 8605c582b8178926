//! Error types for worklog-core operations.
//!
//! Inspection failures never surface here: they are recorded into the
//! snapshot instead (see [`crate::inspector::ProbeError`]).

use std::path::PathBuf;

/// All errors that can escape a worklog-core operation.
#[derive(Debug, thiserror::Error)]
pub enum WorklogError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("PID file is locked by a live daemon: {0}")]
    LockContention(PathBuf),

    #[error("Failed to spawn daemon process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Daemon did not acquire the PID file within {}s", .0.as_secs())]
    HandshakeTimeout(std::time::Duration),

    #[error("Daemon exited during startup: {0}")]
    StartupFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WorklogError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WorklogError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        WorklogError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using WorklogError.
pub type Result<T> = std::result::Result<T, WorklogError>;

impl From<WorklogError> for String {
    fn from(err: WorklogError) -> String {
        err.to_string()
    }
}
