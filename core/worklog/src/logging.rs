//! Log sinks for the CLI and the detached daemon.
//!
//! Every command appends to `<control_dir>/daemon.log` so recovery warnings
//! emitted by `start` land next to the daemon's own lines. Interactive
//! commands also log to stderr.

use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use worklog_core::ControlPaths;

const DEBUG_ENV: &str = "WORKLOG_DEBUG_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Detached daemon: file only. Its stderr already points at the same file.
    FileOnly,
    FileAndStderr,
    StderrOnly,
}

pub fn init(control: Option<&ControlPaths>, sink: Sink) {
    let file_layer = match (control, sink) {
        (Some(paths), Sink::FileOnly | Sink::FileAndStderr) => {
            match fs_err::create_dir_all(paths.root()) {
                Ok(()) => {
                    let appender = tracing_appender::rolling::never(paths.root(), paths.log_file_name());
                    Some(fmt::layer().with_ansi(false).with_writer(appender))
                }
                Err(err) => {
                    eprintln!("worklog: cannot open log directory: {}", err);
                    None
                }
            }
        }
        _ => None,
    };
    let stderr_layer = match sink {
        Sink::FileOnly => None,
        Sink::FileAndStderr | Sink::StderrOnly => {
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false))
        }
    };

    tracing_subscriber::registry()
        .with(filter())
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
