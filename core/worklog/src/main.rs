//! worklog: hourly work-summary recorder for one workspace.
//!
//! ## Subcommands
//!
//! - `start`: spawn the detached daemon (or run it in the foreground)
//! - `stop`: TERM the daemon, escalating to KILL after 30 s
//! - `status`: print the status document and whether the daemon is live
//! - `once`: record a single tick synchronously
//! - `report`: Markdown digest of a recorded session
//! - `prune`: delete old session directories
//! - `daemon`: daemon body (spawned internally by `start`)

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use worklog_core::{
    latest_session, ConfigOverrides, DaemonConfig, DetachedSpawner, LoopExit, RunMode,
    SessionDigest, StartOutcome, StopOutcome, Supervisor, WorklogError,
};

#[derive(Parser)]
#[command(name = "worklog")]
#[command(about = "Hourly work-summary daemon")]
#[command(version)]
struct Cli {
    /// Workspace to inspect (default: enclosing git repository, else the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,

    /// Control directory (default: <workspace>/.session_logs)
    #[arg(long, global = true, value_name = "PATH")]
    control_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Run in this process instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show the status document and a live flag
    Status,

    /// Record one tick now and exit
    Once,

    /// Render a Markdown digest of a session
    Report {
        /// Session id (default: the most recent)
        #[arg(long)]
        session: Option<String>,
    },

    /// Delete the oldest session directories
    Prune {
        /// Number of sessions to keep
        #[arg(long)]
        keep: usize,
    },

    /// Daemon body (spawned by `start`)
    #[command(hide = true)]
    Daemon,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        workspace_root: cli.workspace.clone(),
        control_dir: cli.control_dir.clone(),
    };
    let sink = match cli.command {
        Commands::Daemon => logging::Sink::FileOnly,
        Commands::Report { .. } | Commands::Status => logging::Sink::StderrOnly,
        _ => logging::Sink::FileAndStderr,
    };

    let config = match DaemonConfig::resolve(overrides) {
        Ok(config) => config,
        Err(err) => {
            logging::init(None, logging::Sink::StderrOnly);
            error!(error = %err, "Failed to resolve configuration");
            return ExitCode::from(1);
        }
    };
    logging::init(Some(&config.control), sink);

    let mut supervisor = Supervisor::new(config);
    let code = match cli.command {
        Commands::Start { foreground: false } => start(&mut supervisor),
        Commands::Start { foreground: true } => run_daemon(&mut supervisor, RunMode::Foreground),
        Commands::Daemon => run_daemon(&mut supervisor, RunMode::Daemon),
        Commands::Stop => stop(&mut supervisor),
        Commands::Status => status(&supervisor),
        Commands::Once => once(&mut supervisor),
        Commands::Report { session } => report(&supervisor, session),
        Commands::Prune { keep } => prune(&supervisor, keep),
    };
    ExitCode::from(code)
}

fn start(supervisor: &mut Supervisor) -> u8 {
    let spawner = match DetachedSpawner::current_exe() {
        Ok(spawner) => spawner,
        Err(err) => {
            error!(error = %err, "Cannot locate worklog executable");
            return 1;
        }
    };
    match supervisor.start(&spawner) {
        Ok(StartOutcome::Started { pid }) => {
            println!("started (pid {})", pid);
            0
        }
        Ok(StartOutcome::AlreadyRunning { pid }) => {
            match pid {
                Some(pid) => println!("already running (pid {})", pid),
                None => println!("already running"),
            }
            0
        }
        Err(err @ WorklogError::HandshakeTimeout(_)) => {
            error!(error = %err, "Daemon start timed out");
            2
        }
        Err(err) => {
            error!(error = %err, "Daemon start failed");
            1
        }
    }
}

fn run_daemon(supervisor: &mut Supervisor, mode: RunMode) -> u8 {
    let inspector = supervisor.inspector();
    match supervisor.run_daemon(mode, &inspector) {
        Ok(LoopExit::Cancelled) => 0,
        Ok(LoopExit::WriteFailures) => {
            error!("Daemon stopped after repeated write failures");
            1
        }
        Err(WorklogError::LockContention(path)) => {
            warn!(path = %path.display(), "Another daemon holds the PID file");
            println!("already running");
            0
        }
        Err(err) => {
            error!(error = %err, "Daemon failed to start");
            1
        }
    }
}

fn stop(supervisor: &mut Supervisor) -> u8 {
    match supervisor.stop() {
        Ok(StopOutcome::NotRunning) => {
            println!("not running");
            0
        }
        Ok(StopOutcome::Stopped { pid }) => {
            println!("stopped (pid {})", pid);
            0
        }
        Ok(StopOutcome::Killed { pid }) => {
            println!("killed (pid {}): daemon ignored TERM", pid);
            1
        }
        Err(err) => {
            error!(error = %err, "Daemon stop failed");
            1
        }
    }
}

fn status(supervisor: &Supervisor) -> u8 {
    let report = supervisor.status();
    match report.raw {
        Some(raw) => print!("{}", raw),
        None => println!("null"),
    }
    println!("live: {}", report.live);
    0
}

fn once(supervisor: &mut Supervisor) -> u8 {
    let inspector = supervisor.inspector();
    match supervisor.once(&inspector) {
        Ok(outcome) => match outcome.artifact {
            Some(path) => {
                info!(session_id = %outcome.session_id, "Single tick recorded");
                println!("{}", path.display());
                0
            }
            None => {
                error!(session_id = %outcome.session_id, "Single tick could not be written");
                1
            }
        },
        Err(WorklogError::LockContention(path)) => {
            error!(path = %path.display(), "Daemon is running; refusing to run once");
            1
        }
        Err(err) => {
            error!(error = %err, "Single tick failed");
            1
        }
    }
}

fn report(supervisor: &Supervisor, session: Option<String>) -> u8 {
    let session_id = match session {
        Some(id) => id,
        None => match latest_session(supervisor.reports()) {
            Ok(Some(id)) => id,
            Ok(None) => {
                error!("No sessions recorded yet");
                return 1;
            }
            Err(err) => {
                error!(error = %err, "Failed to list sessions");
                return 1;
            }
        },
    };
    match SessionDigest::load(supervisor.reports(), &session_id) {
        Ok(digest) => {
            print!("{}", digest.render_markdown());
            0
        }
        Err(err) => {
            error!(error = %err, "Failed to build report");
            1
        }
    }
}

fn prune(supervisor: &Supervisor, keep: usize) -> u8 {
    let status = supervisor.status();
    let protect = status
        .record
        .as_ref()
        .filter(|_| status.live)
        .map(|record| record.session_id.as_str());
    match supervisor.reports().prune_sessions(keep, protect) {
        Ok(removed) => {
            for session_id in &removed {
                println!("removed {}", session_id);
            }
            0
        }
        Err(err) => {
            error!(error = %err, "Prune failed");
            1
        }
    }
}
