//! # worklog-core
//!
//! Internals of the hourly work-summary daemon: a single-process recorder
//! that inspects one workspace at every tick boundary and writes a JSON
//! snapshot per tick under the control directory.
//!
//! ## Design Principles
//!
//! - **Synchronous**: one process, one thread, no async runtime. Signals only
//!   flip a [`CancelToken`]; the scheduler observes it.
//! - **Graceful degradation**: inspection failures are recorded into the
//!   snapshot, never raised. Only store writes can end a session.
//! - **Atomic artifacts**: every file under the control directory is written
//!   via a same-directory temp file and rename.
//! - **Injectable time**: everything that sleeps or stamps takes a [`Clock`],
//!   so scheduling is testable without waiting an hour.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use worklog_core::{ConfigOverrides, DaemonConfig, Supervisor};
//!
//! let config = DaemonConfig::resolve(ConfigOverrides::default())?;
//! let mut supervisor = Supervisor::new(config);
//! let inspector = supervisor.inspector();
//! let outcome = supervisor.once(&inspector)?;
//! ```

pub mod clock;
pub mod config;
pub mod digest;
pub mod error;
pub mod inspector;
pub mod process;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod termination;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, WallTime};
pub use config::{ConfigOverrides, ControlPaths, DaemonConfig};
pub use digest::{latest_session, SessionDigest};
pub use error::{Result, WorklogError};
pub use inspector::{Inspect, WorkspaceInspector};
pub use scheduler::{LoopExit, Scheduler, SchedulerState};
pub use session::SessionRecord;
pub use store::{LifecycleStore, ReportStore};
pub use supervisor::{
    DetachedSpawner, OnceOutcome, Recovery, Spawner, StartOutcome, StatusReport, StopOutcome,
    Supervisor,
};
pub use termination::{CancelToken, RunMode, TerminationHandler};
pub use types::*;
