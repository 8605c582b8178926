//! Persistence under the control directory.
//!
//! - [`ReportStore`]: per-tick artifacts, `final.json`, `status/current.json`
//! - [`LifecycleStore`]: PID-file lock, heartbeat, status reads
//!
//! Every write goes through [`atomic_write`], so readers never observe a
//! partial file.

mod atomic;
mod lifecycle;
mod report;

pub use atomic::{atomic_write, atomic_write_json, ensure_dir};
pub use lifecycle::{Heartbeat, LifecycleStore};
pub use report::{is_compact_stamp, ReportStore};
