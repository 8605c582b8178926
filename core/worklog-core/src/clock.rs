//! Wall-clock and monotonic time sources.
//!
//! Durations are always computed from [`Clock::now_monotonic_ns`]. Wall time is
//! only used to find the next tick boundary and for human-facing fields.
//!
//! [`SystemClock`] is what the daemon runs on; [`ManualClock`] lets tests drive
//! the scheduler through hours of simulated time instantly.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Local, Timelike};

use crate::termination::CancelToken;

/// Aware wall-clock timestamp. Serializes as RFC 3339 with offset.
pub type WallTime = DateTime<FixedOffset>;

/// Format used for session ids and per-tick artifact names.
pub const COMPACT_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Upper bound between cancellation checks while sleeping.
const CANCEL_POLL: Duration = Duration::from_millis(250);

/// Longest we will wait for the wall clock to move past a previous record.
const FRESH_SECOND_MAX_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The target wall time was reached.
    Elapsed,
    /// The cancel token was set before the target was reached.
    Cancelled,
}

pub trait Clock: Send + Sync {
    fn now_wall(&self) -> WallTime;

    /// Nanoseconds since an arbitrary per-process origin. Never decreases.
    fn now_monotonic_ns(&self) -> u64;

    /// Blocks until `now_wall() >= target` or `cancel` is set, whichever comes
    /// first. Observes cancellation within [`CANCEL_POLL`].
    fn sleep_until_wall(&self, target: WallTime, cancel: &CancelToken) -> SleepOutcome;

    /// Short, uncancellable wait used for bounded polling.
    fn pause(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_wall(&self) -> WallTime {
        Local::now().fixed_offset()
    }

    fn now_monotonic_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn sleep_until_wall(&self, target: WallTime, cancel: &CancelToken) -> SleepOutcome {
        loop {
            if cancel.is_cancelled() {
                return SleepOutcome::Cancelled;
            }
            let now = self.now_wall();
            if now >= target {
                return SleepOutcome::Elapsed;
            }
            // Re-reading wall time each slice keeps us honest across host suspend.
            let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
            thread::sleep(remaining.min(CANCEL_POLL));
        }
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A clock that only moves when told to.
///
/// `sleep_until_wall` jumps straight to its target. An optional horizon ends a
/// simulation: a sleep that would cross it stops at the horizon and cancels the
/// token, which is how tests bound a run to "five minutes of wall time".
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    wall: WallTime,
    mono_ns: u64,
    horizon: Option<WallTime>,
}

impl ManualClock {
    pub fn new(start: WallTime) -> Self {
        Self {
            state: Mutex::new(ManualState {
                wall: start,
                mono_ns: 1_000_000_000,
                horizon: None,
            }),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        advance_state(&mut state, duration);
    }

    /// Steps the wall clock without moving monotonic time, like an NTP
    /// correction or a DST change.
    pub fn set_wall(&self, wall: WallTime) {
        self.lock().wall = wall;
    }

    pub fn set_horizon(&self, horizon: WallTime) {
        self.lock().horizon = Some(horizon);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn advance_state(state: &mut ManualState, duration: Duration) {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    state.mono_ns = state.mono_ns.saturating_add(nanos);
    if let Ok(delta) = chrono::Duration::from_std(duration) {
        state.wall += delta;
    }
}

impl Clock for ManualClock {
    fn now_wall(&self) -> WallTime {
        self.lock().wall
    }

    fn now_monotonic_ns(&self) -> u64 {
        self.lock().mono_ns
    }

    fn sleep_until_wall(&self, target: WallTime, cancel: &CancelToken) -> SleepOutcome {
        if cancel.is_cancelled() {
            return SleepOutcome::Cancelled;
        }
        let mut state = self.lock();
        if let Some(horizon) = state.horizon {
            if target > horizon {
                if let Ok(gap) = (horizon - state.wall).to_std() {
                    advance_state(&mut state, gap);
                }
                cancel.cancel();
                return SleepOutcome::Cancelled;
            }
        }
        if let Ok(gap) = (target - state.wall).to_std() {
            advance_state(&mut state, gap);
        }
        SleepOutcome::Elapsed
    }

    fn pause(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Returns the first interval boundary strictly after `now`.
///
/// Boundaries are aligned to local wall time: with a 3600 s interval they fall
/// on the top of each local hour, whatever the UTC offset.
pub fn next_boundary_after(now: &WallTime, interval: Duration) -> WallTime {
    let step = i64::try_from(interval.as_secs().max(1)).unwrap_or(i64::MAX);
    let local_secs = now.timestamp() + i64::from(now.offset().local_minus_utc());
    let next_local = (local_secs.div_euclid(step) + 1) * step;
    let delta = next_local - local_secs;
    let whole_second = now.with_nanosecond(0).unwrap_or(*now);
    whole_second + chrono::Duration::seconds(delta)
}

/// `YYYYmmdd_HHMMSS` rendering used for session ids and artifact names.
pub fn compact(wall: &WallTime) -> String {
    wall.format(COMPACT_FORMAT).to_string()
}

/// Waits (bounded) until the wall clock is in a later second than `previous`.
///
/// Keeps consecutive session ids distinct and `once` artifacts strictly
/// ordered when invocations arrive within the same second.
pub fn wait_for_fresh_second(clock: &dyn Clock, previous: &WallTime) {
    let started = clock.now_monotonic_ns();
    let budget = u64::try_from(FRESH_SECOND_MAX_WAIT.as_nanos()).unwrap_or(u64::MAX);
    while clock.now_wall().timestamp() <= previous.timestamp() {
        if clock.now_monotonic_ns().saturating_sub(started) >= budget {
            break;
        }
        clock.pause(Duration::from_millis(50));
    }
}

/// Seconds between two monotonic readings.
pub fn seconds_between(earlier_ns: u64, later_ns: u64) -> f64 {
    later_ns.saturating_sub(earlier_ns) as f64 / 1_000_000_000.0
}
