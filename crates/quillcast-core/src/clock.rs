//! Time sources for the engine.
//!
//! The engine reads time through the [`Clock`] trait so pacing, backoff,
//! and day-boundary logic can be driven deterministically in tests.
//! [`SystemClock`] is the production source; [`ManualClock`] advances both
//! hands in lockstep under test control.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Engine time source.
pub trait Clock: Send + Sync {
    /// Monotonic time since engine start. Never decreases; used for
    /// pacing, backoff, and ordering of per-tenant completions.
    fn now_mono(&self) -> Duration;

    /// UTC wall-clock time; used for audit records, bucket state, and
    /// tenant-local calendar evaluation.
    fn now_wall(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by [`Instant`] and the system wall clock.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_mono(&self) -> Duration {
        self.started.elapsed()
    }

    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests.
///
/// Both hands move only through [`ManualClock::advance`], so a test can
/// cross a pacing window or a day boundary without sleeping.
pub struct ManualClock {
    state: Mutex<(Duration, DateTime<Utc>)>,
}

impl ManualClock {
    /// Creates a clock whose wall hand starts at `wall` and whose
    /// monotonic hand starts at zero.
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((Duration::ZERO, wall)),
        }
    }

    /// Moves both hands forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.0 += by;
        state.1 += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now_mono(&self) -> Duration {
        self.state.lock().0
    }

    fn now_wall(&self) -> DateTime<Utc> {
        self.state.lock().1
    }
}
