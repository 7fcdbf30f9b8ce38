//! Monotonic time sources
//!
//! Every timestamp the governor takes goes through a [`Clock`] so that the
//! simulator and the tests can drive time deterministically with
//! [`ManualClock`] while hosts use [`MonotonicClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source, measured from an arbitrary origin
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Convenience: `now()` in fractional seconds
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

/// Wall clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
///
/// Thread-safe; `advance` is a single atomic add so concurrent readers see
/// either the old or the new time, never a torn value.
///
/// # Example
///
/// ```
/// use regulador::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(16));
/// assert_eq!(clock.now(), Duration::from_millis(16));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }

    /// Move time forward by fractional milliseconds
    pub fn advance_ms(&self, ms: f64) {
        if ms > 0.0 && ms.is_finite() {
            self.advance(Duration::from_secs_f64(ms / 1000.0));
        }
    }

    /// Jump to an absolute time (never backwards)
    pub fn set(&self, to: Duration) {
        self.nanos.fetch_max(to.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

/// Elapsed milliseconds between two clock readings, clamped at zero
pub fn elapsed_ms(start: Duration, end: Duration) -> f64 {
    end.saturating_sub(start).as_secs_f64() * 1000.0
}
