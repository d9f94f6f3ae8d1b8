//! Time source for deadlines.
//!
//! All deadlines and "now" values are [`Tick`]s: 100-nanosecond units since a
//! fixed epoch. The event loop reads time through the [`Clock`] trait so tests
//! can substitute a [`ManualClock`].

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Count of 100-nanosecond units.
pub type Tick = u64;

pub const TICKS_PER_MICROSECOND: Tick = 10;
pub const TICKS_PER_MILLISECOND: Tick = 10_000;
pub const TICKS_PER_SECOND: Tick = 10_000_000;

/// Converts a [`Duration`] to ticks, saturating at `Tick::MAX`.
pub fn ticks_from_duration(duration: Duration) -> Tick {
    let ticks = duration.as_nanos() / 100;
    ticks.min(Tick::MAX as u128) as Tick
}

/// Converts ticks back to a [`Duration`].
pub fn duration_from_ticks(ticks: Tick) -> Duration {
    Duration::from_secs(ticks / TICKS_PER_SECOND)
        + Duration::from_nanos((ticks % TICKS_PER_SECOND) * 100)
}

/// Provider of the current time.
///
/// Implementations never fail. `now_monotonic` must be non-decreasing across
/// calls; `now_wall` may alias it where no real-time clock exists.
pub trait Clock: Send + Sync {
    /// Ticks elapsed since an arbitrary but fixed reference point.
    fn now_monotonic(&self) -> Tick;

    /// Ticks suitable for wall-clock timestamps.
    fn now_wall(&self) -> Tick {
        self.now_monotonic()
    }
}

/// Clock backed by [`Instant`] and [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

// Reference point shared by every `SystemClock` in the process.
static MONOTONIC_EPOCH: OnceLock<Instant> = OnceLock::new();

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Tick {
        let epoch = MONOTONIC_EPOCH.get_or_init(Instant::now);
        ticks_from_duration(epoch.elapsed())
    }

    fn now_wall(&self) -> Tick {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => ticks_from_duration(since_epoch),
            Err(_) => self.now_monotonic(),
        }
    }
}

/// Monotonic ticks from the process-wide [`SystemClock`].
pub fn now_monotonic() -> Tick {
    SystemClock.now_monotonic()
}

/// Wall-clock ticks from the process-wide [`SystemClock`].
pub fn now_wall() -> Tick {
    SystemClock.now_wall()
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to an event loop.
///
/// # Example
/// ```
/// use uaio::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(100);
/// clock.advance(50);
/// assert_eq!(clock.now_monotonic(), 150);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Tick) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Moves the clock forward by `ticks`.
    pub fn advance(&self, ticks: Tick) {
        self.now.fetch_add(ticks, Ordering::AcqRel);
    }

    /// Sets the clock to `tick` unless that would move it backwards.
    pub fn set(&self, tick: Tick) {
        self.now.fetch_max(tick, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_monotonic(&self) -> Tick {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let first = now_monotonic();
        let second = now_monotonic();
        assert!(second >= first);
    }

    #[test]
    fn test_wall_clock_is_after_2020() {
        // 2020-01-01 in ticks since the Unix epoch.
        assert!(now_wall() > 1_577_836_800 * TICKS_PER_SECOND);
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let clock = ManualClock::new(500);
        clock.set(100);
        assert_eq!(clock.now_monotonic(), 500);
        clock.set(900);
        assert_eq!(clock.now_monotonic(), 900);
    }

    #[test]
    fn test_tick_conversions() {
        assert_eq!(ticks_from_duration(Duration::from_millis(3)), 30_000);
        assert_eq!(ticks_from_duration(Duration::from_nanos(250)), 2);
        assert_eq!(
            duration_from_ticks(TICKS_PER_SECOND + 5),
            Duration::from_nanos(1_000_000_500)
        );
    }
}
