//! Timestamps and the clocks that produce them.
//!
//! Limiters never read a clock on their own; every check receives `now`
//! from the caller. The admission gate owns a [`Clock`] and passes its
//! reading down, which keeps the limiters deterministic under test.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A point in time, in milliseconds on some caller-chosen clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Milliseconds since the clock's origin.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Start boundary of the window ending at `self`.
    ///
    /// Entries at or before the cutoff are expired. `None` while the window
    /// still reaches back past the clock's origin, when nothing can expire.
    pub fn cutoff(&self, window: Duration) -> Option<Timestamp> {
        self.0.checked_sub(window_millis(window)).map(Timestamp)
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// This timestamp moved forward by `delta`, rounded up to whole
    /// milliseconds.
    pub fn saturating_add(&self, delta: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(window_millis(delta)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Milliseconds in a duration, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds in a window, rounded up so a partial millisecond never
/// shrinks the window to nothing.
pub(crate) fn window_millis(window: Duration) -> u64 {
    let millis = duration_millis(window);
    if window.subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis.saturating_add(1)
    }
}

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Only meaningful inside one process. Use [`SystemClock`] when several
/// processes share a store.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(duration_millis(self.start.elapsed()))
    }
}

/// Wall clock in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = chrono::Utc::now().timestamp_millis();
        Timestamp::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_before_origin() {
        let now = Timestamp::from_secs(10);
        assert_eq!(now.cutoff(Duration::from_secs(60)), None);
        assert_eq!(now.cutoff(Duration::from_secs(10)), Some(Timestamp::from_millis(0)));
        assert_eq!(now.cutoff(Duration::from_secs(4)), Some(Timestamp::from_secs(6)));
    }

    #[test]
    fn test_from_secs_saturates() {
        assert_eq!(Timestamp::from_secs(u64::MAX).as_millis(), u64::MAX);
    }

    #[test]
    fn test_window_millis_rounds_partial_millis_up() {
        assert_eq!(window_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(window_millis(Duration::from_micros(500)), 1);
        assert_eq!(window_millis(Duration::from_micros(1_900)), 2);
        assert_eq!(duration_millis(Duration::from_micros(1_900)), 1);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::from_secs(1));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Timestamp::from_millis(1500));

        clock.set(Timestamp::from_secs(90));
        assert_eq!(clock.now().as_millis(), 90_000);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::default();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now() > Timestamp::from_secs(1_577_836_800));
    }
}
