//! Sliding window state and limit policies.

use std::collections::VecDeque;
use std::time::Duration;

use super::clock::{window_millis, Timestamp};
use crate::error::{GuardError, Result};

/// Default request limit when none is configured.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;
/// Default window length when none is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// A validated limit: at most `max_requests` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    max_requests: u32,
    window: Duration,
}

impl LimitPolicy {
    /// Create a policy, rejecting a zero limit or a window under one
    /// millisecond.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(GuardError::InvalidConfiguration(
                "max_requests must be positive".to_string(),
            ));
        }
        if window.as_millis() == 0 {
            return Err(GuardError::InvalidConfiguration(format!(
                "window must be at least 1ms, got {:?}",
                window
            )));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// The result of a single sliding window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the event was recorded.
    pub allowed: bool,
    /// Events retained in the window once the check completed.
    pub count: u32,
    /// The limit the check was evaluated against.
    pub limit: u32,
    /// For rejections, how long until the oldest retained event expires.
    pub retry_after: Option<Duration>,
}

impl WindowDecision {
    /// Requests still available in the current window.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    /// Build a rejection, deriving the retry hint from the oldest event.
    pub(crate) fn rejected(
        count: u32,
        limit: u32,
        oldest: Option<Timestamp>,
        window: Duration,
        now: Timestamp,
    ) -> Self {
        Self {
            allowed: false,
            count,
            limit,
            retry_after: oldest.map(|t| t.saturating_add(window).saturating_duration_since(now)),
        }
    }
}

/// Event history for one key, oldest first.
///
/// Concurrent callers may read the clock before they get to the state, so
/// checks can arrive out of timestamp order. Events are inserted in sorted
/// position to keep the front the oldest and the back the newest.
#[derive(Debug, Clone, Default)]
pub struct WindowState {
    events: VecDeque<Timestamp>,
    /// Window used by the most recent check, for idle sweeps.
    window: Duration,
}

impl WindowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune expired events, then record `now` if under `max_requests`.
    ///
    /// A rejected check leaves the retained events untouched apart from the
    /// pruning that every check performs.
    pub fn check(&mut self, max_requests: u32, window: Duration, now: Timestamp) -> WindowDecision {
        self.window = window;
        self.prune(now.cutoff(window));

        let count = self.len();
        if count >= max_requests {
            return WindowDecision::rejected(
                count,
                max_requests,
                self.events.front().copied(),
                window,
                now,
            );
        }

        let at = self.events.partition_point(|t| *t <= now);
        self.events.insert(at, now);
        WindowDecision {
            allowed: true,
            count: count + 1,
            limit: max_requests,
            retry_after: None,
        }
    }

    /// Drop every event at or before `cutoff`.
    fn prune(&mut self, cutoff: Option<Timestamp>) {
        let Some(cutoff) = cutoff else {
            return;
        };
        let expired = self.events.partition_point(|t| *t <= cutoff);
        self.events.drain(..expired);
    }

    /// Number of retained events.
    pub fn len(&self) -> u32 {
        u32::try_from(self.events.len()).unwrap_or(u32::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether every retained event has left the last-used window by `now`.
    pub fn is_idle(&self, now: Timestamp) -> bool {
        match (now.cutoff(self.window), self.events.iter().max()) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(cutoff), Some(newest)) => *newest <= cutoff,
        }
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<Timestamp> {
        self.events.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Timestamp {
        Timestamp::from_secs(s)
    }

    #[test]
    fn test_policy_rejects_zero_values() {
        assert!(matches!(
            LimitPolicy::new(0, Duration::from_secs(1)),
            Err(GuardError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            LimitPolicy::new(1, Duration::ZERO),
            Err(GuardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_policy_rejects_sub_millisecond_window() {
        assert!(matches!(
            LimitPolicy::new(1, Duration::from_micros(500)),
            Err(GuardError::InvalidConfiguration(_))
        ));
        assert!(LimitPolicy::new(1, Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_fractional_window_rounds_up() {
        let mut state = WindowState::new();
        let now = Timestamp::from_millis(10);

        let results: Vec<bool> = (0..3)
            .map(|_| state.check(1, Duration::from_micros(500), now).allowed)
            .collect();
        assert_eq!(results, vec![true, false, false]);

        // 1.9ms counts as 2ms: t=10 is still live at t=11
        let mut state = WindowState::new();
        assert!(state.check(1, Duration::from_micros(1_900), now).allowed);
        assert!(!state.check(1, Duration::from_micros(1_900), Timestamp::from_millis(11)).allowed);
        assert!(state.check(1, Duration::from_micros(1_900), Timestamp::from_millis(12)).allowed);
    }

    #[test]
    fn test_out_of_order_events_stay_sorted() {
        let window = Duration::from_secs(10);
        let mut state = WindowState::new();

        assert!(state.check(2, window, secs(5)).allowed);
        assert!(state.check(2, window, secs(3)).allowed);
        assert_eq!(state.events(), vec![secs(3), secs(5)]);

        // t=5 is live at t=14, so the key is not idle
        assert!(!state.is_idle(secs(14)));

        // cutoff 4 expires t=3 only, leaving room for exactly one more
        assert!(state.check(2, window, secs(14)).allowed);
        assert!(!state.check(2, window, secs(14)).allowed);
        assert_eq!(state.events(), vec![secs(5), secs(14)]);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.max_requests(), 100);
        assert_eq!(policy.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_first_check_allowed() {
        let mut state = WindowState::new();
        let decision = state.check(1, Duration::from_secs(60), secs(1_000));

        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.remaining(), 0);
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        let mut state = WindowState::new();
        for t in 0..5 {
            let decision = state.check(0, Duration::from_secs(60), secs(t));
            assert!(!decision.allowed);
            assert_eq!(decision.retry_after, None);
        }
        assert!(state.is_empty());
    }

    #[test]
    fn test_sliding_window_scenario() {
        let window = Duration::from_secs(60);
        let mut state = WindowState::new();

        let results: Vec<bool> = [0, 10, 20]
            .iter()
            .map(|t| state.check(2, window, secs(*t)).allowed)
            .collect();
        assert_eq!(results, vec![true, true, false]);

        // cutoff is 5: t=0 expires, t=10 stays
        let decision = state.check(2, window, secs(65));
        assert!(decision.allowed);
        assert_eq!(state.events(), vec![secs(10), secs(65)]);
    }

    #[test]
    fn test_event_at_cutoff_is_pruned() {
        let window = Duration::from_secs(10);
        let mut state = WindowState::new();

        assert!(state.check(1, window, secs(0)).allowed);
        assert!(!state.check(1, window, secs(9)).allowed);
        assert!(state.check(1, window, secs(10)).allowed);
    }

    #[test]
    fn test_rejection_does_not_record() {
        let window = Duration::from_secs(60);
        let mut state = WindowState::new();
        state.check(2, window, secs(0));
        state.check(2, window, secs(1));

        let before = state.events();
        let decision = state.check(2, window, secs(2));
        assert!(!decision.allowed);
        assert_eq!(state.events(), before);
    }

    #[test]
    fn test_retry_after_tracks_oldest_event() {
        let window = Duration::from_secs(60);
        let mut state = WindowState::new();
        state.check(1, window, secs(5));

        let decision = state.check(1, window, secs(20));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_idle_after_window() {
        let window = Duration::from_secs(30);
        let mut state = WindowState::new();
        state.check(5, window, secs(100));

        assert!(!state.is_idle(secs(120)));
        assert!(state.is_idle(secs(130)));
    }

    #[test]
    fn test_allowed_never_exceeds_limit_in_any_window() {
        let window = Duration::from_secs(10);
        let limit = 3;
        let mut state = WindowState::new();
        let mut allowed = Vec::new();

        for t in 0..200u64 {
            if state.check(limit, window, Timestamp::from_millis(t * 700)).allowed {
                allowed.push(t * 700);
            }
        }

        for (i, start) in allowed.iter().enumerate() {
            let in_window = allowed[i..]
                .iter()
                .take_while(|t| **t < start + 10_000)
                .count();
            assert!(in_window <= limit as usize, "window at {} had {}", start, in_window);
        }
    }
}
