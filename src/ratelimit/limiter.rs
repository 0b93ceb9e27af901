//! In-process sliding window rate limiter.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::backend::RateLimiterBackend;
use super::clock::{Clock, Timestamp};
use super::key::RateLimitKey;
use super::window::{WindowDecision, WindowState};
use crate::error::Result;

/// A rate limiter that keeps per-key event history in process memory.
///
/// Each instance owns its state, so several independently configured
/// limiters can live in one process. Checks on the same key are serialized
/// by the map's shard lock; checks on different keys run in parallel.
#[derive(Debug, Default)]
pub struct LocalLimiter {
    /// Event history indexed by key
    states: DashMap<RateLimitKey, WindowState>,
}

impl LocalLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Check and, if allowed, record an event for `key` at `now`.
    pub fn check(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> WindowDecision {
        trace!(key = %key, max_requests, now = %now, "Checking local rate limit");

        let mut state = self.states.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating new window state");
            WindowState::new()
        });
        let decision = state.check(max_requests, window, now);

        if !decision.allowed {
            debug!(key = %key, count = decision.count, limit = max_requests, "Rate limit exceeded");
        }
        decision
    }

    /// Whether a new event is allowed for `key` at `now`.
    pub fn allow(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> bool {
        self.check(key, max_requests, window, now).allowed
    }

    /// Retained events for a key, oldest first.
    ///
    /// Returns `None` if the key has no state.
    pub fn history(&self, key: &RateLimitKey) -> Option<Vec<Timestamp>> {
        self.states.get(key).map(|state| state.events())
    }

    /// Drop state for every key whose newest event left its window by `now`.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut removed = 0;
        self.states.retain(|_, state| {
            let idle = state.is_idle(now);
            if idle {
                removed += 1;
            }
            !idle
        });
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, clock: Arc<dyn Clock>) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        info!(interval_ms = interval.as_millis() as u64, "Starting idle key sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Limiter dropped, stopping sweeper");
                    break;
                };
                let removed = limiter.sweep(clock.now());
                if removed > 0 {
                    debug!(removed, remaining = limiter.key_count(), "Swept idle keys");
                }
            }
        })
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.states.clear();
    }

    /// Get the number of keys with state.
    pub fn key_count(&self) -> usize {
        self.states.len()
    }
}

#[async_trait]
impl RateLimiterBackend for LocalLimiter {
    async fn check(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision> {
        Ok(LocalLimiter::check(self, key, max_requests, window, now))
    }
}
