//! Rate limiter trait for abstracting local and distributed implementations.

use std::time::Duration;

use async_trait::async_trait;

use super::clock::Timestamp;
use super::key::RateLimitKey;
use super::window::WindowDecision;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both the [`LocalLimiter`](super::LocalLimiter)
/// and the [`DistributedLimiter`](super::DistributedLimiter) so the
/// admission gate can work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Prune history older than `window`, then record an event at `now`
    /// unless `max_requests` events are already retained.
    ///
    /// Errors are reserved for failures to render a decision; a rejection
    /// is an `Ok` decision with `allowed == false`.
    async fn check(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision>;

    /// Whether a new event is allowed for `key` at `now`.
    async fn allow(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<bool> {
        Ok(self.check(key, max_requests, window, now).await?.allowed)
    }
}
