//! Distributed rate limiter backed by a shared window store.
//!
//! All processes pointing at the same store share one history per key. The
//! atomicity of each check comes entirely from the store; this side only
//! namespaces keys and bounds the round trip.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::clock::Timestamp;
use super::key::{RateLimitKey, DEFAULT_KEY_PREFIX};
use super::store::WindowStore;
use super::window::WindowDecision;
use crate::error::{GuardError, Result};

/// Default bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// A rate limiter whose state lives in a [`WindowStore`].
#[derive(Debug)]
pub struct DistributedLimiter<S> {
    /// The shared store
    store: S,
    /// Namespace prefix for store keys
    key_prefix: String,
    /// Round trip bound; `None` waits for the store indefinitely
    timeout: Option<Duration>,
}

impl<S: WindowStore> DistributedLimiter<S> {
    /// Create a distributed limiter with the default prefix and timeout.
    pub fn new(store: S) -> Self {
        Self {
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: Some(DEFAULT_STORE_TIMEOUT),
        }
    }

    /// Use `prefix` instead of `rate` for store keys.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound each store round trip by `timeout`, or not at all with `None`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The store key used for `key`.
    pub fn store_key(&self, key: &RateLimitKey) -> String {
        key.namespaced(&self.key_prefix)
    }

    /// Check the rate limit for `key` against the shared store.
    ///
    /// A timed-out round trip is reported as `StoreUnavailable`: whether the
    /// event was recorded is unknown, so it is neither an allow nor a deny.
    pub async fn check(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision> {
        let store_key = self.store_key(key);

        trace!(
            store_key = %store_key,
            max_requests,
            now = %now,
            "Checking distributed rate limit"
        );

        let call = self.store.check_and_record(&store_key, max_requests, window, now);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(GuardError::StoreUnavailable(format!(
                    "store call timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => call.await,
        };

        match &result {
            Ok(decision) if !decision.allowed => {
                debug!(
                    store_key = %store_key,
                    count = decision.count,
                    limit = max_requests,
                    "Distributed rate limit exceeded"
                );
            }
            Err(e) => debug!(store_key = %store_key, error = %e, "Distributed check failed"),
            _ => {}
        }

        result
    }
}

#[async_trait]
impl<S: WindowStore> RateLimiterBackend for DistributedLimiter<S> {
    async fn check(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision> {
        DistributedLimiter::check(self, key, max_requests, window, now).await
    }
}
