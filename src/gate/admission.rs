//! The admission gate: key extraction, limiter delegation and policy.

use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};

use super::outcome::{Outcome, Rejection};
use crate::ratelimit::{Clock, LimitPolicy, MonotonicClock, RateLimitKey, RateLimiterBackend};

/// Default key shared by callers without an identity, when allowed.
pub const DEFAULT_SHARED_KEY: &str = "anonymous";

/// Anything the serving framework can hand to the gate.
///
/// The framework is responsible for authenticating the caller and attaching
/// the identity before calling the gate.
pub trait CallerIdentity {
    /// The authenticated caller id, if there is one.
    fn caller_id(&self) -> Option<&str>;
}

impl CallerIdentity for str {
    fn caller_id(&self) -> Option<&str> {
        Some(self)
    }
}

impl CallerIdentity for String {
    fn caller_id(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl<T: CallerIdentity> CallerIdentity for Option<T> {
    fn caller_id(&self) -> Option<&str> {
        self.as_ref().and_then(CallerIdentity::caller_id)
    }
}

/// What to do with a request that carries no caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingKeyPolicy {
    /// Turn the request away.
    Reject,
    /// Count the request against one key shared by all anonymous callers.
    SharedDefaultKey(RateLimitKey),
}

/// Everything the gate decides with, besides the limiter itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    pub limit: LimitPolicy,
    /// Map an unavailable limiter to `Proceed` instead of `Rejected`.
    pub fail_open_on_store_unavailable: bool,
    pub missing_key: MissingKeyPolicy,
}

impl GatePolicy {
    /// A fail-closed policy. Anonymous callers are handled as `missing_key`
    /// says; there is no implicit choice.
    pub fn new(limit: LimitPolicy, missing_key: MissingKeyPolicy) -> Self {
        Self {
            limit,
            fail_open_on_store_unavailable: false,
            missing_key,
        }
    }

    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open_on_store_unavailable = fail_open;
        self
    }

    pub fn missing_key(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key = policy;
        self
    }
}

/// Consults a limiter before admitting a unit of work.
///
/// The gate is called explicitly at the top of request handling. It reads
/// the clock once per request and passes that reading to the limiter.
pub struct AdmissionGate<L: ?Sized> {
    /// The active limiter
    limiter: Arc<L>,
    policy: GatePolicy,
    clock: Arc<dyn Clock>,
}

impl<L: RateLimiterBackend + ?Sized> AdmissionGate<L> {
    /// Create a gate reading a process-local monotonic clock.
    pub fn new(limiter: Arc<L>, policy: GatePolicy) -> Self {
        info!(
            max_requests = policy.limit.max_requests(),
            window_ms = policy.limit.window().as_millis() as u64,
            fail_open = policy.fail_open_on_store_unavailable,
            missing_key = ?policy.missing_key,
            "Admission gate configured"
        );
        Self {
            limiter,
            policy,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Use `clock` for request timestamps.
    ///
    /// Gates in different processes sharing a store must agree on the
    /// clock, typically [`SystemClock`](crate::ratelimit::SystemClock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<L> {
        &self.limiter
    }

    /// Decide whether `request` may proceed, without applying the
    /// fail-open policy to limiter failures.
    #[instrument(skip(self, request))]
    pub async fn admit<R: CallerIdentity + ?Sized>(&self, request: &R) -> Outcome {
        let limit = self.policy.limit;

        let key = match self.resolve_key(request) {
            Some(key) => key,
            None => {
                debug!("Rejecting request without caller identity");
                return Outcome::Rejected(Rejection::missing_key(limit.max_requests(), limit.window()));
            }
        };

        let now = self.clock.now();
        trace!(key = %key, now = %now, "Admitting request");

        match self
            .limiter
            .check(&key, limit.max_requests(), limit.window(), now)
            .await
        {
            Ok(decision) if decision.allowed => Outcome::Proceed,
            Ok(decision) => {
                debug!(key = %key, count = decision.count, "Request rejected by rate limit");
                Outcome::Rejected(Rejection::limit_exceeded(key, &decision, limit.window()))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limiter unavailable");
                Outcome::LimiterUnavailable {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Decide whether `request` may proceed, mapping an unavailable limiter
    /// to `Proceed` or `Rejected` according to the fail-open policy.
    pub async fn decide<R: CallerIdentity + ?Sized>(&self, request: &R) -> Outcome {
        match self.admit(request).await {
            Outcome::LimiterUnavailable { error } => {
                if self.policy.fail_open_on_store_unavailable {
                    warn!(error = %error, "Failing open while rate limiter is unavailable");
                    Outcome::Proceed
                } else {
                    let limit = self.policy.limit;
                    Outcome::Rejected(Rejection::limiter_unavailable(
                        self.resolve_key(request),
                        limit.max_requests(),
                        limit.window(),
                    ))
                }
            }
            outcome => outcome,
        }
    }

    /// The key to count `request` against, or `None` if it must be rejected.
    fn resolve_key<R: CallerIdentity + ?Sized>(&self, request: &R) -> Option<RateLimitKey> {
        if let Some(key) = request.caller_id().and_then(|id| RateLimitKey::new(id).ok()) {
            return Some(key);
        }
        match &self.policy.missing_key {
            MissingKeyPolicy::Reject => None,
            MissingKeyPolicy::SharedDefaultKey(key) => Some(key.clone()),
        }
    }
}
