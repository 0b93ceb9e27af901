//! Admission outcomes handed back to the serving framework.

use std::time::Duration;

use crate::ratelimit::{RateLimitKey, WindowDecision};

/// HTTP status for a request over its limit.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
/// HTTP status for a request without a caller identity.
pub const STATUS_UNAUTHORIZED: u16 = 401;
/// HTTP status when the limiter could not decide and the gate fails closed.
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// The result of asking the gate whether a unit of work may run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Go ahead with the protected operation.
    Proceed,
    /// Do not run the operation; the rejection says why.
    Rejected(Rejection),
    /// The limiter could not render a decision.
    ///
    /// Only returned by [`AdmissionGate::admit`](super::AdmissionGate::admit);
    /// [`decide`](super::AdmissionGate::decide) maps it through the
    /// fail-open policy.
    LimiterUnavailable {
        /// Description of the store failure
        error: String,
    },
}

impl Outcome {
    /// Helper to check if the request may proceed.
    pub fn is_proceed(&self) -> bool {
        matches!(self, Outcome::Proceed)
    }

    /// The rejection, if any.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The key already used its allowance for the window.
    LimitExceeded,
    /// No caller identity and the policy does not allow a shared key.
    MissingKey,
    /// The limiter was unavailable and the gate fails closed.
    LimiterUnavailable,
}

impl RejectReason {
    /// Short machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::LimitExceeded => "limit_exceeded",
            RejectReason::MissingKey => "missing_key",
            RejectReason::LimiterUnavailable => "limiter_unavailable",
        }
    }
}

/// Everything a caller needs to build a "too many requests" style response.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: RejectReason,
    /// The key that was checked, when one could be derived
    pub key: Option<RateLimitKey>,
    /// Configured maximum events per window
    pub limit: u32,
    /// Configured window length
    pub window: Duration,
    /// Time until a retry could succeed, when known
    pub retry_after: Option<Duration>,
}

impl Rejection {
    pub(crate) fn limit_exceeded(key: RateLimitKey, decision: &WindowDecision, window: Duration) -> Self {
        Self {
            reason: RejectReason::LimitExceeded,
            key: Some(key),
            limit: decision.limit,
            window,
            retry_after: decision.retry_after,
        }
    }

    pub(crate) fn missing_key(limit: u32, window: Duration) -> Self {
        Self {
            reason: RejectReason::MissingKey,
            key: None,
            limit,
            window,
            retry_after: None,
        }
    }

    pub(crate) fn limiter_unavailable(key: Option<RateLimitKey>, limit: u32, window: Duration) -> Self {
        Self {
            reason: RejectReason::LimiterUnavailable,
            key,
            limit,
            window,
            retry_after: None,
        }
    }

    /// The protocol status a framework adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self.reason {
            RejectReason::LimitExceeded => STATUS_TOO_MANY_REQUESTS,
            RejectReason::MissingKey => STATUS_UNAUTHORIZED,
            RejectReason::LimiterUnavailable => STATUS_SERVICE_UNAVAILABLE,
        }
    }

    /// Human-readable detail for the response body.
    pub fn message(&self) -> &'static str {
        match self.reason {
            RejectReason::LimitExceeded => "Rate limit exceeded",
            RejectReason::MissingKey => "Caller identity required",
            RejectReason::LimiterUnavailable => "Rate limiter unavailable",
        }
    }

    /// Retry hint rounded up to whole seconds, as used by `Retry-After`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|wait| {
            let secs = wait.as_secs();
            if wait.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exceeded(retry_after: Option<Duration>) -> Rejection {
        let decision = WindowDecision {
            allowed: false,
            count: 2,
            limit: 2,
            retry_after,
        };
        Rejection::limit_exceeded(RateLimitKey::new("alice").unwrap(), &decision, Duration::from_secs(60))
    }

    #[test]
    fn test_limit_exceeded_maps_to_429() {
        let rejection = exceeded(None);
        assert_eq!(rejection.status_code(), 429);
        assert_eq!(rejection.message(), "Rate limit exceeded");
        assert_eq!(rejection.reason.as_str(), "limit_exceeded");
    }

    #[test]
    fn test_missing_key_and_unavailable_statuses() {
        let window = Duration::from_secs(60);
        assert_eq!(Rejection::missing_key(10, window).status_code(), 401);
        assert_eq!(Rejection::limiter_unavailable(None, 10, window).status_code(), 503);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(exceeded(Some(Duration::from_millis(1500))).retry_after_secs(), Some(2));
        assert_eq!(exceeded(Some(Duration::from_secs(45))).retry_after_secs(), Some(45));
        assert_eq!(exceeded(None).retry_after_secs(), None);
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(Outcome::Proceed.is_proceed());
        assert!(Outcome::Proceed.rejection().is_none());

        let outcome = Outcome::Rejected(exceeded(None));
        assert!(!outcome.is_proceed());
        assert_eq!(outcome.rejection().map(|r| r.limit), Some(2));
    }
}
