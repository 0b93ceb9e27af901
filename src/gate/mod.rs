//! Admission control at the call site.
//!
//! The serving framework extracts the caller identity, calls
//! [`AdmissionGate::decide`] (or [`AdmissionGate::admit`] to handle limiter
//! failures itself) and translates a [`Rejection`] into a protocol response,
//! e.g. HTTP 429 with a `Retry-After` header.

mod admission;
mod outcome;

pub use admission::{AdmissionGate, CallerIdentity, GatePolicy, MissingKeyPolicy, DEFAULT_SHARED_KEY};
pub use outcome::{
    Outcome, RejectReason, Rejection, STATUS_SERVICE_UNAVAILABLE, STATUS_TOO_MANY_REQUESTS,
    STATUS_UNAUTHORIZED,
};
