//! Windowguard - Sliding Window Admission Control
//!
//! This crate bounds per-key request rates with a sliding window. A
//! [`LocalLimiter`](ratelimit::LocalLimiter) keeps history in process memory;
//! a [`DistributedLimiter`](ratelimit::DistributedLimiter) keeps it in a shared
//! store (Redis) and checks it with one atomic script per request. The
//! [`AdmissionGate`](gate::AdmissionGate) wraps either one at the call site.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
