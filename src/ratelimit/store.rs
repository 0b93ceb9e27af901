//! Shared window stores for the distributed limiter.
//!
//! A [`WindowStore`] executes the whole prune-count-record sequence for one
//! key as a single atomic operation. The limiter issues exactly one call per
//! check and does no locking of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::clock::Timestamp;
use super::window::{WindowDecision, WindowState};
use crate::error::Result;

/// Storage interface for sliding window state shared between processes.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically prune entries at or before `now - window` under
    /// `store_key`, then record `now` unless `max_requests` entries remain.
    ///
    /// When an event is recorded the record's expiry is refreshed to
    /// `window`. Any failure to complete the operation is reported as
    /// [`GuardError::StoreUnavailable`](crate::error::GuardError::StoreUnavailable).
    async fn check_and_record(
        &self,
        store_key: &str,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision>;
}

#[async_trait]
impl<S: WindowStore + ?Sized> WindowStore for Arc<S> {
    async fn check_and_record(
        &self,
        store_key: &str,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision> {
        (**self).check_and_record(store_key, max_requests, window, now).await
    }
}

/// A stored record with an expiry, mirroring a sorted set with a TTL.
#[derive(Debug, Default)]
struct StoredWindow {
    state: WindowState,
    expires_at: Timestamp,
}

/// Single-process window store.
///
/// Runs the same algorithm as the Redis script under one lock, with record
/// expiry evaluated against the `now` supplied by each check. A check drops
/// its own key's record once expired and never stores a record for a
/// rejected first check. Keys that are never checked again stay until
/// [`purge_expired`](MemoryStore::purge_expired) runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredWindow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live record exists for `store_key` at `now`.
    pub fn contains(&self, store_key: &str, now: Timestamp) -> bool {
        self.records
            .lock()
            .get(store_key)
            .is_some_and(|record| record.expires_at > now)
    }

    /// Retained entries for `store_key`, oldest first, ignoring expiry.
    pub fn entries(&self, store_key: &str) -> Vec<Timestamp> {
        self.records
            .lock()
            .get(store_key)
            .map(|record| record.state.events())
            .unwrap_or_default()
    }

    /// Drop records whose expiry has passed. Returns how many were dropped.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        before - records.len()
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn check_and_record(
        &self,
        store_key: &str,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision> {
        let mut records = self.records.lock();

        if records.get(store_key).is_some_and(|record| record.expires_at <= now) {
            trace!(store_key, "Record expired, starting fresh");
            records.remove(store_key);
        }

        if let Some(record) = records.get_mut(store_key) {
            let decision = record.state.check(max_requests, window, now);
            if decision.allowed {
                // a late-arriving event never shortens the record's life
                record.expires_at = record.expires_at.max(now.saturating_add(window));
            }
            return Ok(decision);
        }

        let mut state = WindowState::new();
        let decision = state.check(max_requests, window, now);
        if decision.allowed {
            records.insert(
                store_key.to_string(),
                StoredWindow {
                    state,
                    expires_at: now.saturating_add(window),
                },
            );
        }
        Ok(decision)
    }
}
