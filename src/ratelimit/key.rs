//! Rate limit key handling.

use std::fmt;

use crate::error::{GuardError, Result};

/// Default namespace prefix for keys in a shared store.
pub const DEFAULT_KEY_PREFIX: &str = "rate";

/// An opaque identifier for the entity being throttled.
///
/// Keys are compared by exact string value, so the same caller must always
/// map to the same key and different callers to different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Create a key, rejecting empty or whitespace-only identifiers.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GuardError::MissingKey);
        }
        Ok(Self(id))
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The store key for this identifier under `prefix`.
    ///
    /// Format: `"{prefix}:{key}"`, e.g. `rate:user-42`.
    pub fn namespaced(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.0)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
