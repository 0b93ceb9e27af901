//! Sliding window rate limiting: state, clocks, local and distributed limiters.

mod backend;
pub mod clock;
mod distributed;
mod key;
mod limiter;
mod redis_store;
mod store;
mod window;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock, Timestamp};
pub use distributed::{DistributedLimiter, DEFAULT_STORE_TIMEOUT};
pub use key::{RateLimitKey, DEFAULT_KEY_PREFIX};
pub use limiter::LocalLimiter;
pub use redis_store::{RedisStore, SLIDING_WINDOW_SCRIPT};
pub use store::{MemoryStore, WindowStore};
pub use window::{LimitPolicy, WindowDecision, WindowState, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
