//! Redis-backed window store.
//!
//! Each check is a single `EVALSHA` of [`SLIDING_WINDOW_SCRIPT`]. Redis runs
//! scripts without interleaving other commands, which makes the
//! prune-count-record sequence atomic across every process sharing the
//! server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{debug, info};
use uuid::Uuid;

use super::clock::{window_millis, Timestamp};
use super::store::WindowStore;
use super::window::WindowDecision;
use crate::error::{GuardError, Result};

/// Sliding window check-and-record.
///
/// KEYS[1]: sorted set of events scored by timestamp (ms).
/// ARGV: limit, window (ms), now (ms), unique member for this event.
/// Returns `{allowed, count, oldest}` where `oldest` is the score of the
/// oldest retained entry on rejection and -1 otherwise.
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count >= limit then
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    if oldest[2] then
        return {0, count, tonumber(oldest[2])}
    end
    return {0, count, -1}
end

redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, window)
return {1, count + 1, -1}
"#;

/// Window store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed connection shared by all checks
    conn: MultiplexedConnection,
    /// The check-and-record script (loaded lazily by `EVALSHA` fallback)
    script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("script_hash", &self.script.get_hash())
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        info!(url = %sanitize_url(url), "Connecting to Redis window store");

        let client = Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                GuardError::StoreUnavailable(format!(
                    "connect timed out after {}ms",
                    connect_timeout.as_millis()
                ))
            })??;

        info!("Redis window store connected");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    /// Health check.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis health check passed");
        Ok(())
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn check_and_record(
        &self,
        store_key: &str,
        max_requests: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<WindowDecision> {
        let mut conn = self.conn.clone();
        // Events at the same millisecond need distinct members.
        let member = format!("{}-{}", now.as_millis(), Uuid::new_v4().simple());

        let reply: Vec<i64> = self
            .script
            .key(store_key)
            .arg(max_requests)
            .arg(window_millis(window))
            .arg(now.as_millis())
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        parse_reply(&reply, max_requests, window, now)
    }
}

/// Turn the script's `{allowed, count, oldest}` reply into a decision.
fn parse_reply(
    reply: &[i64],
    max_requests: u32,
    window: Duration,
    now: Timestamp,
) -> Result<WindowDecision> {
    let [allowed, count, oldest] = reply else {
        return Err(GuardError::StoreUnavailable(format!(
            "unexpected script reply: {:?}",
            reply
        )));
    };
    let count = u32::try_from(*count).unwrap_or(u32::MAX);

    if *allowed == 1 {
        return Ok(WindowDecision {
            allowed: true,
            count,
            limit: max_requests,
            retry_after: None,
        });
    }

    let oldest = u64::try_from(*oldest).ok().map(Timestamp::from_millis);
    Ok(WindowDecision::rejected(count, max_requests, oldest, window, now))
}

/// Hide the password portion of a Redis URL for logging.
fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
