//! The shared keyed store and its Redis implementation.
//!
//! Everything the coordination layer needs from its backing store fits in a
//! small trait: get/set/delete with TTLs, a conditional "only if absent"
//! write, and two atomic compare-then-act scripts (compare-and-delete,
//! compare-and-extend). Redis provides the scripts natively via Lua; a
//! store without server-side scripting would implement them with its own
//! optimistic-concurrency primitive.

use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::error::{CoordinationError, Result};

/// Outcome of a create-if-absent reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The key was absent and is now written.
    Reserved,
    /// The key already existed; it expires in `remaining`.
    Held {
        /// Time until the existing reservation expires.
        remaining: Duration,
    },
}

/// A keyed store with expiration and atomic conditional writes.
///
/// All operations are a single bounded round trip; there is no queueing or
/// retry loop at this layer.
pub trait KeyedStore: Send + Sync {
    /// Write `value` with expiry `ttl` only if `key` is absent. Returns
    /// whether this call was the writer.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Write `value` with expiry `ttl`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn set(&self, key: &str, value: &str, ttl: Duration)
    -> impl Future<Output = Result<()>> + Send;

    /// Read the value at `key`, if present and unexpired.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Delete `key` unconditionally.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Atomically delete `key` only if its current value equals `expected`.
    /// Returns whether a deletion happened.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Atomically extend `key`'s expiry to `ttl` only if its current value
    /// equals `expected`. Returns whether the extension happened.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Create-if-absent that reports the holder's remaining TTL on
    /// contention, in the same round trip.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn reserve(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<ReserveOutcome>> + Send;

    /// Remaining TTL of `key`, or `None` if absent or without expiry.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StoreUnavailable`] on connectivity failure.
    fn ttl_remaining(&self, key: &str) -> impl Future<Output = Result<Option<Duration>>> + Send;
}

/// Delete `KEYS[1]` only when it still holds `ARGV[1]`.
const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

/// Extend `KEYS[1]` to `ARGV[2]` ms only when it still holds `ARGV[1]`.
const COMPARE_AND_EXTEND: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
";

/// Set `KEYS[1]` if absent; otherwise report the holder's remaining PTTL.
const RESERVE: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return -1
end
local remaining = redis.call('PTTL', KEYS[1])
if remaining < 0 then
    remaining = 0
end
return remaining
";

/// Redis-backed keyed store.
///
/// Uses a [`ConnectionManager`] for connection pooling and automatic
/// reconnection; conditional writes use `SET NX PX`, the compare-then-act
/// operations run as server-side Lua scripts.
#[derive(Clone)]
pub struct RedisKeyedStore {
    conn_manager: ConnectionManager,
}

impl RedisKeyedStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::StoreUnavailable`] if the connection
    /// cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| CoordinationError::StoreUnavailable {
            detail: format!("failed to create Redis client: {e}"),
        })?;

        let conn_manager =
            ConnectionManager::new(client)
                .await
                .map_err(|e| CoordinationError::StoreUnavailable {
                    detail: format!("failed to create Redis connection manager: {e}"),
                })?;

        Ok(Self { conn_manager })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn unavailable(e: &redis::RedisError) -> CoordinationError {
        CoordinationError::StoreUnavailable {
            detail: e.to_string(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis() as u64
}

impl KeyedStore for RedisKeyedStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::unavailable(&e))?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::unavailable(&e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(key).await.map_err(|e| Self::unavailable(&e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(key).await.map_err(|e| Self::unavailable(&e))?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::unavailable(&e))?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let extended: i64 = redis::Script::new(COMPARE_AND_EXTEND)
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::unavailable(&e))?;
        Ok(extended == 1)
    }

    async fn reserve(&self, key: &str, value: &str, ttl: Duration) -> Result<ReserveOutcome> {
        let mut conn = self.conn_manager.clone();
        let reply: i64 = redis::Script::new(RESERVE)
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::unavailable(&e))?;
        if reply < 0 {
            Ok(ReserveOutcome::Reserved)
        } else {
            let remaining = u64::try_from(reply).unwrap_or(0);
            Ok(ReserveOutcome::Held {
                remaining: Duration::from_millis(remaining),
            })
        }
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn_manager.clone();
        let pttl: i64 = conn.pttl(key).await.map_err(|e| Self::unavailable(&e))?;
        match u64::try_from(pttl) {
            // -2: absent; -1: present without expiry
            Err(_) => Ok(None),
            Ok(millis) => Ok(Some(Duration::from_millis(millis))),
        }
    }
}
