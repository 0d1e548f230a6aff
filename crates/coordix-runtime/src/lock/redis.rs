//! Redis-backed [`LockAdapter`](super::LockAdapter) using `PEXPIREAT`-style
//! Lua scripts for every atomic mutation.
//!
//! Grounded on `other_examples/...acteon...redis-src-lock.rs`'s
//! `RedisDistributedLock`: a connection pool plus one `redis::Script` per
//! mutation, each invoked as a single round trip so the read-decide-write is
//! atomic server-side. Values are stored as `owner\|expiration` (expiration
//! `""` meaning unexpiring) rather than relying on Redis's own key TTL, since
//! an unexpiring lock must remain readable by [`LockAdapter::read`] forever
//! and Redis has no native "set with no expiry but still queryable owner"
//! distinction once `PERSIST` is involved elsewhere in this library
//! (semaphore slots reuse the same convention).

use async_trait::async_trait;
use coordix_core::{CoordError, TimeSpan};
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};

use super::{LockAdapter, LockRecord};

const ACQUIRE_SCRIPT: &str = r"
local existing = redis.call('GET', KEYS[1])
if existing == false then
    redis.call('SET', KEYS[1], ARGV[1] .. '|' .. ARGV[2])
    return 1
end
local sep = string.find(existing, '|', 1, true)
local owner = string.sub(existing, 1, sep - 1)
local expiration = string.sub(existing, sep + 1)
local now = tonumber(ARGV[3])
if expiration ~= '' and tonumber(expiration) <= now then
    redis.call('SET', KEYS[1], ARGV[1] .. '|' .. ARGV[2])
    return 1
end
if owner == ARGV[1] then
    return 1
end
return 0
";

const RELEASE_SCRIPT: &str = r"
local existing = redis.call('GET', KEYS[1])
if existing == false then return 0 end
local sep = string.find(existing, '|', 1, true)
local owner = string.sub(existing, 1, sep - 1)
local expiration = string.sub(existing, sep + 1)
local now = tonumber(ARGV[2])
if expiration ~= '' and tonumber(expiration) <= now then return 0 end
if owner ~= ARGV[1] then return 0 end
redis.call('DEL', KEYS[1])
return 1
";

const REFRESH_SCRIPT: &str = r"
local existing = redis.call('GET', KEYS[1])
if existing == false then return 0 end
local sep = string.find(existing, '|', 1, true)
local owner = string.sub(existing, 1, sep - 1)
local expiration = string.sub(existing, sep + 1)
local now = tonumber(ARGV[3])
if owner ~= ARGV[1] then return 0 end
if expiration == '' or tonumber(expiration) <= now then return 0 end
redis.call('SET', KEYS[1], ARGV[1] .. '|' .. ARGV[2])
return 1
";

/// A Redis-backed lock table reached through a `deadpool_redis` pool.
pub struct RedisLockAdapter {
    pool: Pool,
}

impl RedisLockAdapter {
    /// Binds to an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn encode_expiration(expiration: Option<u64>) -> String {
        expiration.map_or_else(String::new, |ms| ms.to_string())
    }

    fn decode(value: &str) -> Option<(String, Option<u64>)> {
        let (owner, expiration) = value.split_once('|')?;
        let expiration = if expiration.is_empty() {
            None
        } else {
            expiration.parse().ok()
        };
        Some((owner.to_string(), expiration))
    }
}

#[async_trait]
impl LockAdapter for RedisLockAdapter {
    fn backend_kind(&self) -> &str {
        "redis"
    }

    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let expiration = Self::encode_expiration(ttl.expiration_from(now));
        let result: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(expiration)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result == 1)
    }

    async fn release(&self, key: &str, owner: &str, now: u64) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let result: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result == 1)
    }

    async fn force_release(&self, key: &str) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let removed: i64 = conn.del(key).await.map_err(anyhow::Error::from)?;
        Ok(removed > 0)
    }

    async fn refresh(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let expiration = Self::encode_expiration(ttl.expiration_from(now));
        let result: i64 = Script::new(REFRESH_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(expiration)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result == 1)
    }

    async fn read(&self, key: &str, now: u64) -> Result<Option<LockRecord>, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let value: Option<String> = conn.get(key).await.map_err(anyhow::Error::from)?;
        Ok(value.and_then(|v| Self::decode(&v)).and_then(|(owner, expiration)| {
            if coordix_core::time::is_expired(expiration, now) {
                None
            } else {
                Some(LockRecord {
                    key: key.to_string(),
                    owner,
                    expiration,
                })
            }
        }))
    }
}
