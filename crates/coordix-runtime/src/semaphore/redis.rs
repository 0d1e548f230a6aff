//! Redis-backed [`SemaphoreAdapter`](super::SemaphoreAdapter): a sorted set
//! keyed by slot id with score = expiration-millis (`0` meaning unexpiring),
//! plus a sibling `<key>__limit` string holding the bound limit.
//!
//! Grounded on the same `other_examples/...acteon...redis-src-lock.rs`
//! Lua-script idiom as [`crate::lock::redis`], generalized from a single
//! scalar key to a sorted set per spec §6's exact schema description.

use async_trait::async_trait;
use coordix_core::{CoordError, TimeSpan};
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};

use super::{SemaphoreAdapter, SemaphoreRecord, SlotRecord};

const LIMIT_SUFFIX: &str = "__limit";

// KEYS[1] = slots zset, KEYS[2] = limit key
// ARGV[1] = slot_id, ARGV[2] = expiration score (0 = unexpiring), ARGV[3] = limit, ARGV[4] = now
const ACQUIRE_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 1, ARGV[4])
local stored_limit = redis.call('GET', KEYS[2])
local limit = tonumber(ARGV[3])
if stored_limit == false then
    redis.call('SET', KEYS[2], limit)
elseif redis.call('ZCARD', KEYS[1]) == 0 then
    redis.call('SET', KEYS[2], limit)
else
    limit = tonumber(stored_limit)
end

if redis.call('ZSCORE', KEYS[1], ARGV[1]) ~= false then
    return 1
end

if redis.call('ZCARD', KEYS[1]) >= limit then
    return 0
end

redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])

if redis.call('ZCOUNT', KEYS[1], 0, 0) > 0 then
    redis.call('PERSIST', KEYS[1])
else
    local max_score = redis.call('ZREVRANGE', KEYS[1], 0, 0, 'WITHSCORES')[2]
    redis.call('PEXPIREAT', KEYS[1], max_score)
end
return 1
";

// KEYS[1] = slots zset, KEYS[2] = limit key; ARGV[1] = slot_id, ARGV[2] = now
const RELEASE_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 1, ARGV[2])
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
if redis.call('ZCARD', KEYS[1]) == 0 then
    redis.call('DEL', KEYS[1], KEYS[2])
end
return removed
";

// KEYS[1] = slots zset; ARGV[1] = slot_id, ARGV[2] = expiration score, ARGV[3] = now
const REFRESH_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 1, ARGV[3])
if redis.call('ZSCORE', KEYS[1], ARGV[1]) == false then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
";

/// A Redis-backed semaphore, reached through a `deadpool_redis` pool.
pub struct RedisSemaphoreAdapter {
    pool: Pool,
}

impl RedisSemaphoreAdapter {
    /// Binds to an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn limit_key(key: &str) -> String {
        format!("{key}{LIMIT_SUFFIX}")
    }

    fn encode_score(expiration: Option<u64>) -> u64 {
        expiration.unwrap_or(0)
    }
}

#[async_trait]
impl SemaphoreAdapter for RedisSemaphoreAdapter {
    fn backend_kind(&self) -> &str {
        "redis"
    }

    async fn acquire(
        &self,
        key: &str,
        slot_id: &str,
        limit: u32,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let score = Self::encode_score(ttl.expiration_from(now));
        let result: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(key)
            .key(Self::limit_key(key))
            .arg(slot_id)
            .arg(score)
            .arg(limit)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result == 1)
    }

    async fn release(&self, key: &str, slot_id: &str, now: u64) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let result: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .key(Self::limit_key(key))
            .arg(slot_id)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result == 1)
    }

    async fn force_release_all(&self, key: &str) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let removed: i64 = conn
            .del(vec![key.to_string(), Self::limit_key(key)])
            .await
            .map_err(anyhow::Error::from)?;
        Ok(removed > 0)
    }

    async fn refresh(
        &self,
        key: &str,
        slot_id: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let score = Self::encode_score(ttl.expiration_from(now));
        let result: i64 = Script::new(REFRESH_SCRIPT)
            .key(key)
            .arg(slot_id)
            .arg(score)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result == 1)
    }

    async fn read(&self, key: &str, now: u64) -> Result<Option<SemaphoreRecord>, CoordError> {
        let mut conn = self.pool.get().await.map_err(anyhow::Error::from)?;
        let _: i64 = conn
            .zrembyscore(key, 1, now)
            .await
            .map_err(anyhow::Error::from)?;

        let limit: Option<u32> = conn.get(Self::limit_key(key)).await.map_err(anyhow::Error::from)?;
        let Some(limit) = limit else {
            return Ok(None);
        };

        let members: Vec<(String, u64)> = conn
            .zrange_withscores(key, 0, -1)
            .await
            .map_err(anyhow::Error::from)?;
        if members.is_empty() {
            return Ok(None);
        }

        Ok(Some(SemaphoreRecord {
            key: key.to_string(),
            limit,
            slots: members
                .into_iter()
                .map(|(slot_id, score)| SlotRecord {
                    slot_id,
                    expiration: if score == 0 { None } else { Some(score) },
                })
                .collect(),
        }))
    }
}
