//! In-memory [`LockAdapter`](super::LockAdapter), process-local.
//!
//! Grounded on `storage/engines/hashmap.rs`'s `HashMapStorage`: a
//! `DashMap`-backed concurrent map using the `entry` API as the
//! per-key critical section instead of an outer lock.

use async_trait::async_trait;
use coordix_core::{CoordError, TimeSpan};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{LockAdapter, LockRecord};

/// A process-local lock table. Expired records are reclaimed lazily on the
/// next `acquire`/`read` that touches the same key, never by a background
/// sweep — there is no cross-process visibility to protect.
#[derive(Default)]
pub struct MemoryLockAdapter {
    records: DashMap<String, LockRecord>,
}

impl MemoryLockAdapter {
    /// An empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl LockAdapter for MemoryLockAdapter {
    fn backend_kind(&self) -> &str {
        "memory"
    }

    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        match self.records.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(LockRecord {
                    key: key.to_string(),
                    owner: owner.to_string(),
                    expiration: ttl.expiration_from(now),
                });
                Ok(true)
            }
            Entry::Occupied(mut entry) => {
                let expired = entry.get().is_expired(now);
                if expired {
                    entry.insert(LockRecord {
                        key: key.to_string(),
                        owner: owner.to_string(),
                        expiration: ttl.expiration_from(now),
                    });
                    Ok(true)
                } else if entry.get().owner == owner {
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn release(&self, key: &str, owner: &str, now: u64) -> Result<bool, CoordError> {
        if let Entry::Occupied(entry) = self.records.entry(key.to_string()) {
            if !entry.get().is_expired(now) && entry.get().owner == owner {
                entry.remove();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn force_release(&self, key: &str) -> Result<bool, CoordError> {
        Ok(self.records.remove(key).is_some())
    }

    async fn refresh(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        if let Entry::Occupied(mut entry) = self.records.entry(key.to_string()) {
            let eligible = {
                let record = entry.get();
                record.owner == owner && record.expiration.is_some_and(|exp| exp > now)
            };
            if eligible {
                entry.get_mut().expiration = ttl.expiration_from(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn read(&self, key: &str, now: u64) -> Result<Option<LockRecord>, CoordError> {
        Ok(self
            .records
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|record| !record.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vacant_key_is_acquired_unconditionally() {
        let adapter = MemoryLockAdapter::new();
        assert!(adapter
            .acquire("k", "owner-a", TimeSpan::unexpiring(), 0)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_record_is_reclaimed_on_acquire() {
        let adapter = MemoryLockAdapter::new();
        assert!(adapter
            .acquire("k", "owner-a", TimeSpan::from_millis(10), 0)
            .await
            .unwrap());
        assert!(adapter
            .acquire("k", "owner-b", TimeSpan::unexpiring(), 50)
            .await
            .unwrap());
        let record = adapter.read("k", 50).await.unwrap().unwrap();
        assert_eq!(record.owner, "owner-b");
    }
}
