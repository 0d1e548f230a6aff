//! Process-local [`CacheAdapter`] with an actual per-entry TTL timer, unlike
//! lock/semaphore's purely-lazy expiration — so an idle reader still
//! observes `EXPIRED` events close to when the entry actually lapses.
//!
//! Grounded on `storage/engines/hashmap.rs`'s `DashMap` table for storage,
//! and on `network/shutdown.rs`'s `CancellationToken`-guarded background
//! task for the per-entry timer lifecycle. Storage and the expiration hook
//! live behind an inner `Arc` so a spawned timer task can hold a cheap
//! handle back to the table without the adapter needing a self-referential
//! `Arc<Self>`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use coordix_core::{time::is_expired, CoordError, TimeSpan};
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{numeric_value, CacheAdapter, CacheRecord};

struct Slot {
    record: CacheRecord,
    timer: Option<CancellationToken>,
}

struct Inner {
    records: DashMap<String, Slot>,
    expiration_hook: ArcSwapOption<dyn Fn(String) + Send + Sync>,
}

/// A process-local cache table with active per-entry TTL timers.
#[derive(Clone)]
pub struct MemoryCacheAdapter {
    inner: Arc<Inner>,
}

impl Default for MemoryCacheAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                records: DashMap::new(),
                expiration_hook: ArcSwapOption::empty(),
            }),
        }
    }

    fn cancel_existing_timer(&self, key: &str) {
        if let Some(mut slot) = self.inner.records.get_mut(key) {
            if let Some(timer) = slot.timer.take() {
                timer.cancel();
            }
        }
    }

    fn schedule_timer(&self, key: String, expiration: u64, now: u64) -> CancellationToken {
        let token = CancellationToken::new();
        let child = token.clone();
        let inner = Arc::clone(&self.inner);
        let delay = Duration::from_millis(expiration.saturating_sub(now));
        tokio::spawn(async move {
            tokio::select! {
                () = child.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let fired = inner.records.remove_if(&key, |_, slot| slot.record.expiration == Some(expiration));
                    if fired.is_some() {
                        if let Some(hook) = inner.expiration_hook.load_full() {
                            hook(key);
                        }
                    }
                }
            }
        });
        token
    }

    fn insert_with_timer(&self, key: &str, record: CacheRecord, now: u64) {
        self.cancel_existing_timer(key);
        let timer = record.expiration.map(|expiration| self.schedule_timer(key.to_string(), expiration, now));
        self.inner.records.insert(key.to_string(), Slot { record, timer });
    }
}

#[async_trait]
impl CacheAdapter for MemoryCacheAdapter {
    fn backend_kind(&self) -> &str {
        "memory"
    }

    fn set_expiration_hook(&self, hook: Arc<dyn Fn(String) + Send + Sync>) {
        self.inner.expiration_hook.store(Some(hook));
    }

    async fn get(&self, key: &str, now: u64) -> Result<Option<Value>, CoordError> {
        Ok(self
            .inner
            .records
            .get(key)
            .filter(|slot| !is_expired(slot.record.expiration, now))
            .map(|slot| slot.record.value.clone()))
    }

    async fn add(&self, key: &str, value: Value, ttl: TimeSpan, now: u64) -> Result<bool, CoordError> {
        if self
            .inner
            .records
            .get(key)
            .is_some_and(|slot| !is_expired(slot.record.expiration, now))
        {
            return Ok(false);
        }
        self.insert_with_timer(
            key,
            CacheRecord {
                key: key.to_string(),
                value,
                expiration: ttl.expiration_from(now),
            },
            now,
        );
        Ok(true)
    }

    async fn update(&self, key: &str, value: Value, now: u64) -> Result<bool, CoordError> {
        let Some(mut slot) = self.inner.records.get_mut(key) else {
            return Ok(false);
        };
        if is_expired(slot.record.expiration, now) {
            return Ok(false);
        }
        slot.record.value = value;
        Ok(true)
    }

    async fn put(&self, key: &str, value: Value, ttl: TimeSpan, now: u64) -> Result<(), CoordError> {
        self.insert_with_timer(
            key,
            CacheRecord {
                key: key.to_string(),
                value,
                expiration: ttl.expiration_from(now),
            },
            now,
        );
        Ok(())
    }

    async fn remove(&self, key: &str, now: u64) -> Result<bool, CoordError> {
        self.cancel_existing_timer(key);
        Ok(self
            .inner
            .records
            .remove(key)
            .is_some_and(|(_, slot)| !is_expired(slot.record.expiration, now)))
    }

    async fn increment(&self, key: &str, delta: i64, now: u64) -> Result<i64, CoordError> {
        let mut entry = self
            .inner
            .records
            .entry(key.to_string())
            .and_modify(|slot| {
                if is_expired(slot.record.expiration, now) {
                    slot.record.value = Value::from(0);
                    slot.record.expiration = None;
                }
            })
            .or_insert_with(|| Slot {
                record: CacheRecord {
                    key: key.to_string(),
                    value: Value::from(0),
                    expiration: None,
                },
                timer: None,
            });
        let updated = numeric_value(&entry.record.value)?.saturating_add(delta);
        entry.record.value = Value::from(updated);
        Ok(updated)
    }

    async fn clear(&self, group_prefix: &str, now: u64) -> Result<u64, CoordError> {
        let keys: Vec<String> = self
            .inner
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(group_prefix))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0u64;
        for key in keys {
            self.cancel_existing_timer(&key);
            if let Some((_, slot)) = self.inner.records.remove(&key) {
                if !is_expired(slot.record.expiration, now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_timer_fires_expiration_hook() {
        let adapter = MemoryCacheAdapter::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        adapter.set_expiration_hook(Arc::new(move |key| {
            let _ = tx.send(key);
        }));

        adapter
            .put("k", Value::from(1), TimeSpan::from_millis(10), 0)
            .await
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert_eq!(fired.unwrap(), Some("k".to_string()));
    }

    #[tokio::test]
    async fn overwrite_cancels_previous_timer() {
        let adapter = MemoryCacheAdapter::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        adapter.set_expiration_hook(Arc::new(move |key| {
            let _ = tx.send(key);
        }));

        adapter
            .put("k", Value::from(1), TimeSpan::from_millis(10), 0)
            .await
            .unwrap();
        adapter.put("k", Value::from(2), TimeSpan::unexpiring(), 0).await.unwrap();

        let fired = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(fired.is_err(), "cancelled timer must not fire");
    }
}
