//! In-memory [`SemaphoreAdapter`](super::SemaphoreAdapter), process-local.
//!
//! Grounded on `storage/engines/hashmap.rs`'s `DashMap`-backed map, same as
//! [`crate::lock::memory`], but keyed by the whole [`SemaphoreRecord`]
//! instead of a scalar value since acquire must see every slot to decide
//! admission.

use async_trait::async_trait;
use coordix_core::{CoordError, TimeSpan};
use dashmap::DashMap;

use super::{SemaphoreAdapter, SemaphoreRecord, SlotRecord};

/// A process-local semaphore table.
#[derive(Default)]
pub struct MemorySemaphoreAdapter {
    records: DashMap<String, SemaphoreRecord>,
}

impl MemorySemaphoreAdapter {
    /// An empty semaphore table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

fn purge(record: &mut SemaphoreRecord, now: u64) {
    record.slots.retain(|slot| slot.is_live(now));
}

#[async_trait]
impl SemaphoreAdapter for MemorySemaphoreAdapter {
    fn backend_kind(&self) -> &str {
        "memory"
    }

    async fn acquire(
        &self,
        key: &str,
        slot_id: &str,
        limit: u32,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut entry = self.records.entry(key.to_string()).or_insert_with(|| SemaphoreRecord {
            key: key.to_string(),
            limit,
            slots: Vec::new(),
        });
        purge(&mut entry, now);
        if entry.slots.is_empty() {
            entry.limit = limit;
        }

        if entry.slots.iter().any(|slot| slot.slot_id == slot_id) {
            return Ok(true);
        }

        if entry.slots.len() as u32 >= entry.limit {
            return Ok(false);
        }

        entry.slots.push(SlotRecord {
            slot_id: slot_id.to_string(),
            expiration: ttl.expiration_from(now),
        });
        Ok(true)
    }

    async fn release(&self, key: &str, slot_id: &str, now: u64) -> Result<bool, CoordError> {
        let Some(mut entry) = self.records.get_mut(key) else {
            return Ok(false);
        };
        purge(&mut entry, now);
        let before = entry.slots.len();
        entry.slots.retain(|slot| slot.slot_id != slot_id);
        let removed = entry.slots.len() < before;
        let now_empty = entry.slots.is_empty();
        drop(entry);
        if now_empty {
            self.records.remove(key);
        }
        Ok(removed)
    }

    async fn force_release_all(&self, key: &str) -> Result<bool, CoordError> {
        Ok(self.records.remove(key).is_some())
    }

    async fn refresh(
        &self,
        key: &str,
        slot_id: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let Some(mut entry) = self.records.get_mut(key) else {
            return Ok(false);
        };
        purge(&mut entry, now);
        let Some(slot) = entry.slots.iter_mut().find(|slot| slot.slot_id == slot_id) else {
            return Ok(false);
        };
        slot.expiration = ttl.expiration_from(now);
        Ok(true)
    }

    async fn read(&self, key: &str, now: u64) -> Result<Option<SemaphoreRecord>, CoordError> {
        let Some(mut entry) = self.records.get_mut(key) else {
            return Ok(None);
        };
        purge(&mut entry, now);
        if entry.slots.is_empty() {
            drop(entry);
            self.records.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.clone()))
    }
}
