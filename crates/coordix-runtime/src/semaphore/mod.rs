//! Distributed semaphore: N-slot counting lock with per-slot TTLs.
//!
//! Shares its composition shape with [`crate::lock`]: `SemaphoreProvider` →
//! `SemaphoreHandle` → `dyn SemaphoreAdapter` (native) or
//! [`DatabaseSemaphoreBridge`] wrapping a [`DatabaseSemaphoreAdapter`] →
//! backend. The hard invariant is the "limit is fixed by the first
//! acquire, aggregate TTL is the max of live slot TTLs" rule in §4.2.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod sql;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordix_core::time::{is_expired, now_millis};
use coordix_core::{
    CoordError, HandleEnvelope, KeyPrefixer, NamedEvent, SerdeRegistry, SerdeTransformer,
    TimeSpan, ENVELOPE_VERSION,
};
use serde::{Deserialize, Serialize};

/// One reserved slot within a [`SemaphoreRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Opaque slot identifier.
    pub slot_id: String,
    /// Unix-millis expiration, `None` if unexpiring.
    pub expiration: Option<u64>,
}

impl SlotRecord {
    fn is_live(&self, now: u64) -> bool {
        !is_expired(self.expiration, now)
    }
}

/// The storage-side shape of a semaphore record (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreRecord {
    /// The prefixed key this record lives under.
    pub key: String,
    /// Admission limit, fixed by the first successful acquire.
    pub limit: u32,
    /// Every slot, live or expired (expired ones are purged on read).
    pub slots: Vec<SlotRecord>,
}

impl SemaphoreRecord {
    fn live_slots(&self, now: u64) -> impl Iterator<Item = &SlotRecord> {
        self.slots.iter().filter(move |slot| slot.is_live(now))
    }

    /// The aggregate expiration: `max` of live slots' expirations, or `None`
    /// if any live slot is unexpiring (or there are no live slots).
    fn aggregate_expiration(&self, now: u64) -> Option<u64> {
        let mut max_seen = Some(0u64);
        for slot in self.live_slots(now) {
            match (slot.expiration, max_seen) {
                (None, _) => return None,
                (Some(_), None) => return None,
                (Some(exp), Some(running)) => max_seen = Some(running.max(exp)),
            }
        }
        max_seen.filter(|_| self.live_slots(now).next().is_some())
    }
}

/// Semaphore event taxonomy (spec §6), mirroring the lock family with a
/// `SLOT_` prefix.
#[derive(Debug, Clone)]
pub enum SemaphoreEvent {
    /// `SLOT_ACQUIRED`
    SlotAcquired { key: String, slot_id: String },
    /// `SLOT_ALREADY_ACQUIRED`
    SlotAlreadyAcquired { key: String, slot_id: String },
    /// `SLOT_RELEASED`
    SlotReleased { key: String, slot_id: String },
    /// `SLOT_FORCE_RELEASED_ALL`
    SlotForceReleasedAll { key: String },
    /// `SLOT_REFRESHED`
    SlotRefreshed { key: String, slot_id: String },
    /// `UNOWNED_SLOT_RELEASE`
    UnownedSlotRelease { key: String, slot_id: String },
    /// `UNOWNED_SLOT_REFRESH`
    UnownedSlotRefresh { key: String, slot_id: String },
    /// `UNEXPECTED_ERROR`
    UnexpectedError { key: String, message: String },
}

impl NamedEvent for SemaphoreEvent {
    fn event_name(&self) -> &str {
        match self {
            Self::SlotAcquired { .. } => "SLOT_ACQUIRED",
            Self::SlotAlreadyAcquired { .. } => "SLOT_ALREADY_ACQUIRED",
            Self::SlotReleased { .. } => "SLOT_RELEASED",
            Self::SlotForceReleasedAll { .. } => "SLOT_FORCE_RELEASED_ALL",
            Self::SlotRefreshed { .. } => "SLOT_REFRESHED",
            Self::UnownedSlotRelease { .. } => "UNOWNED_SLOT_RELEASE",
            Self::UnownedSlotRefresh { .. } => "UNOWNED_SLOT_REFRESH",
            Self::UnexpectedError { .. } => "UNEXPECTED_ERROR",
        }
    }
}

/// The native, atomic semaphore adapter contract.
#[async_trait]
pub trait SemaphoreAdapter: Send + Sync {
    /// Identifies this adapter's backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Reserves `slot_id` under `key` bound to `limit`, per the §4.2
    /// acquire contract (limit-binding, idempotent re-acquire, purge of
    /// expired slots).
    async fn acquire(
        &self,
        key: &str,
        slot_id: &str,
        limit: u32,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError>;

    /// Removes `slot_id` from `key`'s live slots.
    async fn release(&self, key: &str, slot_id: &str, now: u64) -> Result<bool, CoordError>;

    /// Unconditionally clears every slot and the limit record for `key`.
    async fn force_release_all(&self, key: &str) -> Result<bool, CoordError>;

    /// Extends `slot_id`'s expiration, only if it is currently live.
    async fn refresh(
        &self,
        key: &str,
        slot_id: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError>;

    /// Reads the current record for `key` with expired slots purged.
    async fn read(&self, key: &str, now: u64) -> Result<Option<SemaphoreRecord>, CoordError>;
}

fn _assert_semaphore_adapter_object_safe(_: &Arc<dyn SemaphoreAdapter>) {}

/// Raw CRUD operations a `DatabaseSemaphoreAdapter` transaction exposes.
#[async_trait]
pub trait SemaphoreTransaction: Send {
    /// Reads the record for `key` (all slots, including expired ones).
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<SemaphoreRecord>>;

    /// Overwrites the whole record for `key`, or deletes it if `record` has
    /// no slots.
    async fn put(&mut self, key: &str, record: Option<&SemaphoreRecord>) -> anyhow::Result<()>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// A transactional CRUD backend for semaphores.
#[async_trait]
pub trait DatabaseSemaphoreAdapter: Send + Sync {
    /// Identifies this backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Opens a new transaction. Serializable isolation is required.
    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn SemaphoreTransaction + '_>>;
}

/// Lifts a [`DatabaseSemaphoreAdapter`] into the native [`SemaphoreAdapter`]
/// contract, composing the whole §4.2 acquire algorithm (read, purge,
/// limit-bind, insert/idempotent-check, recompute aggregate TTL) inside one
/// transaction.
pub struct DatabaseSemaphoreBridge<D> {
    db: Arc<D>,
}

impl<D> DatabaseSemaphoreBridge<D> {
    /// Wraps `db` as a native semaphore adapter.
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

fn purge_and_update(record: &mut SemaphoreRecord, now: u64) {
    record.slots.retain(|slot| slot.is_live(now));
}

#[async_trait]
impl<D: DatabaseSemaphoreAdapter + 'static> SemaphoreAdapter for DatabaseSemaphoreBridge<D> {
    fn backend_kind(&self) -> &str {
        self.db.backend_kind()
    }

    async fn acquire(
        &self,
        key: &str,
        slot_id: &str,
        limit: u32,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = trx.find(key).await?.unwrap_or(SemaphoreRecord {
            key: key.to_string(),
            limit,
            slots: Vec::new(),
        });
        purge_and_update(&mut record, now);
        if record.slots.is_empty() {
            // Empty records may re-establish the limit (§4.2 "Limit binding").
            record.limit = limit;
        }

        if record.slots.iter().any(|slot| slot.slot_id == slot_id) {
            trx.put(key, Some(&record)).await?;
            trx.commit().await?;
            return Ok(true);
        }

        if record.slots.len() as u32 >= record.limit {
            trx.put(key, Some(&record)).await?;
            trx.commit().await?;
            return Ok(false);
        }

        record.slots.push(SlotRecord {
            slot_id: slot_id.to_string(),
            expiration: ttl.expiration_from(now),
        });
        trx.put(key, Some(&record)).await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn release(&self, key: &str, slot_id: &str, now: u64) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let Some(mut record) = trx.find(key).await? else {
            return Ok(false);
        };
        purge_and_update(&mut record, now);
        let before = record.slots.len();
        record.slots.retain(|slot| slot.slot_id != slot_id);
        let removed = record.slots.len() < before;
        if removed {
            let to_store = if record.slots.is_empty() { None } else { Some(&record) };
            trx.put(key, to_store).await?;
        } else {
            trx.put(key, Some(&record)).await?;
        }
        trx.commit().await?;
        Ok(removed)
    }

    async fn force_release_all(&self, key: &str) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let existed = trx.find(key).await?.is_some();
        trx.put(key, None).await?;
        trx.commit().await?;
        Ok(existed)
    }

    async fn refresh(
        &self,
        key: &str,
        slot_id: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let Some(mut record) = trx.find(key).await? else {
            return Ok(false);
        };
        purge_and_update(&mut record, now);
        let Some(slot) = record.slots.iter_mut().find(|slot| slot.slot_id == slot_id) else {
            trx.put(key, Some(&record)).await?;
            trx.commit().await?;
            return Ok(false);
        };
        slot.expiration = ttl.expiration_from(now);
        trx.put(key, Some(&record)).await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn read(&self, key: &str, now: u64) -> Result<Option<SemaphoreRecord>, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = trx.find(key).await?;
        if let Some(record) = record.as_mut() {
            purge_and_update(record, now);
        }
        trx.commit().await?;
        Ok(record.filter(|record| !record.slots.is_empty()))
    }
}

/// Read-only view returned by [`SemaphoreHandle::get_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemaphoreState {
    /// This slot id holds no reservation.
    Expired,
    /// This slot id currently holds a reservation.
    AcquiredByMe {
        /// Remaining time-to-live for this slot, `None` if unexpiring.
        remaining_time: Option<Duration>,
    },
    /// All `limit` slots are held by other slot ids.
    Full {
        /// Current admission limit.
        limit: u32,
        /// Number of currently live slots.
        live_count: u32,
    },
}

/// Configuration for [`SemaphoreProvider`].
#[derive(Debug, Clone)]
pub struct SemaphoreProviderConfig {
    /// Namespace root for every handle this provider creates.
    pub namespace: String,
    /// Default TTL applied when a caller does not supply one.
    pub default_ttl: TimeSpan,
}

impl Default for SemaphoreProviderConfig {
    fn default() -> Self {
        Self {
            namespace: "@semaphore".to_string(),
            default_ttl: TimeSpan::from_millis(30_000),
        }
    }
}

struct SemaphoreSerdeTransformer {
    name: String,
    backend_kind: String,
    namespace: String,
}

impl SerdeTransformer for SemaphoreSerdeTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_kind(&self) -> &str {
        &self.backend_kind
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Factory for [`SemaphoreHandle`]s.
pub struct SemaphoreProvider {
    adapter: Arc<dyn SemaphoreAdapter>,
    prefixer: KeyPrefixer,
    events: coordix_core::EventBus<SemaphoreEvent>,
    config: SemaphoreProviderConfig,
    serde_registry: Arc<SerdeRegistry>,
    transformer_name: String,
}

impl SemaphoreProvider {
    /// Builds a provider over `adapter`, registering its SerDe transformer.
    pub fn new(
        adapter: Arc<dyn SemaphoreAdapter>,
        config: SemaphoreProviderConfig,
        serde_registry: Arc<SerdeRegistry>,
        transformer_name: impl Into<String>,
    ) -> Self {
        let transformer_name = transformer_name.into();
        let namespace = coordix_core::Namespace::new(config.namespace.clone());
        let prefixer = KeyPrefixer::new(namespace);

        serde_registry.register(Arc::new(SemaphoreSerdeTransformer {
            name: transformer_name.clone(),
            backend_kind: adapter.backend_kind().to_string(),
            namespace: config.namespace.clone(),
        }));

        Self {
            adapter,
            prefixer,
            events: coordix_core::EventBus::new(),
            config,
            serde_registry,
            transformer_name,
        }
    }

    /// The provider's event bus.
    #[must_use]
    pub fn events(&self) -> &coordix_core::EventBus<SemaphoreEvent> {
        &self.events
    }

    /// Creates a handle for `user_key` bound to `limit` concurrent slots.
    #[must_use]
    pub fn create(
        &self,
        user_key: &str,
        slot_id: impl Into<String>,
        limit: u32,
        ttl: Option<TimeSpan>,
    ) -> SemaphoreHandle {
        SemaphoreHandle {
            adapter: Arc::clone(&self.adapter),
            prefixed_key: self.prefixer.prefixed_key(user_key),
            resolved_key: self.prefixer.resolved_key(user_key),
            slot_id: slot_id.into(),
            limit,
            ttl: ttl.unwrap_or(self.config.default_ttl),
            events: self.events.clone(),
            backend_kind: self.adapter.backend_kind().to_string(),
            namespace: self.config.namespace.clone(),
            transformer_name: self.transformer_name.clone(),
        }
    }

    /// Creates a handle with a fresh random slot id.
    #[must_use]
    pub fn create_with_generated_slot(
        &self,
        user_key: &str,
        limit: u32,
        ttl: Option<TimeSpan>,
    ) -> SemaphoreHandle {
        self.create(user_key, uuid::Uuid::new_v4().to_string(), limit, ttl)
    }

    /// Serializes `handle`'s identity into a wire envelope.
    #[must_use]
    pub fn serialize_handle(&self, handle: &SemaphoreHandle) -> HandleEnvelope {
        HandleEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            backend_kind: handle.backend_kind.clone(),
            namespace: handle.namespace.clone(),
            serde_transformer_name: handle.transformer_name.clone(),
            key: handle.resolved_key.clone(),
            owner_or_slot_id: handle.slot_id.clone(),
            limit: Some(handle.limit),
            ttl_ms: handle.ttl.as_millis(),
        }
    }

    /// Reconstructs a handle from `envelope`, or `None` if not applicable.
    #[must_use]
    pub fn restore_handle(&self, envelope: &HandleEnvelope) -> Option<SemaphoreHandle> {
        self.serde_registry.resolve(envelope)?;
        if envelope.backend_kind != self.adapter.backend_kind()
            || envelope.namespace != self.config.namespace
            || envelope.serde_transformer_name != self.transformer_name
        {
            return None;
        }
        Some(SemaphoreHandle {
            adapter: Arc::clone(&self.adapter),
            prefixed_key: self.prefixer.prefixed_key(&envelope.key),
            resolved_key: envelope.key.clone(),
            slot_id: envelope.owner_or_slot_id.clone(),
            limit: envelope.limit.unwrap_or(1),
            ttl: envelope
                .ttl_ms
                .map_or(TimeSpan::unexpiring(), TimeSpan::from_millis),
            events: self.events.clone(),
            backend_kind: envelope.backend_kind.clone(),
            namespace: envelope.namespace.clone(),
            transformer_name: envelope.serde_transformer_name.clone(),
        })
    }
}

/// A key/slot-bound semaphore handle.
pub struct SemaphoreHandle {
    adapter: Arc<dyn SemaphoreAdapter>,
    prefixed_key: String,
    resolved_key: String,
    slot_id: String,
    limit: u32,
    ttl: TimeSpan,
    events: coordix_core::EventBus<SemaphoreEvent>,
    backend_kind: String,
    namespace: String,
    transformer_name: String,
}

impl SemaphoreHandle {
    /// This handle's slot id.
    #[must_use]
    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    /// This handle's resolved (unprefixed) key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.resolved_key
    }

    fn dispatch(&self, event: SemaphoreEvent) {
        self.events.dispatch(event);
    }

    /// Reserve one slot if `live < limit` or this slot id already holds one.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key, slot_id = %self.slot_id))]
    pub async fn acquire(&self) -> Result<bool, CoordError> {
        let now = now_millis();
        let result = self
            .adapter
            .acquire(&self.prefixed_key, &self.slot_id, self.limit, self.ttl, now)
            .await;
        match &result {
            Ok(true) => self.dispatch(SemaphoreEvent::SlotAcquired {
                key: self.resolved_key.clone(),
                slot_id: self.slot_id.clone(),
            }),
            Ok(false) => self.dispatch(SemaphoreEvent::SlotAlreadyAcquired {
                key: self.resolved_key.clone(),
                slot_id: self.slot_id.clone(),
            }),
            Err(error) => self.dispatch(SemaphoreEvent::UnexpectedError {
                key: self.resolved_key.clone(),
                message: error.to_string(),
            }),
        }
        result
    }

    /// Like [`SemaphoreHandle::acquire`] but fails with
    /// [`CoordError::AlreadyAcquired`] instead of returning `false`.
    pub async fn acquire_or_fail(&self) -> Result<(), CoordError> {
        if self.acquire().await? {
            Ok(())
        } else {
            Err(CoordError::AlreadyAcquired)
        }
    }

    /// Retries [`SemaphoreHandle::acquire`] on the given cadence until it
    /// succeeds or `time` elapses.
    pub async fn acquire_blocking(&self, interval: Duration, time: Duration) -> Result<bool, CoordError> {
        let deadline = tokio::time::Instant::now() + time;
        loop {
            if self.acquire().await? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            tokio::time::sleep(interval.min(remaining)).await;
        }
    }

    /// Removes this slot's reservation.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key, slot_id = %self.slot_id))]
    pub async fn release(&self) -> Result<bool, CoordError> {
        let now = now_millis();
        let result = self.adapter.release(&self.prefixed_key, &self.slot_id, now).await;
        match &result {
            Ok(true) => self.dispatch(SemaphoreEvent::SlotReleased {
                key: self.resolved_key.clone(),
                slot_id: self.slot_id.clone(),
            }),
            Ok(false) => self.dispatch(SemaphoreEvent::UnownedSlotRelease {
                key: self.resolved_key.clone(),
                slot_id: self.slot_id.clone(),
            }),
            Err(error) => self.dispatch(SemaphoreEvent::UnexpectedError {
                key: self.resolved_key.clone(),
                message: error.to_string(),
            }),
        }
        result
    }

    /// Clears every slot and the limit record for this key.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key))]
    pub async fn force_release_all(&self) -> Result<bool, CoordError> {
        let result = self.adapter.force_release_all(&self.prefixed_key).await;
        if result.is_ok() {
            self.dispatch(SemaphoreEvent::SlotForceReleasedAll {
                key: self.resolved_key.clone(),
            });
        }
        result
    }

    /// Extends this slot's TTL, only if currently live.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key, slot_id = %self.slot_id))]
    pub async fn refresh(&self, ttl: TimeSpan) -> Result<bool, CoordError> {
        let now = now_millis();
        let result = self.adapter.refresh(&self.prefixed_key, &self.slot_id, ttl, now).await;
        match &result {
            Ok(true) => self.dispatch(SemaphoreEvent::SlotRefreshed {
                key: self.resolved_key.clone(),
                slot_id: self.slot_id.clone(),
            }),
            Ok(false) => self.dispatch(SemaphoreEvent::UnownedSlotRefresh {
                key: self.resolved_key.clone(),
                slot_id: self.slot_id.clone(),
            }),
            Err(error) => self.dispatch(SemaphoreEvent::UnexpectedError {
                key: self.resolved_key.clone(),
                message: error.to_string(),
            }),
        }
        result
    }

    /// Read-only state snapshot.
    pub async fn get_state(&self) -> Result<SemaphoreState, CoordError> {
        let now = now_millis();
        let record = self.adapter.read(&self.prefixed_key, now).await?;
        Ok(match record {
            None => SemaphoreState::Expired,
            Some(record) => {
                if let Some(slot) = record.slots.iter().find(|slot| slot.slot_id == self.slot_id && slot.is_live(now)) {
                    SemaphoreState::AcquiredByMe {
                        remaining_time: slot.expiration.map(|exp| Duration::from_millis(exp.saturating_sub(now))),
                    }
                } else {
                    SemaphoreState::Full {
                        limit: record.limit,
                        live_count: record.live_slots(now).count() as u32,
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::memory::MemorySemaphoreAdapter;
    use super::*;

    fn provider() -> SemaphoreProvider {
        SemaphoreProvider::new(
            Arc::new(MemorySemaphoreAdapter::new()),
            SemaphoreProviderConfig::default(),
            Arc::new(SerdeRegistry::new()),
            "semaphore",
        )
    }

    #[tokio::test]
    async fn s3_bound_is_respected_under_contention() {
        let provider = provider();
        let a = provider.create("pool", "a", 2, None);
        let b = provider.create("pool", "b", 2, None);
        let c = provider.create("pool", "c", 2, None);

        assert!(a.acquire().await.unwrap());
        assert!(b.acquire().await.unwrap());
        assert!(!c.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn limit_is_fixed_by_first_acquire() {
        let provider = provider();
        let a = provider.create("pool", "a", 1, None);
        let b = provider.create("pool", "b", 99, None);

        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn limit_may_be_re_established_once_empty() {
        let provider = provider();
        let a = provider.create("pool", "a", 1, None);
        assert!(a.acquire().await.unwrap());
        assert!(a.release().await.unwrap());

        let b = provider.create("pool", "b", 5, None);
        let c = provider.create("pool", "c", 5, None);
        assert!(b.acquire().await.unwrap());
        assert!(c.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn idempotent_acquire_does_not_duplicate_slot() {
        let provider = provider();
        let a = provider.create("pool", "a", 1, Some(TimeSpan::from_millis(10_000)));
        assert!(a.acquire().await.unwrap());
        assert!(a.acquire().await.unwrap());

        let state = a.get_state().await.unwrap();
        assert!(matches!(state, SemaphoreState::AcquiredByMe { .. }));
    }

    #[tokio::test]
    async fn s4_expired_slot_is_purged_and_reclaimed() {
        let provider = provider();
        let a = provider.create("pool", "a", 1, Some(TimeSpan::from_millis(30)));
        let b = provider.create("pool", "b", 1, None);

        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_of_expired_slot_fails() {
        let provider = provider();
        let a = provider.create("pool", "a", 1, Some(TimeSpan::from_millis(20)));
        assert!(a.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!a.refresh(TimeSpan::from_millis(1_000)).await.unwrap());
    }

    #[tokio::test]
    async fn force_release_all_clears_every_slot() {
        let provider = provider();
        let a = provider.create("pool", "a", 2, None);
        let b = provider.create("pool", "b", 2, None);
        assert!(a.acquire().await.unwrap());
        assert!(b.acquire().await.unwrap());

        assert!(a.force_release_all().await.unwrap());

        let c = provider.create("pool", "c", 2, None);
        let d = provider.create("pool", "d", 2, None);
        assert!(c.acquire().await.unwrap());
        assert!(d.acquire().await.unwrap());
    }

    #[test]
    fn object_safety() {
        fn _assert(_: &Arc<dyn SemaphoreAdapter>) {}
    }

    #[test]
    fn s6_aggregate_ttl_is_max_of_live_slots_or_never() {
        let mut record = SemaphoreRecord {
            key: "pool".to_string(),
            limit: 3,
            slots: vec![
                SlotRecord { slot_id: "a".to_string(), expiration: Some(1_000) },
                SlotRecord { slot_id: "b".to_string(), expiration: Some(2_000) },
            ],
        };
        assert_eq!(record.aggregate_expiration(0), Some(2_000));

        record.slots.push(SlotRecord { slot_id: "c".to_string(), expiration: None });
        assert_eq!(record.aggregate_expiration(0), None);
    }
}
