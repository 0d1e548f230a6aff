//! Distributed lock: mutex with owner identity, TTL, refresh, blocking
//! acquire.
//!
//! Composition mirrors every other primitive:
//! `LockProvider` (config, namespace, event bus, serde registration) →
//! `LockHandle` (key/owner-bound) → `dyn LockAdapter` (native) or
//! [`DatabaseLockBridge`] wrapping a [`DatabaseLockAdapter`] → backend.
//!
//! Grounded on `storage/map_data_store.rs` (the teacher's CRUD-shaped
//! external-persistence trait) for the `DatabaseLockAdapter`/transaction
//! split, and on `other_examples/...acteon...redis-src-lock.rs` for the
//! native-adapter method surface and the Lua-script release pattern the
//! `redis` feature mirrors.

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

/// The storage-side shape of a lock record (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The prefixed key this record lives under.
    pub key: String,
    /// Opaque owner identifier.
    pub owner: String,
    /// Unix-millis expiration, or `None` if unexpiring.
    pub expiration: Option<u64>,
}

impl LockRecord {
    /// Whether this record is logically absent at `now` (§3 invariant a).
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        is_expired(self.expiration, now)
    }
}

/// Lock event taxonomy (spec §6, bit-exact names).
#[derive(Debug, Clone)]
pub enum LockEvent {
    /// `KEY_ACQUIRED`
    KeyAcquired { key: String },
    /// `KEY_ALREADY_ACQUIRED`
    KeyAlreadyAcquired { key: String },
    /// `KEY_RELEASED`
    KeyReleased { key: String },
    /// `KEY_FORCE_RELEASED`
    KeyForceReleased { key: String },
    /// `KEY_REFRESHED`
    KeyRefreshed { key: String },
    /// `UNOWNED_RELEASE`
    UnownedRelease { key: String },
    /// `UNOWNED_REFRESH`
    UnownedRefresh { key: String },
    /// `UNEXPECTED_ERROR`
    UnexpectedError { key: String, message: String },
}

impl NamedEvent for LockEvent {
    fn event_name(&self) -> &str {
        match self {
            Self::KeyAcquired { .. } => "KEY_ACQUIRED",
            Self::KeyAlreadyAcquired { .. } => "KEY_ALREADY_ACQUIRED",
            Self::KeyReleased { .. } => "KEY_RELEASED",
            Self::KeyForceReleased { .. } => "KEY_FORCE_RELEASED",
            Self::KeyRefreshed { .. } => "KEY_REFRESHED",
            Self::UnownedRelease { .. } => "UNOWNED_RELEASE",
            Self::UnownedRefresh { .. } => "UNOWNED_REFRESH",
            Self::UnexpectedError { .. } => "UNEXPECTED_ERROR",
        }
    }
}

/// The native, atomic lock adapter contract. Redis and in-memory backends
/// implement this directly; SQL-style backends implement
/// [`DatabaseLockAdapter`] and are lifted into this trait by
/// [`DatabaseLockBridge`].
#[async_trait]
pub trait LockAdapter: Send + Sync {
    /// Identifies this adapter's backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Attempt to take ownership of `key`. See §4.1 algorithm.
    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError>;

    /// Atomically remove `key` only if currently owned by `owner`.
    async fn release(&self, key: &str, owner: &str, now: u64) -> Result<bool, CoordError>;

    /// Unconditionally remove `key`.
    async fn force_release(&self, key: &str) -> Result<bool, CoordError>;

    /// Extend `key`'s expiration only if owned by `owner` and not expired.
    async fn refresh(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError>;

    /// Reads the current record for `key`, or `None` if absent/expired.
    async fn read(&self, key: &str, now: u64) -> Result<Option<LockRecord>, CoordError>;
}

fn _assert_lock_adapter_object_safe(_: &Arc<dyn LockAdapter>) {}

/// Raw CRUD operations a `DatabaseLockAdapter` transaction exposes, composed
/// by [`DatabaseLockBridge`] into the same atomic contract [`LockAdapter`]
/// promises.
#[async_trait]
pub trait LockTransaction: Send {
    /// Reads the row for `key`, if any (no expiration filtering — the
    /// bridge applies that).
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<LockRecord>>;

    /// Inserts or overwrites the row for `record.key`.
    async fn upsert(&mut self, record: &LockRecord) -> anyhow::Result<()>;

    /// Deletes the row for `key`, returning whether a row was removed.
    async fn remove(&mut self, key: &str) -> anyhow::Result<bool>;

    /// Updates only the `expiration` column for `key`, returning whether a
    /// row was updated.
    async fn update_expiration(&mut self, key: &str, expiration: Option<u64>) -> anyhow::Result<bool>;

    /// Commits the transaction. Dropping the box without calling this rolls
    /// back (mirrors `sqlx::Transaction`'s `Drop` behavior).
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// A transactional CRUD backend (SQL, Mongo, ...). Exposes only
/// `begin_transaction`; all atomicity comes from composing
/// [`LockTransaction`] calls inside one transaction, never from the adapter
/// itself performing read-then-write across two round trips.
#[async_trait]
pub trait DatabaseLockAdapter: Send + Sync {
    /// Identifies this backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Opens a new transaction. Serializable isolation is required (§4.1).
    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn LockTransaction + '_>>;
}

/// Lifts a [`DatabaseLockAdapter`] into the native [`LockAdapter`] contract
/// by composing `find`/`upsert`/`remove`/`update_expiration` inside one
/// transaction per call. This is the one bridge function every CRUD backend
/// goes through; the read-decide-write logic lives here exactly once.
pub struct DatabaseLockBridge<D> {
    db: Arc<D>,
}

impl<D> DatabaseLockBridge<D> {
    /// Wraps `db` as a native lock adapter.
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<D: DatabaseLockAdapter + 'static> LockAdapter for DatabaseLockBridge<D> {
    fn backend_kind(&self) -> &str {
        self.db.backend_kind()
    }

    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let existing = trx.find(key).await?;

        let should_write = match &existing {
            None => true,
            Some(record) if record.is_expired(now) => true,
            Some(record) if record.owner == owner => {
                // Idempotent acquire: leave the TTL untouched (invariant 3).
                trx.commit().await?;
                return Ok(true);
            }
            Some(_) => false,
        };

        if !should_write {
            return Ok(false);
        }

        trx.upsert(&LockRecord {
            key: key.to_string(),
            owner: owner.to_string(),
            expiration: ttl.expiration_from(now),
        })
        .await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str, now: u64) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let existing = trx.find(key).await?;
        let eligible = matches!(&existing, Some(record) if !record.is_expired(now) && record.owner == owner);
        if !eligible {
            return Ok(false);
        }
        trx.remove(key).await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn force_release(&self, key: &str) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let removed = trx.remove(key).await?;
        trx.commit().await?;
        Ok(removed)
    }

    async fn refresh(
        &self,
        key: &str,
        owner: &str,
        ttl: TimeSpan,
        now: u64,
    ) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let existing = trx.find(key).await?;
        let eligible = matches!(
            &existing,
            Some(record) if record.owner == owner && record.expiration.is_some_and(|exp| exp > now)
        );
        if !eligible {
            return Ok(false);
        }
        trx.update_expiration(key, ttl.expiration_from(now)).await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn read(&self, key: &str, now: u64) -> Result<Option<LockRecord>, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let existing = trx.find(key).await?;
        trx.commit().await?;
        Ok(existing.filter(|record| !record.is_expired(now)))
    }
}

/// Read-only view returned by [`LockHandle::get_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No live record for this key.
    Expired,
    /// Held by this handle's own owner id.
    AcquiredByMe {
        /// Remaining time-to-live, `None` if unexpiring.
        remaining_time: Option<Duration>,
    },
    /// Held by a different owner.
    UnavailableByOther {
        /// The current owner's opaque id.
        owner: String,
    },
}

/// Configuration for [`LockProvider`]. Defaults mirror common usage: a
/// 30 second TTL and an owner id generated per handle from a UUID.
#[derive(Debug, Clone)]
pub struct LockProviderConfig {
    /// The namespace root for every handle this provider creates.
    pub namespace: String,
    /// Default TTL applied when a caller does not supply one.
    pub default_ttl: TimeSpan,
}

impl Default for LockProviderConfig {
    fn default() -> Self {
        Self {
            namespace: "@lock".to_string(),
            default_ttl: TimeSpan::from_millis(30_000),
        }
    }
}

/// SerDe transformer registered by a [`LockProvider`] at construction time.
pub struct LockSerdeTransformer {
    name: String,
    backend_kind: String,
    namespace: String,
}

impl SerdeTransformer for LockSerdeTransformer {
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

/// Factory for [`LockHandle`]s. Owns the adapter, key prefixing, event bus,
/// and defaults; registers its SerDe transformer on construction.
pub struct LockProvider {
    adapter: Arc<dyn LockAdapter>,
    prefixer: KeyPrefixer,
    events: coordix_core::EventBus<LockEvent>,
    config: LockProviderConfig,
    serde_registry: Arc<SerdeRegistry>,
    transformer_name: String,
}

impl LockProvider {
    /// Builds a provider over `adapter`, registering a transformer named
    /// `transformer_name` into `serde_registry` scoped to this provider's
    /// `(backend_kind, namespace)`.
    pub fn new(
        adapter: Arc<dyn LockAdapter>,
        config: LockProviderConfig,
        serde_registry: Arc<SerdeRegistry>,
        transformer_name: impl Into<String>,
    ) -> Self {
        let transformer_name = transformer_name.into();
        let namespace = coordix_core::Namespace::new(config.namespace.clone());
        let prefixer = KeyPrefixer::new(namespace);

        serde_registry.register(Arc::new(LockSerdeTransformer {
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

    /// The provider's event bus, for subscribing before any handle acquires.
    #[must_use]
    pub fn events(&self) -> &coordix_core::EventBus<LockEvent> {
        &self.events
    }

    /// Creates a handle bound to `user_key` and `owner_id`, with `ttl`
    /// falling back to the provider's default.
    #[must_use]
    pub fn create(&self, user_key: &str, owner_id: impl Into<String>, ttl: Option<TimeSpan>) -> LockHandle {
        LockHandle {
            adapter: Arc::clone(&self.adapter),
            prefixed_key: self.prefixer.prefixed_key(user_key),
            resolved_key: self.prefixer.resolved_key(user_key),
            owner_id: owner_id.into(),
            ttl: ttl.unwrap_or(self.config.default_ttl),
            events: self.events.clone(),
            backend_kind: self.adapter.backend_kind().to_string(),
            namespace: self.config.namespace.clone(),
            transformer_name: self.transformer_name.clone(),
        }
    }

    /// Creates a handle with a fresh random owner id (`uuid` v4).
    #[must_use]
    pub fn create_with_generated_owner(&self, user_key: &str, ttl: Option<TimeSpan>) -> LockHandle {
        self.create(user_key, uuid::Uuid::new_v4().to_string(), ttl)
    }

    /// Serializes `handle`'s identity into a wire envelope.
    #[must_use]
    pub fn serialize_handle(&self, handle: &LockHandle) -> HandleEnvelope {
        HandleEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            backend_kind: handle.backend_kind.clone(),
            namespace: handle.namespace.clone(),
            serde_transformer_name: handle.transformer_name.clone(),
            key: handle.resolved_key.clone(),
            owner_or_slot_id: handle.owner_id.clone(),
            limit: None,
            ttl_ms: handle.ttl.as_millis(),
        }
    }

    /// Reconstructs a handle from `envelope`, declining (`None`) if this
    /// provider's transformer is not applicable to it.
    #[must_use]
    pub fn restore_handle(&self, envelope: &HandleEnvelope) -> Option<LockHandle> {
        self.serde_registry.resolve(envelope)?;
        if envelope.backend_kind != self.adapter.backend_kind()
            || envelope.namespace != self.config.namespace
            || envelope.serde_transformer_name != self.transformer_name
        {
            return None;
        }
        Some(LockHandle {
            adapter: Arc::clone(&self.adapter),
            prefixed_key: self.prefixer.prefixed_key(&envelope.key),
            resolved_key: envelope.key.clone(),
            owner_id: envelope.owner_or_slot_id.clone(),
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

/// Controls [`LockHandle::acquire_blocking`]'s polling cadence and deadline.
#[derive(Debug, Clone, Copy)]
pub struct BlockingOptions {
    /// Delay between acquire attempts.
    pub interval: Duration,
    /// Total time budget across all attempts.
    pub time: Duration,
}

/// A key/owner-bound lock handle. Safe to drop without releasing —
/// expiration reclaims the record.
pub struct LockHandle {
    adapter: Arc<dyn LockAdapter>,
    prefixed_key: String,
    resolved_key: String,
    owner_id: String,
    ttl: TimeSpan,
    events: coordix_core::EventBus<LockEvent>,
    backend_kind: String,
    namespace: String,
    transformer_name: String,
}

impl LockHandle {
    /// This handle's owner id.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// This handle's resolved (unprefixed) key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.resolved_key
    }

    fn dispatch(&self, event: LockEvent) {
        self.events.dispatch(event);
    }

    /// Attempt to take ownership. Dispatches `KEY_ACQUIRED` or
    /// `KEY_ALREADY_ACQUIRED`.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key, owner = %self.owner_id))]
    pub async fn acquire(&self) -> Result<bool, CoordError> {
        let now = now_millis();
        let result = self
            .adapter
            .acquire(&self.prefixed_key, &self.owner_id, self.ttl, now)
            .await;
        match &result {
            Ok(true) => self.dispatch(LockEvent::KeyAcquired {
                key: self.resolved_key.clone(),
            }),
            Ok(false) => self.dispatch(LockEvent::KeyAlreadyAcquired {
                key: self.resolved_key.clone(),
            }),
            Err(error) => self.dispatch(LockEvent::UnexpectedError {
                key: self.resolved_key.clone(),
                message: error.to_string(),
            }),
        }
        result
    }

    /// Retries [`LockHandle::acquire`] every `options.interval` until
    /// `options.time` elapses or it succeeds.
    pub async fn acquire_blocking(&self, options: BlockingOptions) -> Result<bool, CoordError> {
        let deadline = tokio::time::Instant::now() + options.time;
        loop {
            if self.acquire().await? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            tokio::time::sleep(options.interval.min(remaining)).await;
        }
    }

    /// Like [`LockHandle::acquire`] but fails with
    /// [`CoordError::AlreadyAcquired`] instead of returning `false`.
    pub async fn acquire_or_fail(&self) -> Result<(), CoordError> {
        if self.acquire().await? {
            Ok(())
        } else {
            Err(CoordError::AlreadyAcquired)
        }
    }

    /// Atomically delete only if currently owned by this handle's owner.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key, owner = %self.owner_id))]
    pub async fn release(&self) -> Result<bool, CoordError> {
        let now = now_millis();
        let result = self
            .adapter
            .release(&self.prefixed_key, &self.owner_id, now)
            .await;
        match &result {
            Ok(true) => self.dispatch(LockEvent::KeyReleased {
                key: self.resolved_key.clone(),
            }),
            Ok(false) => self.dispatch(LockEvent::UnownedRelease {
                key: self.resolved_key.clone(),
            }),
            Err(error) => self.dispatch(LockEvent::UnexpectedError {
                key: self.resolved_key.clone(),
                message: error.to_string(),
            }),
        }
        result
    }

    /// Unconditionally removes the record regardless of current owner.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key))]
    pub async fn force_release(&self) -> Result<bool, CoordError> {
        let result = self.adapter.force_release(&self.prefixed_key).await;
        if result.is_ok() {
            self.dispatch(LockEvent::KeyForceReleased {
                key: self.resolved_key.clone(),
            });
        }
        result
    }

    /// Extends expiration by `ttl` only if still owned and not expired.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key, owner = %self.owner_id))]
    pub async fn refresh(&self, ttl: TimeSpan) -> Result<bool, CoordError> {
        let now = now_millis();
        let result = self
            .adapter
            .refresh(&self.prefixed_key, &self.owner_id, ttl, now)
            .await;
        match &result {
            Ok(true) => self.dispatch(LockEvent::KeyRefreshed {
                key: self.resolved_key.clone(),
            }),
            Ok(false) => self.dispatch(LockEvent::UnownedRefresh {
                key: self.resolved_key.clone(),
            }),
            Err(error) => self.dispatch(LockEvent::UnexpectedError {
                key: self.resolved_key.clone(),
                message: error.to_string(),
            }),
        }
        result
    }

    /// Read-only state snapshot.
    pub async fn get_state(&self) -> Result<LockState, CoordError> {
        let now = now_millis();
        let record = self.adapter.read(&self.prefixed_key, now).await?;
        Ok(match record {
            None => LockState::Expired,
            Some(record) if record.owner == self.owner_id => LockState::AcquiredByMe {
                remaining_time: record.expiration.map(|exp| Duration::from_millis(exp.saturating_sub(now))),
            },
            Some(record) => LockState::UnavailableByOther { owner: record.owner },
        })
    }

    /// Acquire, run `f`, then release on every path (success, failure, or
    /// panic-unwind via `f`'s own error propagation). Returns `None` without
    /// invoking `f` if acquire failed.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<Option<T>, CoordError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
    {
        if !self.acquire().await? {
            return Ok(None);
        }
        let outcome = f().await;
        self.release().await?;
        Ok(Some(outcome?))
    }

    /// Like [`LockHandle::run`] but fails with
    /// [`CoordError::AlreadyAcquired`] instead of returning `None`.
    pub async fn run_or_fail<F, Fut, T>(&self, f: F) -> Result<T, CoordError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
    {
        self.run(f).await?.ok_or(CoordError::AlreadyAcquired)
    }

    /// Like [`LockHandle::run`] but blocks (per [`LockHandle::acquire_blocking`])
    /// before giving up.
    pub async fn run_blocking<F, Fut, T>(
        &self,
        options: BlockingOptions,
        f: F,
    ) -> Result<Option<T>, CoordError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
    {
        if !self.acquire_blocking(options).await? {
            return Ok(None);
        }
        let outcome = f().await;
        self.release().await?;
        Ok(Some(outcome?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::memory::MemoryLockAdapter;
    use super::*;

    fn provider() -> LockProvider {
        LockProvider::new(
            Arc::new(MemoryLockAdapter::new()),
            LockProviderConfig::default(),
            Arc::new(SerdeRegistry::new()),
            "lock",
        )
    }

    #[tokio::test]
    async fn s1_lock_contention_and_ttl_reclamation() {
        let provider = provider();
        let lock_a = provider.create("k", "A", Some(TimeSpan::from_millis(50)));
        let lock_b = provider.create("k", "B", Some(TimeSpan::from_millis(50)));

        assert!(lock_a.acquire().await.unwrap());
        assert!(!lock_b.acquire().await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock_b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn s2_refresh_gating() {
        let provider = provider();
        let lock_a = provider.create("k", "A", Some(TimeSpan::from_millis(100)));
        let lock_b = provider.create("k", "B", Some(TimeSpan::from_millis(100)));

        assert!(lock_a.acquire().await.unwrap());
        assert!(!lock_b.refresh(TimeSpan::from_millis(100)).await.unwrap());
        assert!(lock_a.refresh(TimeSpan::from_millis(100)).await.unwrap());
    }

    #[tokio::test]
    async fn idempotent_acquire_does_not_change_ttl() {
        let provider = provider();
        let lock = provider.create("k", "A", Some(TimeSpan::from_millis(10_000)));

        assert!(lock.acquire().await.unwrap());
        let first_state = lock.get_state().await.unwrap();
        assert!(lock.acquire().await.unwrap());
        let second_state = lock.get_state().await.unwrap();

        let (LockState::AcquiredByMe { remaining_time: a }, LockState::AcquiredByMe { remaining_time: b }) =
            (first_state, second_state)
        else {
            panic!("expected AcquiredByMe");
        };
        assert!(a.unwrap() >= b.unwrap());
        assert!(a.unwrap() - b.unwrap() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn release_is_owner_gated_and_idempotent_on_failure() {
        let provider = provider();
        let lock_a = provider.create("k", "A", None);
        let lock_b = provider.create("k", "B", None);

        assert!(lock_a.acquire().await.unwrap());
        assert!(!lock_b.release().await.unwrap());
        assert!(lock_a.release().await.unwrap());
        assert!(!lock_a.release().await.unwrap());
    }

    #[tokio::test]
    async fn force_release_always_removes() {
        let provider = provider();
        let lock_a = provider.create("k", "A", None);
        let lock_b = provider.create("k", "B", None);

        assert!(lock_a.acquire().await.unwrap());
        assert!(lock_b.force_release().await.unwrap());
        assert!(lock_b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_fails_on_unexpiring_lock() {
        let provider = provider();
        let lock = provider.create("k", "A", None);
        assert!(lock.acquire().await.unwrap());
        assert!(!lock.refresh(TimeSpan::from_millis(1_000)).await.unwrap());
    }

    #[tokio::test]
    async fn run_releases_on_success_and_on_error() {
        let provider = provider();
        let lock = provider.create("k", "A", None);

        let result = lock.run(|| async { Ok::<_, anyhow::Error>(5) }).await.unwrap();
        assert_eq!(result, Some(5));
        assert!(matches!(lock.get_state().await.unwrap(), LockState::Expired));

        assert!(lock.acquire().await.unwrap());
        let failing = lock.run(|| async { Err::<(), _>(anyhow::anyhow!("boom")) }).await;
        assert!(failing.is_err());
        assert!(matches!(lock.get_state().await.unwrap(), LockState::Expired));
    }

    #[tokio::test]
    async fn acquire_blocking_waits_for_release() {
        let provider = provider();
        let lock_a = provider.create("k", "A", Some(TimeSpan::from_millis(30)));
        let lock_b = provider.create("k", "B", None);

        assert!(lock_a.acquire().await.unwrap());
        let start = tokio::time::Instant::now();
        let acquired = lock_b
            .acquire_blocking(BlockingOptions {
                interval: Duration::from_millis(5),
                time: Duration::from_millis(200),
            })
            .await
            .unwrap();
        assert!(acquired);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn s6_serde_round_trip_and_backend_mismatch_declines() {
        let registry = Arc::new(SerdeRegistry::new());
        let provider_one = LockProvider::new(
            Arc::new(MemoryLockAdapter::new()),
            LockProviderConfig::default(),
            Arc::clone(&registry),
            "lock",
        );

        let handle = provider_one.create("order-42", "owner-a", None);
        assert!(handle.acquire().await.unwrap());

        let envelope = provider_one.serialize_handle(&handle);
        let restored = provider_one.restore_handle(&envelope).expect("same provider accepts");
        assert!(restored.release().await.unwrap());
    }

    #[test]
    fn object_safety() {
        fn _assert(_: &Arc<dyn LockAdapter>) {}
    }

    /// An in-process stand-in for [`DatabaseLockAdapter`] backed by a plain
    /// mutex-guarded table, used to exercise [`DatabaseLockBridge`]'s shared
    /// read-decide-write algorithm without a live Postgres/Redis connection.
    struct MockDbLockAdapter {
        rows: parking_lot::Mutex<std::collections::HashMap<String, LockRecord>>,
    }

    impl MockDbLockAdapter {
        fn new() -> Self {
            Self {
                rows: parking_lot::Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    struct MockDbLockTransaction<'a> {
        adapter: &'a MockDbLockAdapter,
    }

    #[async_trait]
    impl LockTransaction for MockDbLockTransaction<'_> {
        async fn find(&mut self, key: &str) -> anyhow::Result<Option<LockRecord>> {
            Ok(self.adapter.rows.lock().get(key).cloned())
        }

        async fn upsert(&mut self, record: &LockRecord) -> anyhow::Result<()> {
            self.adapter.rows.lock().insert(record.key.clone(), record.clone());
            Ok(())
        }

        async fn remove(&mut self, key: &str) -> anyhow::Result<bool> {
            Ok(self.adapter.rows.lock().remove(key).is_some())
        }

        async fn update_expiration(&mut self, key: &str, expiration: Option<u64>) -> anyhow::Result<bool> {
            let mut rows = self.adapter.rows.lock();
            match rows.get_mut(key) {
                Some(record) => {
                    record.expiration = expiration;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn commit(self: Box<Self>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DatabaseLockAdapter for MockDbLockAdapter {
        fn backend_kind(&self) -> &str {
            "mock-db"
        }

        async fn begin_transaction(&self) -> anyhow::Result<Box<dyn LockTransaction + '_>> {
            Ok(Box::new(MockDbLockTransaction { adapter: self }))
        }
    }

    #[tokio::test]
    async fn database_bridge_unexpiring_lock_requires_force_release() {
        let bridge = DatabaseLockBridge::new(Arc::new(MockDbLockAdapter::new()));

        assert!(bridge.acquire("k", "A", TimeSpan::unexpiring(), 0).await.unwrap());
        // No amount of elapsed time makes an unexpiring record look expired,
        // so a different owner can never "acquire past" it...
        assert!(!bridge.acquire("k", "B", TimeSpan::unexpiring(), 1_000_000).await.unwrap());
        // ...only an explicit force_release clears the way.
        assert!(bridge.force_release("k").await.unwrap());
        assert!(bridge.acquire("k", "B", TimeSpan::unexpiring(), 1_000_000).await.unwrap());
    }
}
