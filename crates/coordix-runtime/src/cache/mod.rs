//! A TTL-aware key/value cache with group scoping and a numeric increment
//! op, built on the same native/database adapter split as [`crate::lock`].
//!
//! Values are stored as [`serde_json::Value`] so `increment` can enforce
//! "numeric only" without the crate committing to one concrete value type.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use coordix_core::time::now_millis;
use coordix_core::{
    CoordError, HandleEnvelope, KeyPrefixer, Namespace, NamedEvent, SerdeRegistry, SerdeTransformer, TimeSpan,
    ENVELOPE_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single stored entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub value: Value,
    /// Unix-millis expiration; `None` never expires.
    pub expiration: Option<u64>,
}

impl CacheRecord {
    fn is_live(&self, now: u64) -> bool {
        !coordix_core::time::is_expired(self.expiration, now)
    }
}

/// Cache event taxonomy (§6: `ADDED/UPDATED/REMOVED/EXPIRED/CLEARED`).
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Added { key: String },
    Updated { key: String },
    Removed { key: String },
    Expired { key: String },
    Cleared { group_prefix: String, count: u64 },
}

impl NamedEvent for CacheEvent {
    fn event_name(&self) -> &str {
        match self {
            Self::Added { .. } => "ADDED",
            Self::Updated { .. } => "UPDATED",
            Self::Removed { .. } => "REMOVED",
            Self::Expired { .. } => "EXPIRED",
            Self::Cleared { .. } => "CLEARED",
        }
    }
}

/// The native, atomic cache adapter contract.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Identifies this adapter's backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Registers a callback invoked with a key whenever this adapter
    /// actively expires an entry (a background timer or sweeper, as
    /// opposed to the lazy check every read already performs). Adapters
    /// without active expiry (e.g. a pure SQL client with no sweeper) may
    /// leave this a no-op.
    fn set_expiration_hook(&self, _hook: Arc<dyn Fn(String) + Send + Sync>) {}

    async fn get(&self, key: &str, now: u64) -> Result<Option<Value>, CoordError>;

    /// Inserts `value` only if `key` is absent or expired.
    async fn add(&self, key: &str, value: Value, ttl: TimeSpan, now: u64) -> Result<bool, CoordError>;

    /// Replaces `value` only if `key` is present and live, keeping its
    /// existing expiration.
    async fn update(&self, key: &str, value: Value, now: u64) -> Result<bool, CoordError>;

    /// Unconditionally inserts or replaces `key`, including its TTL.
    async fn put(&self, key: &str, value: Value, ttl: TimeSpan, now: u64) -> Result<(), CoordError>;

    /// Removes `key`; returns whether it was present and live.
    async fn remove(&self, key: &str, now: u64) -> Result<bool, CoordError>;

    /// Adds `delta` to the numeric value at `key`, creating it at `delta`
    /// (unexpiring) if absent. Fails with [`CoordError::TypeMismatch`] if
    /// the existing value is not a number.
    async fn increment(&self, key: &str, delta: i64, now: u64) -> Result<i64, CoordError>;

    /// Removes every live entry whose key starts with `group_prefix`,
    /// returning the count removed.
    async fn clear(&self, group_prefix: &str, now: u64) -> Result<u64, CoordError>;
}

fn _assert_cache_adapter_object_safe(_: &Arc<dyn CacheAdapter>) {}

/// Raw CRUD exposed by a `DatabaseCacheAdapter` transaction.
#[async_trait]
pub trait CacheTransaction: Send {
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<CacheRecord>>;
    async fn put(&mut self, key: &str, record: Option<&CacheRecord>) -> anyhow::Result<()>;
    async fn scan_prefix(&mut self, prefix: &str) -> anyhow::Result<Vec<String>>;
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// A transactional CRUD backend for cache entries.
#[async_trait]
pub trait DatabaseCacheAdapter: Send + Sync {
    fn backend_kind(&self) -> &str;
    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn CacheTransaction + '_>>;
}

/// Lifts a [`DatabaseCacheAdapter`] into the native [`CacheAdapter`]
/// contract.
pub struct DatabaseCacheBridge<D> {
    db: Arc<D>,
}

impl<D> DatabaseCacheBridge<D> {
    #[must_use]
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

pub(crate) fn numeric_value(value: &Value) -> Result<i64, CoordError> {
    value
        .as_i64()
        .ok_or_else(|| CoordError::type_mismatch(format!("value {value} is not an integer")))
}

#[async_trait]
impl<D: DatabaseCacheAdapter + 'static> CacheAdapter for DatabaseCacheBridge<D> {
    fn backend_kind(&self) -> &str {
        self.db.backend_kind()
    }

    async fn get(&self, key: &str, now: u64) -> Result<Option<Value>, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let record = trx.find(key).await?;
        trx.commit().await?;
        Ok(record.filter(|r| r.is_live(now)).map(|r| r.value))
    }

    async fn add(&self, key: &str, value: Value, ttl: TimeSpan, now: u64) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        if let Some(existing) = trx.find(key).await? {
            if existing.is_live(now) {
                trx.commit().await?;
                return Ok(false);
            }
        }
        let record = CacheRecord {
            key: key.to_string(),
            value,
            expiration: ttl.expiration_from(now),
        };
        trx.put(key, Some(&record)).await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn update(&self, key: &str, value: Value, now: u64) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let Some(mut existing) = trx.find(key).await? else {
            trx.commit().await?;
            return Ok(false);
        };
        if !existing.is_live(now) {
            trx.commit().await?;
            return Ok(false);
        }
        existing.value = value;
        trx.put(key, Some(&existing)).await?;
        trx.commit().await?;
        Ok(true)
    }

    async fn put(&self, key: &str, value: Value, ttl: TimeSpan, now: u64) -> Result<(), CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let record = CacheRecord {
            key: key.to_string(),
            value,
            expiration: ttl.expiration_from(now),
        };
        trx.put(key, Some(&record)).await?;
        trx.commit().await?;
        Ok(())
    }

    async fn remove(&self, key: &str, now: u64) -> Result<bool, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let existed = trx.find(key).await?.is_some_and(|r| r.is_live(now));
        trx.put(key, None).await?;
        trx.commit().await?;
        Ok(existed)
    }

    async fn increment(&self, key: &str, delta: i64, now: u64) -> Result<i64, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = match trx.find(key).await? {
            Some(existing) if existing.is_live(now) => existing,
            _ => CacheRecord {
                key: key.to_string(),
                value: Value::from(0),
                expiration: None,
            },
        };
        let updated = numeric_value(&record.value)?.saturating_add(delta);
        record.value = Value::from(updated);
        trx.put(key, Some(&record)).await?;
        trx.commit().await?;
        Ok(updated)
    }

    async fn clear(&self, group_prefix: &str, now: u64) -> Result<u64, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let keys = trx.scan_prefix(group_prefix).await?;
        let mut removed = 0u64;
        for key in keys {
            if let Some(record) = trx.find(&key).await? {
                if record.is_live(now) {
                    removed += 1;
                }
            }
            trx.put(&key, None).await?;
        }
        trx.commit().await?;
        Ok(removed)
    }
}

/// Configuration for [`CacheProvider`].
#[derive(Debug, Clone)]
pub struct CacheProviderConfig {
    pub namespace: String,
    pub default_ttl: Option<std::time::Duration>,
}

impl Default for CacheProviderConfig {
    fn default() -> Self {
        Self {
            namespace: "@cache".to_string(),
            default_ttl: None,
        }
    }
}

struct CacheSerdeTransformer {
    name: String,
    backend_kind: String,
    namespace: String,
}

impl SerdeTransformer for CacheSerdeTransformer {
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

/// Factory for [`CacheHandle`]s.
pub struct CacheProvider {
    adapter: Arc<dyn CacheAdapter>,
    root_namespace: Namespace,
    events: coordix_core::EventBus<CacheEvent>,
    config: CacheProviderConfig,
    serde_registry: Arc<SerdeRegistry>,
    transformer_name: String,
}

impl CacheProvider {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn CacheAdapter>,
        config: CacheProviderConfig,
        serde_registry: Arc<SerdeRegistry>,
        transformer_name: impl Into<String>,
    ) -> Self {
        let transformer_name = transformer_name.into();
        let root_namespace = Namespace::new(config.namespace.clone());

        serde_registry.register(Arc::new(CacheSerdeTransformer {
            name: transformer_name.clone(),
            backend_kind: adapter.backend_kind().to_string(),
            namespace: config.namespace.clone(),
        }));

        let events = coordix_core::EventBus::new();
        let hook_events = events.clone();
        adapter.set_expiration_hook(Arc::new(move |key: String| {
            hook_events.dispatch(CacheEvent::Expired { key });
        }));

        Self {
            adapter,
            root_namespace,
            events,
            config,
            serde_registry,
            transformer_name,
        }
    }

    #[must_use]
    pub fn events(&self) -> &coordix_core::EventBus<CacheEvent> {
        &self.events
    }

    /// Creates a handle rooted at the provider's namespace (no group).
    #[must_use]
    pub fn create(&self) -> CacheHandle {
        self.create_in_group(&self.root_namespace)
    }

    fn create_in_group(&self, namespace: &Namespace) -> CacheHandle {
        CacheHandle {
            adapter: Arc::clone(&self.adapter),
            prefixer: KeyPrefixer::new(namespace.clone()),
            events: self.events.clone(),
            default_ttl: self.config.default_ttl,
            backend_kind: self.adapter.backend_kind().to_string(),
            namespace: namespace.as_str().to_string(),
            root_namespace_str: self.config.namespace.clone(),
            transformer_name: self.transformer_name.clone(),
        }
    }

    #[must_use]
    pub fn serialize_handle(&self, handle: &CacheHandle) -> HandleEnvelope {
        HandleEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            backend_kind: handle.backend_kind.clone(),
            namespace: handle.namespace.clone(),
            serde_transformer_name: handle.transformer_name.clone(),
            key: String::new(),
            owner_or_slot_id: String::new(),
            limit: None,
            ttl_ms: None,
        }
    }

    #[must_use]
    pub fn restore_handle(&self, envelope: &HandleEnvelope) -> Option<CacheHandle> {
        self.serde_registry.resolve(envelope)?;
        if envelope.backend_kind != self.adapter.backend_kind() {
            return None;
        }
        Some(self.create_in_group(&Namespace::new(envelope.namespace.clone())))
    }
}

/// A group-scoped cache handle.
pub struct CacheHandle {
    adapter: Arc<dyn CacheAdapter>,
    prefixer: KeyPrefixer,
    events: coordix_core::EventBus<CacheEvent>,
    default_ttl: Option<std::time::Duration>,
    backend_kind: String,
    namespace: String,
    root_namespace_str: String,
    transformer_name: String,
}

impl CacheHandle {
    /// Returns a handle scoped to a child group namespace; its `clear()`
    /// only ever removes entries under that group's prefix.
    #[must_use]
    pub fn with_group(&self, name: &str) -> Self {
        let namespace = Namespace::new(&self.namespace).child(name);
        Self {
            adapter: Arc::clone(&self.adapter),
            prefixer: KeyPrefixer::new(namespace.clone()),
            events: self.events.clone(),
            default_ttl: self.default_ttl,
            backend_kind: self.backend_kind.clone(),
            namespace: namespace.as_str().to_string(),
            root_namespace_str: self.root_namespace_str.clone(),
            transformer_name: self.transformer_name.clone(),
        }
    }

    fn dispatch(&self, event: CacheEvent) {
        self.events.dispatch(event);
    }

    fn ttl_or_default(&self, ttl: Option<std::time::Duration>) -> TimeSpan {
        match ttl.or(self.default_ttl) {
            Some(duration) => TimeSpan::from_duration(duration),
            None => TimeSpan::unexpiring(),
        }
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CoordError> {
        self.adapter.get(&self.prefixer.prefixed_key(key), now_millis()).await
    }

    /// Inserts only if absent or expired.
    #[tracing::instrument(skip(self, value), fields(key = %key))]
    pub async fn add(&self, key: &str, value: Value, ttl: Option<std::time::Duration>) -> Result<bool, CoordError> {
        let now = now_millis();
        let inserted = self
            .adapter
            .add(&self.prefixer.prefixed_key(key), value, self.ttl_or_default(ttl), now)
            .await?;
        if inserted {
            self.dispatch(CacheEvent::Added {
                key: self.prefixer.resolved_key(key),
            });
        }
        Ok(inserted)
    }

    /// Replaces only if present and live; TTL is untouched.
    #[tracing::instrument(skip(self, value), fields(key = %key))]
    pub async fn update(&self, key: &str, value: Value) -> Result<bool, CoordError> {
        let now = now_millis();
        let updated = self.adapter.update(&self.prefixer.prefixed_key(key), value, now).await?;
        if updated {
            self.dispatch(CacheEvent::Updated {
                key: self.prefixer.resolved_key(key),
            });
        }
        Ok(updated)
    }

    /// Unconditionally inserts or replaces, including TTL.
    #[tracing::instrument(skip(self, value), fields(key = %key))]
    pub async fn put(&self, key: &str, value: Value, ttl: Option<std::time::Duration>) -> Result<(), CoordError> {
        let now = now_millis();
        self.adapter
            .put(&self.prefixer.prefixed_key(key), value, self.ttl_or_default(ttl), now)
            .await?;
        self.dispatch(CacheEvent::Added {
            key: self.prefixer.resolved_key(key),
        });
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn remove(&self, key: &str) -> Result<bool, CoordError> {
        let now = now_millis();
        let removed = self.adapter.remove(&self.prefixer.prefixed_key(key), now).await?;
        if removed {
            self.dispatch(CacheEvent::Removed {
                key: self.prefixer.resolved_key(key),
            });
        }
        Ok(removed)
    }

    /// Adds `delta` to a numeric entry, creating it at `delta` if absent.
    #[tracing::instrument(skip(self), fields(key = %key, delta = delta))]
    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64, CoordError> {
        let now = now_millis();
        let value = self.adapter.increment(&self.prefixer.prefixed_key(key), delta, now).await?;
        self.dispatch(CacheEvent::Updated {
            key: self.prefixer.resolved_key(key),
        });
        Ok(value)
    }

    /// Removes every live entry in this handle's group.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn clear(&self) -> Result<u64, CoordError> {
        let now = now_millis();
        let group_prefix = self.prefixer.prefixed_key("");
        let count = self.adapter.clear(&group_prefix, now).await?;
        self.dispatch(CacheEvent::Cleared {
            group_prefix: self.namespace.clone(),
            count,
        });
        Ok(count)
    }

    /// The root namespace this handle's provider was constructed with,
    /// ignoring any `with_group` nesting.
    #[must_use]
    pub fn root_namespace(&self) -> &str {
        &self.root_namespace_str
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::memory::MemoryCacheAdapter;
    use super::*;

    fn provider() -> CacheProvider {
        CacheProvider::new(
            Arc::new(MemoryCacheAdapter::new()),
            CacheProviderConfig::default(),
            Arc::new(SerdeRegistry::new()),
            "cache",
        )
    }

    #[tokio::test]
    async fn s8_add_only_succeeds_once_then_update_replaces() {
        let cache = provider().create();
        assert!(cache.add("a", Value::from(1), None).await.unwrap());
        assert!(!cache.add("a", Value::from(2), None).await.unwrap());
        assert!(cache.update("a", Value::from(3)).await.unwrap());
        assert_eq!(cache.get("a").await.unwrap(), Some(Value::from(3)));
    }

    #[tokio::test]
    async fn increment_creates_then_accumulates() {
        let cache = provider().create();
        assert_eq!(cache.increment("counter", 5).await.unwrap(), 5);
        assert_eq!(cache.increment("counter", -2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn increment_on_non_numeric_is_type_mismatch() {
        let cache = provider().create();
        cache.put("s", Value::from("hi"), None).await.unwrap();
        let err = cache.increment("s", 1).await.unwrap_err();
        assert!(matches!(err, CoordError::TypeMismatch(_)));
    }

    #[tokio::test]
    async fn ttl_expiry_makes_entry_unobservable() {
        let cache = provider().create();
        cache.put("k", Value::from(1), Some(Duration::from_millis(10))).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn groups_scope_clear_independently() {
        let provider = provider();
        let group_a = provider.create().with_group("a");
        let group_b = provider.create().with_group("b");
        group_a.put("k1", Value::from(1), None).await.unwrap();
        group_b.put("k2", Value::from(2), None).await.unwrap();

        let removed = group_a.clear().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(group_a.get("k1").await.unwrap(), None);
        assert_eq!(group_b.get("k2").await.unwrap(), Some(Value::from(2)));
    }

    #[test]
    fn object_safety() {
        fn _assert(_: &Arc<dyn CacheAdapter>) {}
    }
}
