//! Runtime providers for every coordination primitive: distributed lock,
//! semaphore, circuit breaker, cache, and a JSON event bus, each over a
//! pluggable native adapter (in-memory, Redis, Postgres) or a
//! `DatabaseAdapter` bridge composing one out of raw transactional CRUD.
//!
//! `coordix-core` owns the cross-cutting pieces (namespacing, SerDe
//! registry, error taxonomy, the generic event bus, retry/backoff); this
//! crate owns the five domain state machines built on top of it.

pub mod cache;
pub mod circuit_breaker;
pub mod event_bus;
pub mod lock;
pub mod middleware;
pub mod semaphore;

#[cfg(feature = "test-util")]
pub mod testing;

pub use cache::{CacheAdapter, CacheEvent, CacheHandle, CacheProvider, CacheProviderConfig};
pub use circuit_breaker::{
    BreakerMetrics, BreakerPolicy, BreakerStateKind, CircuitBreakerAdapter, CircuitBreakerEvent,
    CircuitBreakerHandle, CircuitBreakerProvider, CircuitBreakerProviderConfig, CountBasedPolicy, TimeBasedPolicy,
};
pub use event_bus::{EventBusBackend, EventBusConfig, JsonEvent, JsonEventBus};
pub use lock::{LockAdapter, LockEvent, LockHandle, LockProvider, LockProviderConfig, LockState};
pub use semaphore::{
    SemaphoreAdapter, SemaphoreEvent, SemaphoreHandle, SemaphoreProvider, SemaphoreProviderConfig, SemaphoreState,
};

/// Top-level runtime configuration shared across providers that a binary
/// wiring this crate together would typically construct once.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root namespace every provider's own namespace nests under, e.g.
    /// `"myapp"` yields `myapp/@lock`, `myapp/@cache`, ...
    pub namespace_root: String,
    /// Default TTL applied when a caller doesn't specify one.
    pub default_ttl: std::time::Duration,
    /// Background sweeper interval for SQL-backed cache/lock tables.
    pub sweep_interval: std::time::Duration,
    /// Whether the background sweeper runs at all.
    pub sweep_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace_root: "coordix".to_string(),
            default_ttl: std::time::Duration::from_secs(30),
            sweep_interval: std::time::Duration::from_secs(60),
            sweep_enabled: true,
        }
    }
}
