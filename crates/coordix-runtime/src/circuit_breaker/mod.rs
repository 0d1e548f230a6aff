//! Circuit breaker: CLOSED → OPEN → HALF_OPEN state machine driven by a
//! pluggable [`BreakerPolicy`] (count-based or time-sliding).
//!
//! Unlike lock/semaphore, transitions are evaluated by *generic* code
//! ([`decide_transition`]) shared by every adapter — adapters only supply
//! atomic read-decide-write plumbing around one opaque
//! `{state, metrics, last_transition_at}` record, never reimplementing the
//! state machine themselves. Grounded on `network/shutdown.rs`'s
//! `ArcSwap`-guarded phase transitions for the in-memory adapter's atomic
//! compare-and-set shape, generalized to a per-key table.

pub mod policy;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod sql;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordix_core::time::now_millis;
use coordix_core::{CoordError, HandleEnvelope, KeyPrefixer, NamedEvent, SerdeRegistry, SerdeTransformer, ENVELOPE_VERSION};
use serde::{Deserialize, Serialize};

pub use policy::{BreakerMetrics, BreakerPolicy, CountBasedPolicy, Sample, TimeBasedPolicy};

/// The three states a breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerStateKind {
    /// Calls are allowed through; failures are tracked.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A trial state allowing calls through to probe recovery.
    HalfOpen,
}

/// What a policy decision recommends for a transition-eligible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Stay put.
    None,
    /// Promote to OPEN.
    ToOpen,
    /// Demote to CLOSED (only reachable from HALF_OPEN).
    ToClosed,
}

/// The opaque, backend-persisted breaker record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    /// Current state.
    pub state: BreakerStateKind,
    /// Policy-owned metrics (sample history).
    pub metrics: BreakerMetrics,
    /// Unix-millis of the last state transition.
    pub last_transition_at: u64,
}

impl BreakerRecord {
    fn initial(policy: &dyn BreakerPolicy, now: u64) -> Self {
        Self {
            state: BreakerStateKind::Closed,
            metrics: policy.initial_metrics(),
            last_transition_at: now,
        }
    }
}

/// The `{from, to}` pair `update_state` returns. A `STATE_TRANSITIONED`
/// event is dispatched by the handle iff `from != to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: BreakerStateKind,
    pub to: BreakerStateKind,
}

/// Applies the §4.3 state machine to `record` in place, returning the
/// resulting transition. This is the one place the CLOSED/OPEN/HALF_OPEN
/// logic is written; every adapter calls it inside its own atomic
/// read-decide-write.
pub fn decide_transition(
    record: &mut BreakerRecord,
    policy: &dyn BreakerPolicy,
    cooldown: Duration,
    now: u64,
) -> StateTransition {
    let from = record.state;
    let to = match record.state {
        BreakerStateKind::Closed => match policy.when_closed(&record.metrics, now) {
            PolicyDecision::ToOpen => BreakerStateKind::Open,
            _ => BreakerStateKind::Closed,
        },
        BreakerStateKind::Open => {
            let elapsed = now.saturating_sub(record.last_transition_at);
            if elapsed >= u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX) {
                BreakerStateKind::HalfOpen
            } else {
                BreakerStateKind::Open
            }
        }
        BreakerStateKind::HalfOpen => match policy.when_half_opened(&record.metrics, now) {
            PolicyDecision::ToOpen => BreakerStateKind::Open,
            PolicyDecision::ToClosed => BreakerStateKind::Closed,
            PolicyDecision::None => BreakerStateKind::HalfOpen,
        },
    };

    if to != from {
        record.state = to;
        record.last_transition_at = now;
    }

    StateTransition { from, to }
}

/// Circuit breaker event taxonomy (spec §6, bit-exact names).
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// `STATE_TRANSITIONED`
    StateTransitioned {
        key: String,
        from: BreakerStateKind,
        to: BreakerStateKind,
    },
    /// `TRACKED_SUCCESS`
    TrackedSuccess { key: String },
    /// `TRACKED_FAILURE`
    TrackedFailure { key: String },
    /// `UNTRACKED_FAILURE`
    UntrackedFailure { key: String },
    /// `TRACKED_SLOW_CALL`
    TrackedSlowCall { key: String },
    /// `RESETED`
    Reseted { key: String },
    /// `ISOLATED`
    Isolated { key: String },
}

impl NamedEvent for CircuitBreakerEvent {
    fn event_name(&self) -> &str {
        match self {
            Self::StateTransitioned { .. } => "STATE_TRANSITIONED",
            Self::TrackedSuccess { .. } => "TRACKED_SUCCESS",
            Self::TrackedFailure { .. } => "TRACKED_FAILURE",
            Self::UntrackedFailure { .. } => "UNTRACKED_FAILURE",
            Self::TrackedSlowCall { .. } => "TRACKED_SLOW_CALL",
            Self::Reseted { .. } => "RESETED",
            Self::Isolated { .. } => "ISOLATED",
        }
    }
}

/// The native, atomic circuit-breaker adapter contract.
#[async_trait]
pub trait CircuitBreakerAdapter: Send + Sync {
    /// Identifies this adapter's backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Applies [`decide_transition`] to `key`'s record, creating one via
    /// `policy.initial_metrics()` if absent.
    async fn update_state(
        &self,
        key: &str,
        policy: &dyn BreakerPolicy,
        cooldown: Duration,
        now: u64,
    ) -> Result<StateTransition, CoordError>;

    /// Applies `policy.track_success` to `key`'s metrics.
    async fn track_success(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError>;

    /// Applies `policy.track_failure` to `key`'s metrics.
    async fn track_failure(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError>;

    /// Forces `key` to CLOSED with fresh metrics.
    async fn reset(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError>;

    /// Forces `key` to OPEN.
    async fn isolate(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError>;

    /// Reads the current record, if any.
    async fn read(&self, key: &str) -> Result<Option<BreakerRecord>, CoordError>;
}

fn _assert_circuit_breaker_adapter_object_safe(_: &Arc<dyn CircuitBreakerAdapter>) {}

/// Raw CRUD exposed by a `DatabaseCircuitBreakerAdapter` transaction. The
/// record is stored as one opaque serialized string column (per spec §6's
/// `circuitBreaker(key, state)` schema), so the bridge deserializes, applies
/// [`decide_transition`] (or a tracking update), and reserializes inside a
/// single transaction.
#[async_trait]
pub trait CircuitBreakerTransaction: Send {
    /// Reads the serialized record for `key`, if any.
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<String>>;

    /// Overwrites the serialized record for `key`.
    async fn put(&mut self, key: &str, serialized: &str) -> anyhow::Result<()>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// A transactional CRUD backend for circuit breaker state.
#[async_trait]
pub trait DatabaseCircuitBreakerAdapter: Send + Sync {
    /// Identifies this backend in serialized handle envelopes.
    fn backend_kind(&self) -> &str;

    /// Opens a new transaction. Serializable isolation is required.
    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn CircuitBreakerTransaction + '_>>;
}

/// Lifts a [`DatabaseCircuitBreakerAdapter`] into the native
/// [`CircuitBreakerAdapter`] contract.
pub struct DatabaseCircuitBreakerBridge<D> {
    db: Arc<D>,
}

impl<D> DatabaseCircuitBreakerBridge<D> {
    /// Wraps `db` as a native circuit breaker adapter.
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

fn deserialize_or_initial(
    serialized: Option<String>,
    policy: &dyn BreakerPolicy,
    now: u64,
) -> anyhow::Result<BreakerRecord> {
    match serialized {
        Some(blob) => Ok(serde_json::from_str(&blob)?),
        None => Ok(BreakerRecord::initial(policy, now)),
    }
}

#[async_trait]
impl<D: DatabaseCircuitBreakerAdapter + 'static> CircuitBreakerAdapter for DatabaseCircuitBreakerBridge<D> {
    fn backend_kind(&self) -> &str {
        self.db.backend_kind()
    }

    async fn update_state(
        &self,
        key: &str,
        policy: &dyn BreakerPolicy,
        cooldown: Duration,
        now: u64,
    ) -> Result<StateTransition, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = deserialize_or_initial(trx.find(key).await?, policy, now)?;
        let transition = decide_transition(&mut record, policy, cooldown, now);
        trx.put(key, &serde_json::to_string(&record)?).await?;
        trx.commit().await?;
        Ok(transition)
    }

    async fn track_success(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = deserialize_or_initial(trx.find(key).await?, policy, now)?;
        record.metrics = policy.track_success(&record.metrics, now);
        trx.put(key, &serde_json::to_string(&record)?).await?;
        trx.commit().await?;
        Ok(())
    }

    async fn track_failure(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = deserialize_or_initial(trx.find(key).await?, policy, now)?;
        record.metrics = policy.track_failure(&record.metrics, now);
        trx.put(key, &serde_json::to_string(&record)?).await?;
        trx.commit().await?;
        Ok(())
    }

    async fn reset(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let record = BreakerRecord::initial(policy, now);
        trx.put(key, &serde_json::to_string(&record)?).await?;
        trx.commit().await?;
        Ok(())
    }

    async fn isolate(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let mut record = deserialize_or_initial(trx.find(key).await?, policy, now)?;
        record.state = BreakerStateKind::Open;
        record.last_transition_at = now;
        trx.put(key, &serde_json::to_string(&record)?).await?;
        trx.commit().await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<BreakerRecord>, CoordError> {
        let mut trx = self.db.begin_transaction().await?;
        let record = trx.find(key).await?;
        trx.commit().await?;
        Ok(record.map(|blob| serde_json::from_str(&blob)).transpose()?)
    }
}

/// Classifies a call outcome's trigger for slow-call tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowCallTrigger {
    /// Slow calls are never tracked.
    Disabled,
    /// Only slow calls (regardless of success/failure) are tracked as failures.
    OnlySlowCall,
    /// Both the ordinary success/failure classification and slow-call
    /// tracking apply; a slow call may be reported as both.
    Both,
}

/// Configuration for [`CircuitBreakerProvider`].
pub struct CircuitBreakerProviderConfig {
    /// Namespace root for every handle this provider creates.
    pub namespace: String,
    /// Cool-down before an OPEN breaker auto-promotes to HALF_OPEN.
    pub cooldown: Duration,
    /// Duration after which a call is classified as slow.
    pub slow_call_time: Option<Duration>,
    /// How slow calls factor into tracking.
    pub slow_call_trigger: SlowCallTrigger,
    /// Whether `track_success`/`track_failure` run fire-and-forget.
    ///
    /// Defaults to `false` (synchronous tracking) — see the design note
    /// resolving the async-tracking Open Question.
    pub enable_async_tracking: bool,
    /// Decides which errors from the guarded function count as tracked
    /// failures; errors this returns `false` for propagate untracked.
    pub error_policy: Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>,
}

impl Clone for CircuitBreakerProviderConfig {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            cooldown: self.cooldown,
            slow_call_time: self.slow_call_time,
            slow_call_trigger: self.slow_call_trigger,
            enable_async_tracking: self.enable_async_tracking,
            error_policy: Arc::clone(&self.error_policy),
        }
    }
}

impl Default for CircuitBreakerProviderConfig {
    fn default() -> Self {
        Self {
            namespace: "@circuit-breaker".to_string(),
            cooldown: Duration::from_secs(30),
            slow_call_time: None,
            slow_call_trigger: SlowCallTrigger::Disabled,
            enable_async_tracking: false,
            error_policy: Arc::new(|_| true),
        }
    }
}

struct CircuitBreakerSerdeTransformer {
    name: String,
    backend_kind: String,
    namespace: String,
}

impl SerdeTransformer for CircuitBreakerSerdeTransformer {
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

/// Factory for [`CircuitBreakerHandle`]s.
pub struct CircuitBreakerProvider {
    adapter: Arc<dyn CircuitBreakerAdapter>,
    policy: Arc<dyn BreakerPolicy>,
    prefixer: KeyPrefixer,
    events: coordix_core::EventBus<CircuitBreakerEvent>,
    config: CircuitBreakerProviderConfig,
    serde_registry: Arc<SerdeRegistry>,
    transformer_name: String,
}

impl CircuitBreakerProvider {
    /// Builds a provider over `adapter` and `policy`, registering its SerDe
    /// transformer.
    pub fn new(
        adapter: Arc<dyn CircuitBreakerAdapter>,
        policy: Arc<dyn BreakerPolicy>,
        config: CircuitBreakerProviderConfig,
        serde_registry: Arc<SerdeRegistry>,
        transformer_name: impl Into<String>,
    ) -> Self {
        let transformer_name = transformer_name.into();
        let namespace = coordix_core::Namespace::new(config.namespace.clone());
        let prefixer = KeyPrefixer::new(namespace);

        serde_registry.register(Arc::new(CircuitBreakerSerdeTransformer {
            name: transformer_name.clone(),
            backend_kind: adapter.backend_kind().to_string(),
            namespace: config.namespace.clone(),
        }));

        Self {
            adapter,
            policy,
            prefixer,
            events: coordix_core::EventBus::new(),
            config,
            serde_registry,
            transformer_name,
        }
    }

    /// The provider's event bus.
    #[must_use]
    pub fn events(&self) -> &coordix_core::EventBus<CircuitBreakerEvent> {
        &self.events
    }

    /// Creates a handle bound to `user_key`.
    #[must_use]
    pub fn create(&self, user_key: &str) -> CircuitBreakerHandle {
        CircuitBreakerHandle {
            adapter: Arc::clone(&self.adapter),
            policy: Arc::clone(&self.policy),
            prefixed_key: self.prefixer.prefixed_key(user_key),
            resolved_key: self.prefixer.resolved_key(user_key),
            events: self.events.clone(),
            config: self.config.clone(),
            backend_kind: self.adapter.backend_kind().to_string(),
            namespace: self.config.namespace.clone(),
            transformer_name: self.transformer_name.clone(),
        }
    }

    /// Serializes `handle`'s identity into a wire envelope.
    #[must_use]
    pub fn serialize_handle(&self, handle: &CircuitBreakerHandle) -> HandleEnvelope {
        HandleEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            backend_kind: handle.backend_kind.clone(),
            namespace: handle.namespace.clone(),
            serde_transformer_name: handle.transformer_name.clone(),
            key: handle.resolved_key.clone(),
            owner_or_slot_id: String::new(),
            limit: None,
            ttl_ms: None,
        }
    }

    /// Reconstructs a handle from `envelope`, or `None` if not applicable.
    #[must_use]
    pub fn restore_handle(&self, envelope: &HandleEnvelope) -> Option<CircuitBreakerHandle> {
        self.serde_registry.resolve(envelope)?;
        if envelope.backend_kind != self.adapter.backend_kind() || envelope.namespace != self.config.namespace {
            return None;
        }
        Some(self.create(&envelope.key))
    }
}

/// A key-bound circuit breaker handle.
pub struct CircuitBreakerHandle {
    adapter: Arc<dyn CircuitBreakerAdapter>,
    policy: Arc<dyn BreakerPolicy>,
    prefixed_key: String,
    resolved_key: String,
    events: coordix_core::EventBus<CircuitBreakerEvent>,
    config: CircuitBreakerProviderConfig,
    backend_kind: String,
    namespace: String,
    transformer_name: String,
}

impl CircuitBreakerHandle {
    /// This handle's resolved (unprefixed) key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.resolved_key
    }

    fn dispatch(&self, event: CircuitBreakerEvent) {
        self.events.dispatch(event);
    }

    #[tracing::instrument(skip(self), fields(key = %self.resolved_key))]
    async fn enter(&self) -> Result<bool, CoordError> {
        let now = now_millis();
        let transition = self
            .adapter
            .update_state(&self.prefixed_key, self.policy.as_ref(), self.config.cooldown, now)
            .await?;
        if transition.from != transition.to {
            self.dispatch(CircuitBreakerEvent::StateTransitioned {
                key: self.resolved_key.clone(),
                from: transition.from,
                to: transition.to,
            });
        }
        Ok(transition.to == BreakerStateKind::Open)
    }

    async fn track(&self, failure: bool) {
        let adapter = Arc::clone(&self.adapter);
        let policy = Arc::clone(&self.policy);
        let prefixed_key = self.prefixed_key.clone();
        let now = now_millis();
        let call = async move {
            let result = if failure {
                adapter.track_failure(&prefixed_key, policy.as_ref(), now).await
            } else {
                adapter.track_success(&prefixed_key, policy.as_ref(), now).await
            };
            if let Err(error) = result {
                tracing::warn!(error = %error, "circuit breaker tracking failed");
            }
        };
        if self.config.enable_async_tracking {
            tokio::spawn(call);
        } else {
            // Caller (`run_or_fail`) is already inside an async context; just
            // await the write inline instead of spawning one.
            call.await;
        }
    }

    /// Runs `f` through the breaker: fails with [`CoordError::CircuitOpen`]
    /// without invoking `f` if the breaker is OPEN, otherwise invokes `f`,
    /// classifies the outcome, and tracks it.
    #[tracing::instrument(skip(self, f), fields(key = %self.resolved_key))]
    pub async fn run_or_fail<F, Fut, T>(&self, f: F) -> Result<T, anyhow::Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
    {
        if self.enter().await? {
            return Err(CoordError::CircuitOpen.into());
        }

        let started = tokio::time::Instant::now();
        let outcome = f().await;
        let elapsed = started.elapsed();

        let is_slow = self.config.slow_call_time.is_some_and(|threshold| elapsed >= threshold);
        let slow_tracks_failure = is_slow
            && matches!(
                self.config.slow_call_trigger,
                SlowCallTrigger::OnlySlowCall | SlowCallTrigger::Both
            );

        match &outcome {
            Ok(_) => {
                if slow_tracks_failure {
                    self.track(true).await;
                    self.dispatch(CircuitBreakerEvent::TrackedSlowCall {
                        key: self.resolved_key.clone(),
                    });
                } else {
                    self.track(false).await;
                    self.dispatch(CircuitBreakerEvent::TrackedSuccess {
                        key: self.resolved_key.clone(),
                    });
                }
            }
            Err(error) => {
                let matched = (self.config.error_policy)(error);
                if matched {
                    self.track(true).await;
                    self.dispatch(CircuitBreakerEvent::TrackedFailure {
                        key: self.resolved_key.clone(),
                    });
                } else {
                    self.dispatch(CircuitBreakerEvent::UntrackedFailure {
                        key: self.resolved_key.clone(),
                    });
                }
                if slow_tracks_failure {
                    if !matched {
                        self.track(true).await;
                    }
                    self.dispatch(CircuitBreakerEvent::TrackedSlowCall {
                        key: self.resolved_key.clone(),
                    });
                }
            }
        }

        outcome
    }

    /// Forces CLOSED with fresh metrics.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key))]
    pub async fn reset(&self) -> Result<(), CoordError> {
        let now = now_millis();
        self.adapter.reset(&self.prefixed_key, self.policy.as_ref(), now).await?;
        self.dispatch(CircuitBreakerEvent::Reseted {
            key: self.resolved_key.clone(),
        });
        Ok(())
    }

    /// Forces OPEN.
    #[tracing::instrument(skip(self), fields(key = %self.resolved_key))]
    pub async fn isolate(&self) -> Result<(), CoordError> {
        let now = now_millis();
        self.adapter.isolate(&self.prefixed_key, self.policy.as_ref(), now).await?;
        self.dispatch(CircuitBreakerEvent::Isolated {
            key: self.resolved_key.clone(),
        });
        Ok(())
    }

    /// Read-only state snapshot (does not evaluate transitions).
    pub async fn get_state(&self) -> Result<Option<BreakerStateKind>, CoordError> {
        Ok(self.adapter.read(&self.prefixed_key).await?.map(|record| record.state))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::memory::MemoryCircuitBreakerAdapter;
    use super::*;

    fn provider(cooldown: Duration) -> CircuitBreakerProvider {
        CircuitBreakerProvider::new(
            Arc::new(MemoryCircuitBreakerAdapter::new()),
            Arc::new(CountBasedPolicy::new(4, 0.5, 2)),
            CircuitBreakerProviderConfig {
                cooldown,
                ..CircuitBreakerProviderConfig::default()
            },
            Arc::new(SerdeRegistry::new()),
            "breaker",
        )
    }

    #[tokio::test]
    async fn s7_opens_after_failure_threshold_and_recovers_through_half_open() {
        let provider = provider(Duration::from_millis(30));
        let breaker = provider.create("svc");

        for _ in 0..3 {
            let _ = breaker.run_or_fail(|| async { Err::<(), _>(anyhow::anyhow!("boom")) }).await;
        }

        assert_eq!(breaker.get_state().await.unwrap(), Some(BreakerStateKind::Open));

        let opened = breaker.run_or_fail(|| async { Ok::<_, anyhow::Error>(()) }).await;
        assert!(matches!(
            opened.unwrap_err().downcast::<CoordError>().unwrap(),
            CoordError::CircuitOpen
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = breaker.run_or_fail(|| async { Ok::<_, anyhow::Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn untracked_failures_do_not_move_metrics() {
        let provider = CircuitBreakerProvider::new(
            Arc::new(MemoryCircuitBreakerAdapter::new()),
            Arc::new(CountBasedPolicy::new(4, 0.5, 1)),
            CircuitBreakerProviderConfig {
                error_policy: Arc::new(|_| false),
                ..CircuitBreakerProviderConfig::default()
            },
            Arc::new(SerdeRegistry::new()),
            "breaker",
        );
        let breaker = provider.create("svc");

        for _ in 0..10 {
            let _ = breaker.run_or_fail(|| async { Err::<(), _>(anyhow::anyhow!("ignored")) }).await;
        }

        assert_eq!(breaker.get_state().await.unwrap(), Some(BreakerStateKind::Closed));
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let provider = provider(Duration::from_secs(3600));
        let breaker = provider.create("svc");
        breaker.isolate().await.unwrap();
        assert_eq!(breaker.get_state().await.unwrap(), Some(BreakerStateKind::Open));
        breaker.reset().await.unwrap();
        assert_eq!(breaker.get_state().await.unwrap(), Some(BreakerStateKind::Closed));
    }

    #[test]
    fn object_safety() {
        fn _assert(_: &Arc<dyn CircuitBreakerAdapter>) {}
    }
}
