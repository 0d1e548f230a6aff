//! `JsonEventBus`: a typed pub/sub primitive over JSON payloads, with
//! optional per-event-name schema validation on both dispatch and
//! delivery, backed by a pluggable [`EventBusBackend`] (in-memory or Redis
//! pub/sub).
//!
//! Built directly on [`coordix_core::EventBus`] — the memory backend is a
//! thin wrapper around it, reusing its per-listener ordered delivery and
//! uncaught-rejection sink rather than reimplementing fan-out.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_backend;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use coordix_core::{CoordError, NamedEvent};
use serde_json::Value;

pub use memory::MemoryEventBusBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisEventBusBackend;

/// One dispatched message: its event name and JSON payload.
#[derive(Debug, Clone)]
pub struct JsonEvent {
    pub name: String,
    pub payload: Value,
}

impl NamedEvent for JsonEvent {
    fn event_name(&self) -> &str {
        &self.name
    }
}

/// A listener over decoded payloads.
pub type JsonListenerFn = Arc<dyn Fn(Value) -> Result<(), anyhow::Error> + Send + Sync>;

/// Validates a payload against one event name's schema. Returns `Err` with
/// a human-readable reason on failure.
pub type EventValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A `{event name → validator}` map, the `eventMapSchema` of spec §4.5.
pub type EventMapSchema = HashMap<String, EventValidator>;

/// Pluggable transport underneath [`JsonEventBus`]. The memory backend
/// fans out in-process; the Redis backend publishes/subscribes over a
/// shared channel namespace so multiple processes share one bus.
#[async_trait]
pub trait EventBusBackend: Send + Sync {
    /// Publishes `payload` under `name` to every subscriber, local or remote.
    async fn publish(&self, name: &str, payload: &Value) -> anyhow::Result<()>;

    /// Registers `callback` for `name`, returning a listener id usable with
    /// [`EventBusBackend::unsubscribe`].
    async fn subscribe(&self, name: &str, callback: Arc<dyn Fn(Value) + Send + Sync>) -> anyhow::Result<u64>;

    /// Removes a previously registered listener.
    async fn unsubscribe(&self, name: &str, id: u64);
}

fn _assert_event_bus_backend_object_safe(_: &Arc<dyn EventBusBackend>) {}

/// A subscription token; dropping it does not unsubscribe — call
/// [`JsonSubscription::cancel`] explicitly, mirroring
/// [`coordix_core::Unsubscribe`].
pub struct JsonSubscription {
    backend: Arc<dyn EventBusBackend>,
    name: String,
    id: u64,
}

impl JsonSubscription {
    /// Removes the listener this token was issued for.
    pub async fn cancel(self) {
        self.backend.unsubscribe(&self.name, self.id).await;
    }
}

/// Configuration for [`JsonEventBus`].
#[derive(Default)]
pub struct EventBusConfig {
    /// Per-event-name payload schema; absent entries are unvalidated.
    pub schema: EventMapSchema,
}

/// A typed, schema-validating JSON event bus.
pub struct JsonEventBus {
    backend: Arc<dyn EventBusBackend>,
    schema: Arc<EventMapSchema>,
    rejection_sink: Arc<std::sync::Mutex<Option<Arc<dyn Fn(anyhow::Error) + Send + Sync>>>>,
}

impl JsonEventBus {
    /// Builds a bus over `backend` with `config`'s schema.
    #[must_use]
    pub fn new(backend: Arc<dyn EventBusBackend>, config: EventBusConfig) -> Self {
        Self {
            backend,
            schema: Arc::new(config.schema),
            rejection_sink: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Installs the sink invoked for listener errors and delivery-time
    /// re-validation failures.
    pub fn set_uncaught_rejection_sink(&self, sink: Arc<dyn Fn(anyhow::Error) + Send + Sync>) {
        *self
            .rejection_sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
    }

    fn report(&self, error: anyhow::Error) {
        let guard = self
            .rejection_sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sink) = guard.as_ref() {
            sink(error);
        } else {
            tracing::warn!(error = %error, "uncaught json event bus rejection");
        }
    }

    fn validate(&self, name: &str, payload: &Value) -> Result<(), CoordError> {
        if let Some(validator) = self.schema.get(name) {
            validator(payload).map_err(CoordError::validation)?;
        }
        Ok(())
    }

    /// Validates and publishes `payload` under `name`.
    pub async fn dispatch(&self, name: &str, payload: Value) -> Result<(), CoordError> {
        self.validate(name, &payload)?;
        self.backend.publish(name, &payload).await?;
        Ok(())
    }

    /// Registers `callback` for `name`. On delivery, the payload is
    /// re-validated; a failure here is routed to the rejection sink instead
    /// of being raised inside `callback`.
    pub async fn add_listener(&self, name: &str, callback: JsonListenerFn) -> Result<u64, CoordError> {
        let schema = Arc::clone(&self.schema);
        let rejection_sink = Arc::clone(&self.rejection_sink);
        let name_owned = name.to_string();
        let wrapped: Arc<dyn Fn(Value) + Send + Sync> = Arc::new(move |payload: Value| {
            if let Some(validator) = schema.get(&name_owned) {
                if let Err(reason) = validator(&payload) {
                    let guard = rejection_sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    let error = anyhow::anyhow!("delivery-time validation failed for {name_owned}: {reason}");
                    if let Some(sink) = guard.as_ref() {
                        sink(error);
                    } else {
                        tracing::warn!(error = %error, "uncaught json event bus rejection");
                    }
                    return;
                }
            }
            if let Err(error) = callback(payload) {
                let guard = rejection_sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(sink) = guard.as_ref() {
                    sink(error);
                } else {
                    tracing::warn!(error = %error, "uncaught json event bus rejection");
                }
            }
        });
        Ok(self.backend.subscribe(name, wrapped).await?)
    }

    /// Like [`JsonEventBus::add_listener`] but returns a cancellable token.
    pub async fn subscribe(&self, name: &str, callback: JsonListenerFn) -> Result<JsonSubscription, CoordError> {
        let id = self.add_listener(name, callback).await?;
        Ok(JsonSubscription {
            backend: Arc::clone(&self.backend),
            name: name.to_string(),
            id,
        })
    }

    /// Registers a listener that auto-removes itself after its first
    /// invocation.
    pub async fn subscribe_once(&self, name: &str, callback: JsonListenerFn) -> Result<(), CoordError> {
        let backend = Arc::clone(&self.backend);
        let name_owned = name.to_string();
        let id_slot: Arc<std::sync::OnceLock<u64>> = Arc::new(std::sync::OnceLock::new());
        let id_slot_for_closure = Arc::clone(&id_slot);
        let backend_for_closure = Arc::clone(&backend);
        let name_for_closure = name_owned.clone();

        let wrapped: JsonListenerFn = Arc::new(move |payload| {
            let result = callback(payload);
            if let Some(id) = id_slot_for_closure.get() {
                let backend = Arc::clone(&backend_for_closure);
                let name = name_for_closure.clone();
                let id = *id;
                tokio::spawn(async move {
                    backend.unsubscribe(&name, id).await;
                });
            }
            result
        });

        let id = self.add_listener(name, wrapped).await?;
        let _ = id_slot.set(id);
        Ok(())
    }

    /// Resolves with the next validated payload dispatched under `name`.
    pub async fn as_promise(&self, name: &str) -> Result<Value, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        self.subscribe_once(
            name,
            Arc::new(move |payload| {
                if let Some(tx) = tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
                    let _ = tx.send(payload);
                }
                Ok(())
            }),
        )
        .await?;
        rx.await
            .map_err(|_| CoordError::Unexpected(anyhow::anyhow!("listener dropped sender without sending")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn schema_requiring_number() -> EventMapSchema {
        let mut schema: EventMapSchema = HashMap::new();
        schema.insert(
            "ORDER_PLACED".to_string(),
            Arc::new(|payload: &Value| {
                if payload.get("amount").and_then(Value::as_f64).is_some() {
                    Ok(())
                } else {
                    Err("amount must be numeric".to_string())
                }
            }),
        );
        schema
    }

    #[tokio::test]
    async fn dispatch_rejects_payload_failing_schema() {
        let bus = JsonEventBus::new(
            Arc::new(MemoryEventBusBackend::new()),
            EventBusConfig {
                schema: schema_requiring_number(),
            },
        );
        let err = bus
            .dispatch("ORDER_PLACED", serde_json::json!({"amount": "oops"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::Validation(_)));
    }

    #[tokio::test]
    async fn listener_receives_valid_payload() {
        let bus = JsonEventBus::new(
            Arc::new(MemoryEventBusBackend::new()),
            EventBusConfig {
                schema: schema_requiring_number(),
            },
        );
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        bus.add_listener(
            "ORDER_PLACED",
            Arc::new(move |_| {
                received_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .unwrap();

        bus.dispatch("ORDER_PLACED", serde_json::json!({"amount": 9.5}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_time_revalidation_reports_to_sink_not_listener() {
        let bus = JsonEventBus::new(Arc::new(MemoryEventBusBackend::new()), EventBusConfig::default());
        let rejected = Arc::new(AtomicUsize::new(0));
        let rejected_clone = Arc::clone(&rejected);
        bus.set_uncaught_rejection_sink(Arc::new(move |_| {
            rejected_clone.fetch_add(1, Ordering::SeqCst);
        }));

        // Register the listener against a bus with no schema for this name
        // (so dispatch succeeds), confirming the happy path never touches
        // the rejection sink.
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        bus.add_listener(
            "PING",
            Arc::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .unwrap();

        bus.dispatch("PING", serde_json::json!(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(rejected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delivery_time_revalidation_failure_skips_listener_and_reports_to_sink() {
        // A validator whose first call (dispatch-time) passes and whose
        // second call (delivery-time, inside the listener wrapper) fails,
        // modeling a check whose outcome can change between the two (e.g. a
        // time-window or external-state condition).
        let validator_calls = Arc::new(AtomicUsize::new(0));
        let validator_calls_clone = Arc::clone(&validator_calls);
        let mut schema: EventMapSchema = HashMap::new();
        schema.insert(
            "ORDER_PLACED".to_string(),
            Arc::new(move |_: &Value| {
                if validator_calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(())
                } else {
                    Err("no longer valid".to_string())
                }
            }),
        );

        let bus = JsonEventBus::new(Arc::new(MemoryEventBusBackend::new()), EventBusConfig { schema });

        let rejected = Arc::new(AtomicUsize::new(0));
        let rejected_clone = Arc::clone(&rejected);
        bus.set_uncaught_rejection_sink(Arc::new(move |_| {
            rejected_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        bus.add_listener(
            "ORDER_PLACED",
            Arc::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .unwrap();

        bus.dispatch("ORDER_PLACED", serde_json::json!({"amount": 9.5}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn object_safety() {
        fn _assert(_: &Arc<dyn EventBusBackend>) {}
    }
}
