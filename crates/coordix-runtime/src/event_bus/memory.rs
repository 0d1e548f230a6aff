//! In-process [`EventBusBackend`] built directly on [`coordix_core::EventBus`].

use std::sync::Arc;

use async_trait::async_trait;
use coordix_core::EventBus;
use serde_json::Value;

use super::{EventBusBackend, JsonEvent};

/// Wraps a [`coordix_core::EventBus<JsonEvent>`] as a [`EventBusBackend`].
pub struct MemoryEventBusBackend {
    bus: EventBus<JsonEvent>,
}

impl Default for MemoryEventBusBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventBusBackend {
    #[must_use]
    pub fn new() -> Self {
        Self { bus: EventBus::new() }
    }
}

#[async_trait]
impl EventBusBackend for MemoryEventBusBackend {
    async fn publish(&self, name: &str, payload: &Value) -> anyhow::Result<()> {
        self.bus.dispatch(JsonEvent {
            name: name.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn subscribe(&self, name: &str, callback: Arc<dyn Fn(Value) + Send + Sync>) -> anyhow::Result<u64> {
        Ok(self.bus.add_listener(
            name,
            Arc::new(move |event: JsonEvent| {
                callback(event.payload);
                Ok(())
            }),
        ))
    }

    async fn unsubscribe(&self, name: &str, id: u64) {
        self.bus.remove_listener(name, id);
    }
}
