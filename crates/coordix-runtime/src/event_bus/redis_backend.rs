//! Redis pub/sub-backed [`EventBusBackend`], letting multiple processes
//! share one bus instead of one process's in-memory fan-out.
//!
//! Grounded on the same `other_examples/...acteon...redis-src-lock.rs`
//! `deadpool_redis::Pool` usage as [`crate::lock::redis`] for publishing;
//! subscriptions need a dedicated (non-pooled) connection, so this adapter
//! also keeps a plain `redis::Client` for `get_async_pubsub`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use super::EventBusBackend;

struct Subscription {
    id: u64,
    cancel: CancellationToken,
}

/// A Redis-backed transport; `channel_prefix` namespaces channels so
/// multiple buses can share one Redis instance.
pub struct RedisEventBusBackend {
    pool: Pool,
    client: redis::Client,
    channel_prefix: String,
    next_id: AtomicU64,
    subscriptions: DashMap<String, Vec<Subscription>>,
}

impl RedisEventBusBackend {
    /// Binds a publish pool and a dedicated pub/sub client under
    /// `channel_prefix`.
    #[must_use]
    pub fn new(pool: Pool, client: redis::Client, channel_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            client,
            channel_prefix: channel_prefix.into(),
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
        }
    }

    fn channel(&self, name: &str) -> String {
        format!("{}:{name}", self.channel_prefix)
    }
}

#[async_trait]
impl EventBusBackend for RedisEventBusBackend {
    async fn publish(&self, name: &str, payload: &Value) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let blob = serde_json::to_string(payload)?;
        let _: i64 = conn.publish(self.channel(name), blob).await?;
        Ok(())
    }

    async fn subscribe(&self, name: &str, callback: Arc<dyn Fn(Value) + Send + Sync>) -> anyhow::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let channel = self.channel(name);
        let client = self.client.clone();
        let child = cancel.clone();

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        tokio::spawn(async move {
            let pubsub = AsyncMutex::new(pubsub);
            loop {
                let next = {
                    let mut guard = pubsub.lock().await;
                    let mut stream = guard.on_message();
                    tokio::select! {
                        () = child.cancelled() => None,
                        message = stream.next() => message,
                    }
                };
                let Some(message) = next else { break };
                let Ok(blob) = message.get_payload::<String>() else {
                    continue;
                };
                if let Ok(payload) = serde_json::from_str::<Value>(&blob) {
                    callback(payload);
                }
            }
        });

        self.subscriptions
            .entry(name.to_string())
            .or_default()
            .push(Subscription { id, cancel });
        Ok(id)
    }

    async fn unsubscribe(&self, name: &str, id: u64) {
        if let Some(mut entries) = self.subscriptions.get_mut(name) {
            entries.retain(|sub| {
                if sub.id == id {
                    sub.cancel.cancel();
                    false
                } else {
                    true
                }
            });
        }
    }
}
