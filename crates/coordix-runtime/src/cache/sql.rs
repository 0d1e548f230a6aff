//! Postgres-backed [`DatabaseCacheAdapter`] plus a periodic expired-entry
//! sweeper.
//!
//! Schema:
//!
//! ```sql
//! CREATE TABLE cache (key TEXT PRIMARY KEY, value JSONB NOT NULL, expiration BIGINT);
//! CREATE INDEX ON cache (expiration);
//! ```
//!
//! `init()`/`deinit()` start and stop a `tokio::spawn`'d sweep loop holding
//! a `CancellationToken`, grounded on `network/shutdown.rs`'s graceful
//! shutdown pattern generalized from "stop accepting connections" to "stop
//! sweeping".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordix_core::time::now_millis;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CacheRecord, CacheTransaction, DatabaseCacheAdapter};

/// A Postgres-backed cache table, with an optional background sweeper.
pub struct PostgresCacheAdapter {
    pool: PgPool,
    sweep: std::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PostgresCacheAdapter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sweep: std::sync::Mutex::new(None),
        }
    }

    /// Starts the periodic sweeper on `interval`, replacing any existing
    /// one. The sweeper deletes rows whose `expiration <= now`.
    pub fn init(self: &Arc<Self>, interval: Duration) {
        self.deinit();
        let token = CancellationToken::new();
        let child = token.clone();
        let adapter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = adapter.sweep_once().await {
                            tracing::warn!(error = %error, "cache sweep failed");
                        }
                    }
                }
            }
        });
        *self.sweep.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some((token, handle));
    }

    /// Cancels the background sweeper, if running.
    pub fn deinit(&self) {
        if let Some((token, _handle)) = self
            .sweep
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    async fn sweep_once(&self) -> anyhow::Result<u64> {
        let now = i64::try_from(now_millis()).unwrap_or(i64::MAX);
        let result = sqlx::query("DELETE FROM cache WHERE expiration IS NOT NULL AND expiration <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl Drop for PostgresCacheAdapter {
    fn drop(&mut self) {
        self.deinit();
    }
}

struct PgCacheTransaction<'a> {
    trx: Transaction<'a, Postgres>,
}

#[async_trait]
impl CacheTransaction for PgCacheTransaction<'_> {
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<CacheRecord>> {
        let row: Option<(serde_json::Value, Option<i64>)> =
            sqlx::query_as("SELECT value, expiration FROM cache WHERE key = $1 FOR UPDATE")
                .bind(key)
                .fetch_optional(&mut *self.trx)
                .await?;
        #[allow(clippy::cast_sign_loss)]
        Ok(row.map(|(value, expiration)| CacheRecord {
            key: key.to_string(),
            value,
            expiration: expiration.map(|ms| ms as u64),
        }))
    }

    async fn put(&mut self, key: &str, record: Option<&CacheRecord>) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cache WHERE key = $1")
            .bind(key)
            .execute(&mut *self.trx)
            .await?;
        let Some(record) = record else {
            return Ok(());
        };
        sqlx::query("INSERT INTO cache (key, value, expiration) VALUES ($1, $2, $3)")
            .bind(key)
            .bind(&record.value)
            .bind(record.expiration.map(|ms| ms as i64))
            .execute(&mut *self.trx)
            .await?;
        Ok(())
    }

    async fn scan_prefix(&mut self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM cache WHERE key LIKE $1")
            .bind(format!("{}%", prefix.replace('%', "\\%")))
            .fetch_all(&mut *self.trx)
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.trx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseCacheAdapter for PostgresCacheAdapter {
    fn backend_kind(&self) -> &str {
        "postgres"
    }

    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn CacheTransaction + '_>> {
        let mut trx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *trx)
            .await?;
        Ok(Box::new(PgCacheTransaction { trx }))
    }
}
