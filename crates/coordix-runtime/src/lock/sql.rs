//! Postgres-backed [`DatabaseLockAdapter`], composed into a [`LockAdapter`]
//! by [`super::DatabaseLockBridge`].
//!
//! Schema (per spec §6):
//!
//! ```sql
//! CREATE TABLE coordix_lock (
//!     key        TEXT PRIMARY KEY,
//!     owner      TEXT NOT NULL,
//!     expiration BIGINT
//! );
//! ```
//!
//! Every transaction runs at `SERIALIZABLE` isolation so the read-decide-write
//! sequence the bridge performs is atomic even under concurrent acquirers
//! from different processes. Grounded on `storage/map_data_store.rs`'s
//! CRUD-shaped external trait, translated from its in-process `RwLock` guard
//! to a real `sqlx::Transaction`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use super::{DatabaseLockAdapter, LockRecord, LockTransaction};

/// A Postgres-backed lock table.
pub struct PostgresLockAdapter {
    pool: PgPool,
    table: String,
}

impl PostgresLockAdapter {
    /// Binds to `pool`, storing rows in `coordix_lock`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: "coordix_lock".to_string(),
        }
    }

    /// Binds to `pool`, storing rows in a caller-chosen table name (useful
    /// for running several independent lock namespaces against one schema).
    #[must_use]
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

struct PgLockTransaction<'a> {
    trx: Transaction<'a, Postgres>,
    table: String,
}

#[async_trait]
impl LockTransaction for PgLockTransaction<'_> {
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<LockRecord>> {
        let row: Option<(String, String, Option<i64>)> = sqlx::query_as(&format!(
            "SELECT key, owner, expiration FROM {} WHERE key = $1 FOR UPDATE",
            self.table
        ))
        .bind(key)
        .fetch_optional(&mut *self.trx)
        .await?;

        Ok(row.map(|(key, owner, expiration)| LockRecord {
            key,
            owner,
            expiration: expiration.map(|ms| ms as u64),
        }))
    }

    async fn upsert(&mut self, record: &LockRecord) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (key, owner, expiration) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET owner = EXCLUDED.owner, expiration = EXCLUDED.expiration",
            self.table
        ))
        .bind(&record.key)
        .bind(&record.owner)
        .bind(record.expiration.map(|ms| ms as i64))
        .execute(&mut *self.trx)
        .await?;
        Ok(())
    }

    async fn remove(&mut self, key: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE key = $1", self.table))
            .bind(key)
            .execute(&mut *self.trx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_expiration(&mut self, key: &str, expiration: Option<u64>) -> anyhow::Result<bool> {
        let result = sqlx::query(&format!("UPDATE {} SET expiration = $2 WHERE key = $1", self.table))
            .bind(key)
            .bind(expiration.map(|ms| ms as i64))
            .execute(&mut *self.trx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.trx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseLockAdapter for PostgresLockAdapter {
    fn backend_kind(&self) -> &str {
        "postgres"
    }

    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn LockTransaction + '_>> {
        let mut trx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *trx)
            .await?;
        Ok(Box::new(PgLockTransaction {
            trx,
            table: self.table.clone(),
        }))
    }
}
