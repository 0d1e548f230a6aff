//! Postgres-backed [`DatabaseSemaphoreAdapter`].
//!
//! Schema (per spec §6):
//!
//! ```sql
//! CREATE TABLE semaphore (key TEXT PRIMARY KEY, "limit" INT NOT NULL);
//! CREATE TABLE semaphore_slot (
//!     key        TEXT NOT NULL REFERENCES semaphore(key) ON DELETE CASCADE,
//!     slot_id    TEXT NOT NULL,
//!     expiration BIGINT,
//!     PRIMARY KEY (key, slot_id)
//! );
//! ```
//!
//! Grounded on `storage/map_data_store.rs`'s CRUD trait, extended to two
//! related tables the way the teacher's `schema.rs` models one logical
//! record across several physical tables.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use super::{DatabaseSemaphoreAdapter, SemaphoreRecord, SemaphoreTransaction, SlotRecord};

/// A Postgres-backed semaphore table pair.
pub struct PostgresSemaphoreAdapter {
    pool: PgPool,
}

impl PostgresSemaphoreAdapter {
    /// Binds to `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgSemaphoreTransaction<'a> {
    trx: Transaction<'a, Postgres>,
}

#[async_trait]
impl SemaphoreTransaction for PgSemaphoreTransaction<'_> {
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<SemaphoreRecord>> {
        let limit_row: Option<(i32,)> =
            sqlx::query_as(r#"SELECT "limit" FROM semaphore WHERE key = $1 FOR UPDATE"#)
                .bind(key)
                .fetch_optional(&mut *self.trx)
                .await?;

        let Some((limit,)) = limit_row else {
            return Ok(None);
        };

        let slot_rows: Vec<(String, Option<i64>)> = sqlx::query_as(
            "SELECT slot_id, expiration FROM semaphore_slot WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_all(&mut *self.trx)
        .await?;

        Ok(Some(SemaphoreRecord {
            key: key.to_string(),
            #[allow(clippy::cast_sign_loss)]
            limit: limit as u32,
            slots: slot_rows
                .into_iter()
                .map(|(slot_id, expiration)| SlotRecord {
                    slot_id,
                    expiration: expiration.map(|ms| ms as u64),
                })
                .collect(),
        }))
    }

    async fn put(&mut self, key: &str, record: Option<&SemaphoreRecord>) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM semaphore_slot WHERE key = $1")
            .bind(key)
            .execute(&mut *self.trx)
            .await?;
        sqlx::query("DELETE FROM semaphore WHERE key = $1")
            .bind(key)
            .execute(&mut *self.trx)
            .await?;

        let Some(record) = record else {
            return Ok(());
        };

        sqlx::query(r#"INSERT INTO semaphore (key, "limit") VALUES ($1, $2)"#)
            .bind(key)
            .bind(i32::try_from(record.limit).unwrap_or(i32::MAX))
            .execute(&mut *self.trx)
            .await?;

        for slot in &record.slots {
            sqlx::query(
                "INSERT INTO semaphore_slot (key, slot_id, expiration) VALUES ($1, $2, $3)",
            )
            .bind(key)
            .bind(&slot.slot_id)
            .bind(slot.expiration.map(|ms| ms as i64))
            .execute(&mut *self.trx)
            .await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.trx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseSemaphoreAdapter for PostgresSemaphoreAdapter {
    fn backend_kind(&self) -> &str {
        "postgres"
    }

    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn SemaphoreTransaction + '_>> {
        let mut trx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *trx)
            .await?;
        Ok(Box::new(PgSemaphoreTransaction { trx }))
    }
}
