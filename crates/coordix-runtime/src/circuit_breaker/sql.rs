//! Postgres-backed [`DatabaseCircuitBreakerAdapter`].
//!
//! Schema (per spec §6):
//!
//! ```sql
//! CREATE TABLE circuit_breaker (key TEXT PRIMARY KEY, state TEXT NOT NULL);
//! ```
//!
//! `state` is the opaque JSON-serialized [`super::BreakerRecord`] the bridge
//! in `mod.rs` reads, decides over, and rewrites — this adapter only moves
//! bytes.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use super::{CircuitBreakerTransaction, DatabaseCircuitBreakerAdapter};

/// A Postgres-backed circuit breaker table.
pub struct PostgresCircuitBreakerAdapter {
    pool: PgPool,
}

impl PostgresCircuitBreakerAdapter {
    /// Binds to `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgCircuitBreakerTransaction<'a> {
    trx: Transaction<'a, Postgres>,
}

#[async_trait]
impl CircuitBreakerTransaction for PgCircuitBreakerTransaction<'_> {
    async fn find(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT state FROM circuit_breaker WHERE key = $1 FOR UPDATE")
            .bind(key)
            .fetch_optional(&mut *self.trx)
            .await?;
        Ok(row.map(|(state,)| state))
    }

    async fn put(&mut self, key: &str, serialized: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO circuit_breaker (key, state) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET state = EXCLUDED.state",
        )
        .bind(key)
        .bind(serialized)
        .execute(&mut *self.trx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.trx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseCircuitBreakerAdapter for PostgresCircuitBreakerAdapter {
    fn backend_kind(&self) -> &str {
        "postgres"
    }

    async fn begin_transaction(&self) -> anyhow::Result<Box<dyn CircuitBreakerTransaction + '_>> {
        let mut trx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *trx)
            .await?;
        Ok(Box::new(PgCircuitBreakerTransaction { trx }))
    }
}
