use app_config::types::DatabaseSettings;
use core_types::{OrderRecord, RiskViolation, Side};
use sqlx::{PgPool, postgres::PgPoolOptions};

pub mod error;

// Re-export the most important types for easy access.
pub use error::{Error, Result};

/// A wrapper around the `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct Db(PgPool);

/// Establishes a connection pool to the PostgreSQL database and runs migrations.
pub async fn connect(settings: &DatabaseSettings) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.url)
        .await?;

    // Run database migrations. This ensures the database schema is up-to-date.
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(Error::from)?;

    Ok(Db(pool))
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Long => "long",
        Side::Short => "short",
    }
}

impl Db {
    /// Upserts a batch of order records, keyed by idempotency key so a
    /// replayed write converges on the latest lifecycle state.
    pub async fn upsert_orders(&self, records: &[OrderRecord]) -> Result<()> {
        let mut tx = self.0.begin().await.map_err(Error::OperationFailed)?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO orders
                    (id, idempotency_key, symbol, side, notional, status,
                     exchange_order_id, execution_price, reject_reason, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (idempotency_key) DO UPDATE SET
                    status = EXCLUDED.status,
                    exchange_order_id = EXCLUDED.exchange_order_id,
                    execution_price = EXCLUDED.execution_price,
                    reject_reason = EXCLUDED.reject_reason,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(record.id)
            .bind(&record.idempotency_key)
            .bind(&record.symbol)
            .bind(side_str(record.side))
            .bind(record.notional)
            .bind(&record.status)
            .bind(&record.exchange_order_id)
            .bind(record.execution_price)
            .bind(&record.reject_reason)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::OperationFailed)?;
        }

        tx.commit().await.map_err(Error::OperationFailed)?;
        tracing::debug!(count = records.len(), "order batch persisted");

        Ok(())
    }

    /// Appends risk-violation audit rows.
    pub async fn insert_risk_violations(&self, violations: &[RiskViolation]) -> Result<()> {
        let mut tx = self.0.begin().await.map_err(Error::OperationFailed)?;

        for violation in violations {
            sqlx::query(
                r#"
                INSERT INTO risk_violations (code, symbol, detail, occurred_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&violation.code)
            .bind(&violation.symbol)
            .bind(&violation.detail)
            .bind(violation.at)
            .execute(&mut *tx)
            .await
            .map_err(Error::OperationFailed)?;
        }

        tx.commit().await.map_err(Error::OperationFailed)?;

        Ok(())
    }
}
