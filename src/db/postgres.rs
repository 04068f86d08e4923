use crate::db::OrderStore;
use crate::error::StoreError;
use crate::models::{Order, OrderId};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::time::Duration;

/// One writer, one spare
pub const MAX_CONNECTIONS: u32 = 2;

const UNDEFINED_TABLE: &str = "42P01";
/// SQLSTATE class 22: data exception (bad integer text, overflow, ...)
const DATA_EXCEPTION_CLASS: &str = "22";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS orders (
        id serial PRIMARY KEY,
        row_num integer,
        order_id integer UNIQUE,
        price_usd varchar,
        delivery_data varchar,
        price_rur varchar
    )
"#;

/// Postgres-backed order table
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Build a pool that connects on first use, so a database that is still
    /// starting up does not prevent the service from starting.
    pub fn connect_lazy(options: PgConnectOptions) -> Self {
        let pool = Self::pool_options().connect_lazy_with(options);
        Self { pool }
    }

    pub fn connect_lazy_url(database_url: &str) -> Result<Self, StoreError> {
        let pool = Self::pool_options().connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    fn pool_options() -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(5))
    }

    #[cfg(test)]
    fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Drop the orders table (testing only)
    #[cfg(test)]
    async fn drop_table(&self) -> Result<(), StoreError> {
        sqlx::query("DROP TABLE IF EXISTS orders")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn is_undefined_table(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNDEFINED_TABLE),
        _ => false,
    }
}

/// Map a failed INSERT/UPDATE onto the per-row error kinds
fn classify_write(error: sqlx::Error, order_id: OrderId) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return StoreError::Duplicate(order_id);
        }
        if is_undefined_table(&error) {
            return StoreError::MissingTable;
        }
        let data_exception = db
            .code()
            .is_some_and(|code| code.starts_with(DATA_EXCEPTION_CLASS));
        if data_exception {
            return StoreError::Malformed {
                order_id,
                reason: db.message().to_string(),
            };
        }
    }
    StoreError::Database(error)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[tracing::instrument(name = "ensure_schema", skip(self))]
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        tracing::debug!("orders table ready");
        Ok(())
    }

    #[tracing::instrument(name = "list_keys", skip(self))]
    async fn list_keys(&self) -> Result<BTreeSet<OrderId>, StoreError> {
        let result = sqlx::query_scalar::<_, Option<OrderId>>("SELECT order_id FROM orders")
            .fetch_all(&self.pool)
            .await;

        match result {
            Ok(keys) => Ok(keys.into_iter().flatten().collect()),
            Err(e) if is_undefined_table(&e) => {
                tracing::warn!("orders table missing, creating it: {}", e);
                self.ensure_schema().await?;
                Ok(BTreeSet::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(name = "insert_order", skip_all, fields(order_id = order.order_id))]
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (row_num, order_id, price_usd, delivery_data, price_rur)
            VALUES ($1::integer, $2, $3, $4, $5)
            "#,
        )
        .bind(&order.sequence_number)
        .bind(order.order_id)
        .bind(&order.price_foreign)
        .bind(&order.delivery_date)
        .bind(order.price_local.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_write(e, order.order_id))?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(name = "update_order", skip_all, fields(order_id = order.order_id))]
    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET row_num = $1::integer,
                price_usd = $2,
                delivery_data = $3,
                price_rur = $4
            WHERE order_id = $5
            "#,
        )
        .bind(&order.sequence_number)
        .bind(&order.price_foreign)
        .bind(&order.delivery_date)
        .bind(order.price_local.to_string())
        .bind(order.order_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_write(e, order.order_id))?;

        tx.commit().await?;

        // Not an error: the row may have been deleted since list_keys
        if result.rows_affected() == 0 {
            tracing::warn!("Update matched no stored order {}", order.order_id);
        }

        Ok(())
    }

    #[tracing::instrument(name = "delete_orders", skip_all, fields(count = keys.len()))]
    async fn delete(&self, keys: &BTreeSet<OrderId>) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }

        let ids: Vec<OrderId> = keys.iter().copied().collect();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM orders WHERE order_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await;

        match result {
            Ok(done) => {
                tx.commit().await?;
                tracing::debug!("Deleted {} of {} orders", done.rows_affected(), ids.len());
                Ok(())
            }
            Err(e) if is_undefined_table(&e) => {
                drop(tx);
                tracing::warn!("orders table missing, creating it: {}", e);
                self.ensure_schema().await
            }
            Err(e) => Err(e.into()),
        }
    }
}
