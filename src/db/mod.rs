pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

use crate::error::StoreError;
use crate::models::{Order, OrderId};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// The persisted order table, keyed by `order_id`
///
/// Every call is its own unit of work; nothing spans calls.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Create the table if it does not exist
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// All stored order ids. A missing table is created and reported as empty.
    async fn list_keys(&self) -> Result<BTreeSet<OrderId>, StoreError>;

    /// Insert a new order; fails on a duplicate id or malformed payload
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    /// Overwrite the payload of the order with `order.order_id`.
    ///
    /// Succeeds when no row has that id.
    async fn update(&self, order: &Order) -> Result<(), StoreError>;

    /// Remove the given ids; unknown ids are ignored
    async fn delete(&self, keys: &BTreeSet<OrderId>) -> Result<(), StoreError>;
}
