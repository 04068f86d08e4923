use crate::db::OrderStore;
use crate::error::StoreError;
use crate::models::{Order, OrderId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

/// In-process order table with the same semantics as [`super::PgOrderStore`]
#[derive(Default)]
pub struct MemoryOrderStore {
    rows: RwLock<Option<BTreeMap<OrderId, Order>>>,
}

impl MemoryOrderStore {
    /// A store whose table already exists
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// A store that has never created its table
    pub fn without_table() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let rows = orders.into_iter().map(|o| (o.order_id, o)).collect();
        Self {
            rows: RwLock::new(Some(rows)),
        }
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.read()
            .as_ref()
            .and_then(|rows| rows.get(&order_id).cloned())
    }

    pub fn orders(&self) -> Vec<Order> {
        self.read()
            .as_ref()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_table(&self) -> bool {
        self.read().is_some()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<BTreeMap<OrderId, Order>>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<BTreeMap<OrderId, Order>>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Mirrors the `row_num integer` column
fn validate(order: &Order) -> Result<(), StoreError> {
    order
        .sequence_number
        .trim()
        .parse::<i32>()
        .map(|_| ())
        .map_err(|e| StoreError::Malformed {
            order_id: order.order_id,
            reason: format!("row_num {:?}: {}", order.sequence_number, e),
        })
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.write().get_or_insert_with(BTreeMap::new);
        Ok(())
    }

    async fn list_keys(&self) -> Result<BTreeSet<OrderId>, StoreError> {
        let mut rows = self.write();
        let table = rows.get_or_insert_with(BTreeMap::new);
        Ok(table.keys().copied().collect())
    }

    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut rows = self.write();
        let table = rows.as_mut().ok_or(StoreError::MissingTable)?;

        // Postgres rejects the row_num cast before it checks uniqueness
        validate(order)?;
        if table.contains_key(&order.order_id) {
            return Err(StoreError::Duplicate(order.order_id));
        }

        table.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        let mut rows = self.write();
        let table = rows.as_mut().ok_or(StoreError::MissingTable)?;
        validate(order)?;

        match table.get_mut(&order.order_id) {
            Some(stored) => *stored = order.clone(),
            None => tracing::warn!("Update matched no stored order {}", order.order_id),
        }
        Ok(())
    }

    async fn delete(&self, keys: &BTreeSet<OrderId>) -> Result<(), StoreError> {
        let mut rows = self.write();
        let table = rows.get_or_insert_with(BTreeMap::new);
        table.retain(|id, _| !keys.contains(id));
        Ok(())
    }
}
