//! Diff the source snapshot against the stored keys and apply the result.
//!
//! For every source row the order id decides the action: ids already stored
//! are updated, new ids are inserted. Stored ids that no row mentions are
//! deleted in one batch at the end. Every written row carries
//! `price_foreign × rate`, or the sentinel when the rate is unknown.

use crate::db::OrderStore;
use crate::models::{cell, LocalPrice, Order, OrderId, RawRow, RowRejection};
use std::collections::BTreeSet;

const COL_ROW_NUM: usize = 0;
const COL_ORDER_ID: usize = 1;
const COL_PRICE: usize = 2;
const COL_DELIVERY_DATE: usize = 3;

/// Writes derived from one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub to_insert: Vec<Order>,
    pub to_update: Vec<Order>,
    pub to_delete: BTreeSet<OrderId>,
    pub rejected: Vec<RowRejection>,
}

/// What actually happened when a plan was applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub inserted: Vec<OrderId>,
    pub updated: Vec<OrderId>,
    pub deleted: Vec<OrderId>,
    pub failed_inserts: Vec<OrderId>,
    pub failed_updates: Vec<OrderId>,
    /// Keys that should have been deleted but the batch failed
    pub failed_deletes: Vec<OrderId>,
    pub rejected: usize,
}

impl SyncSummary {
    pub fn failures(&self) -> usize {
        self.failed_inserts.len()
            + self.failed_updates.len()
            + self.failed_deletes.len()
            + self.rejected
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    /// Classify every source row without touching storage
    pub fn plan(
        &self,
        rows: &[RawRow],
        current_keys: &BTreeSet<OrderId>,
        rate: Option<f64>,
    ) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::default();
        let mut retained = BTreeSet::new();

        for (index, row) in rows.iter().enumerate() {
            let raw_id = cell(row, COL_ORDER_ID);
            let Ok(order_id) = raw_id.parse::<OrderId>() else {
                plan.rejected.push(RowRejection::InvalidOrderId {
                    row: index,
                    value: raw_id.to_string(),
                });
                continue;
            };

            // Keep the stored row even if this one turns out to be unusable
            let exists = current_keys.contains(&order_id);
            if exists {
                retained.insert(order_id);
            }

            let raw_price = cell(row, COL_PRICE);
            let Ok(price_foreign) = raw_price.parse::<i64>() else {
                plan.rejected.push(RowRejection::InvalidPrice {
                    row: index,
                    order_id,
                    value: raw_price.to_string(),
                });
                continue;
            };

            let order = Order {
                sequence_number: cell(row, COL_ROW_NUM).to_string(),
                order_id,
                price_foreign: raw_price.to_string(),
                delivery_date: cell(row, COL_DELIVERY_DATE).to_string(),
                price_local: LocalPrice::compute(price_foreign, rate),
            };

            if exists {
                plan.to_update.push(order);
            } else {
                plan.to_insert.push(order);
            }
        }

        plan.to_delete = current_keys.difference(&retained).copied().collect();
        plan
    }

    /// Apply a plan. Individual failures are logged and counted; they never
    /// stop the rest of the batch.
    pub async fn apply<S: OrderStore + ?Sized>(
        &self,
        plan: &ReconciliationPlan,
        store: &S,
    ) -> SyncSummary {
        let mut summary = SyncSummary {
            rejected: plan.rejected.len(),
            ..Default::default()
        };

        for rejection in &plan.rejected {
            tracing::warn!("Skipping source {}", rejection);
        }

        for order in &plan.to_update {
            match store.update(order).await {
                Ok(()) => summary.updated.push(order.order_id),
                Err(e) => {
                    tracing::warn!("Update of order {} failed: {}", order.order_id, e);
                    summary.failed_updates.push(order.order_id);
                }
            }
        }

        for order in &plan.to_insert {
            match store.insert(order).await {
                Ok(()) => summary.inserted.push(order.order_id),
                Err(e) => {
                    tracing::warn!("Insert of order {} failed: {}", order.order_id, e);
                    summary.failed_inserts.push(order.order_id);
                }
            }
        }

        if !plan.to_delete.is_empty() {
            let keys: Vec<OrderId> = plan.to_delete.iter().copied().collect();
            match store.delete(&plan.to_delete).await {
                Ok(()) => summary.deleted = keys,
                Err(e) => {
                    tracing::warn!("Deleting {} orders failed: {}", keys.len(), e);
                    summary.failed_deletes = keys;
                }
            }
        }

        summary
    }

    /// Plan and apply in one pass
    pub async fn reconcile<S: OrderStore + ?Sized>(
        &self,
        rows: &[RawRow],
        current_keys: &BTreeSet<OrderId>,
        rate: Option<f64>,
        store: &S,
    ) -> SyncSummary {
        let plan = self.plan(rows, current_keys, rate);
        self.apply(&plan, store).await
    }
}
