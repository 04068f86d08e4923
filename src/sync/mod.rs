pub mod reconciler;

pub use reconciler::{ReconciliationPlan, Reconciler, SyncSummary};

use crate::db::OrderStore;
use crate::fetch::{RateFetcher, RateSource, SheetSource, SourceFetcher};
use std::fmt;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Why a cycle did not reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sheet kept timing out
    SourceUnavailable,
    /// The sheet returned no rows at all
    SourceEmpty,
    /// Stored keys could not be read
    StoreUnavailable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::SourceUnavailable => "source unavailable",
            SkipReason::SourceEmpty => "source returned no rows",
            SkipReason::StoreUnavailable => "stored orders unavailable",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(SyncSummary),
}

/// One rate source, one sheet, one table; cycles run strictly one after another
pub struct Synchronizer<R, S, D: ?Sized> {
    rates: RateFetcher<R>,
    source: SourceFetcher<S>,
    store: Box<D>,
    reconciler: Reconciler,
}

impl<R, S, D> Synchronizer<R, S, D>
where
    R: RateSource,
    S: SheetSource,
    D: OrderStore + ?Sized,
{
    pub fn new(rates: RateFetcher<R>, source: SourceFetcher<S>, store: Box<D>) -> Self {
        Self {
            rates,
            source,
            store,
            reconciler: Reconciler::new(),
        }
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    /// fetch rate -> fetch sheet -> list keys -> reconcile
    #[tracing::instrument(name = "sync_cycle", skip(self))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();

        let rate = self.rates.fetch().await;
        match rate {
            Some(rate) => tracing::info!("Exchange rate: {}", rate),
            None => tracing::warn!("No exchange rate this cycle, storing placeholder prices"),
        }

        let snapshot = self.source.fetch_all().await;
        let rows = match snapshot.rows() {
            None => return self.skip(SkipReason::SourceUnavailable, started),
            Some([]) => return self.skip(SkipReason::SourceEmpty, started),
            Some(rows) => rows,
        };
        if snapshot.is_partial() {
            tracing::warn!("Reconciling a partial snapshot of {} rows", rows.len());
        }

        let current_keys = match self.store.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("Could not read stored orders: {}", e);
                return self.skip(SkipReason::StoreUnavailable, started);
            }
        };

        let summary = self
            .reconciler
            .reconcile(rows, &current_keys, rate, &*self.store)
            .await;

        tracing::info!(
            "deleted -> {:?}, updated -> {:?}, added -> {:?}",
            summary.deleted,
            summary.updated,
            summary.inserted
        );
        if summary.failures() > 0 {
            tracing::warn!(
                "{} row failures (inserts {:?}, updates {:?}, deletes {:?}, rejected {})",
                summary.failures(),
                summary.failed_inserts,
                summary.failed_updates,
                summary.failed_deletes,
                summary.rejected
            );
        }
        tracing::info!(
            "✓ Successfully updated in {:.3}s",
            started.elapsed().as_secs_f64()
        );

        CycleOutcome::Completed(summary)
    }

    fn skip(&self, reason: SkipReason, started: Instant) -> CycleOutcome {
        tracing::warn!(
            "✗ Skipping reconciliation ({}) after {:.3}s",
            reason,
            started.elapsed().as_secs_f64()
        );
        CycleOutcome::Skipped(reason)
    }

    /// Run cycles every `period` until Ctrl+C.
    ///
    /// A cycle that overruns delays the next tick rather than stacking ticks.
    pub async fn run(&self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Created once so a Ctrl+C during a cycle is seen at the next select
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                    break;
                }
                _ = ticker.tick() => {
                    tracing::info!("🔄 Start updating...");
                    self.run_cycle().await;
                }
            }
        }
    }
}
