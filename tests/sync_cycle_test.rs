use async_trait::async_trait;
use chrono::NaiveDate;
use ordersync::api::{CbrClient, SheetsClient, StaticToken};
use ordersync::db::{MemoryOrderStore, OrderStore};
use ordersync::error::{AuthError, RateError, SheetError, StoreError};
use ordersync::fetch::{RateFetcher, RateSource, SheetSource, SourceFetcher};
use ordersync::models::{LocalPrice, Order, OrderId, RawRow};
use ordersync::retry::RetryPolicy;
use ordersync::sync::{CycleOutcome, SkipReason, SyncSummary, Synchronizer};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fakes
// ============================================================================

/// Publishes the same rate for every day, or never answers in time
struct FixedRate {
    rate: Option<f64>,
    times_out: bool,
    calls: Arc<AtomicU32>,
}

impl FixedRate {
    fn at(rate: f64) -> Self {
        Self {
            rate: Some(rate),
            times_out: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn unreachable() -> Self {
        Self {
            rate: None,
            times_out: true,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl RateSource for FixedRate {
    async fn rate_on(&self, _date: NaiveDate, _timeout: Duration) -> Result<Option<f64>, RateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.times_out {
            return Err(RateError::Timeout);
        }
        Ok(self.rate)
    }
}

#[derive(Clone, Copy)]
enum Failure {
    /// The API answers with an error status
    Refused,
    /// The token refresh cannot reach the token endpoint
    TokenUnreachable,
}

/// In-memory sheet; `None` rows means every read times out
struct Sheet {
    rows: Option<Vec<RawRow>>,
    /// Windows starting at or after this sheet row fail
    failing_from: Option<(u32, Failure)>,
}

impl Sheet {
    fn with_rows(rows: Vec<RawRow>) -> Self {
        Self {
            rows: Some(rows),
            failing_from: None,
        }
    }

    fn down() -> Self {
        Self {
            rows: None,
            failing_from: None,
        }
    }

    fn failing_from(mut self, first_row: u32, failure: Failure) -> Self {
        self.failing_from = Some((first_row, failure));
        self
    }
}

#[async_trait]
impl SheetSource for Sheet {
    async fn rows(&self, first: u32, last: u32, _timeout: Duration) -> Result<Vec<RawRow>, SheetError> {
        let Some(rows) = &self.rows else {
            return Err(SheetError::Timeout);
        };
        match self.failing_from {
            Some((from, Failure::Refused)) if first >= from => {
                return Err(SheetError::Api {
                    status: 503,
                    body: "backend error".into(),
                });
            }
            Some((from, Failure::TokenUnreachable)) if first >= from => {
                let error = reqwest::Client::new()
                    .get("http://[::1")
                    .build()
                    .unwrap_err();
                return Err(SheetError::Auth(AuthError::Transport(error)));
            }
            _ => {}
        }
        // Sheet row 2 is rows[0]
        let start = (first as usize - 2).min(rows.len());
        let end = (last as usize - 1).min(rows.len());
        Ok(rows[start..end].to_vec())
    }
}

/// Store whose key listing always fails; writes go to the wrapped table
struct UnreadableStore(MemoryOrderStore);

#[async_trait]
impl OrderStore for UnreadableStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.0.ensure_schema().await
    }

    async fn list_keys(&self) -> Result<BTreeSet<OrderId>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.0.insert(order).await
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        self.0.update(order).await
    }

    async fn delete(&self, keys: &BTreeSet<OrderId>) -> Result<(), StoreError> {
        self.0.delete(keys).await
    }
}

fn row(cells: &[&str]) -> RawRow {
    cells.iter().map(|c| c.to_string()).collect()
}

fn synchronizer(
    rate: FixedRate,
    sheet: Sheet,
    store: MemoryOrderStore,
) -> Synchronizer<FixedRate, Sheet, MemoryOrderStore> {
    let rates = RateFetcher::new(rate)
        .with_policy(RetryPolicy::rate_service().with_repeat_delay(Duration::ZERO));
    Synchronizer::new(rates, SourceFetcher::new(sheet), Box::new(store))
}

fn completed(outcome: CycleOutcome) -> SyncSummary {
    match outcome {
        CycleOutcome::Completed(summary) => summary,
        CycleOutcome::Skipped(reason) => panic!("cycle skipped: {}", reason),
    }
}

fn keys(ids: &[OrderId]) -> BTreeSet<OrderId> {
    ids.iter().copied().collect()
}

fn stored(order_id: OrderId) -> Order {
    Order {
        sequence_number: "1".into(),
        order_id,
        price_foreign: "100".into(),
        delivery_date: "01.01.2024".into(),
        price_local: LocalPrice::Converted(8300.0),
    }
}

/// `count` rows with order ids starting at `first_id`
fn numbered_rows(count: i32, first_id: OrderId) -> Vec<RawRow> {
    (0..count)
        .map(|n| row(&[&(n + 1).to_string(), &(first_id + n).to_string(), "10", "01.02.2024"]))
        .collect()
}

// ============================================================================
// Cycles
// ============================================================================

#[tokio::test]
async fn test_cycle_mirrors_sheet_keys() {
    let sheet = Sheet::with_rows(
        (0..250)
            .map(|n| row(&[&(n + 1).to_string(), &(5000 + n).to_string(), "10", "01.02.2024"]))
            .collect(),
    );
    let store = MemoryOrderStore::with_orders([Order {
        sequence_number: "1".into(),
        order_id: 1,
        price_foreign: "1".into(),
        delivery_date: "".into(),
        price_local: LocalPrice::Unavailable,
    }]);
    let sync = synchronizer(FixedRate::at(2.0), sheet, store);

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.inserted.len(), 250);
    assert_eq!(summary.deleted, vec![1]);
    let expected: BTreeSet<OrderId> = (5000..5250).collect();
    assert_eq!(sync.store().list_keys().await.unwrap(), expected);
    assert_eq!(
        sync.store().get(5000).unwrap().price_local.to_string(),
        "20.0"
    );
}

#[tokio::test]
async fn test_second_cycle_only_updates() {
    let rows = vec![
        row(&["1", "1249708", "675", "24.05.2022"]),
        row(&["2", "1182407", "214", "13.05.2022"]),
        row(&["3", "1120833", "610", "05.05.2022"]),
    ];
    let sync = synchronizer(
        FixedRate::at(83.0),
        Sheet::with_rows(rows),
        MemoryOrderStore::new(),
    );

    let first = completed(sync.run_cycle().await);
    assert_eq!(first.inserted.len(), 3);

    let second = completed(sync.run_cycle().await);
    assert!(second.inserted.is_empty());
    assert!(second.deleted.is_empty());
    assert_eq!(second.updated.len(), 3);
    assert_eq!(second.failures(), 0);
}

#[tokio::test]
async fn test_unavailable_sheet_deletes_nothing() {
    let store = MemoryOrderStore::new();
    store
        .insert(&Order {
            sequence_number: "1".into(),
            order_id: 4,
            price_foreign: "100".into(),
            delivery_date: "01.01.2024".into(),
            price_local: LocalPrice::Converted(8300.0),
        })
        .await
        .unwrap();
    let sync = synchronizer(FixedRate::at(83.0), Sheet::down(), store);

    let outcome = sync.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::SourceUnavailable));
    assert_eq!(sync.store().list_keys().await.unwrap(), keys(&[4]));
}

#[tokio::test]
async fn test_empty_sheet_deletes_nothing() {
    let store = MemoryOrderStore::with_orders([Order {
        sequence_number: "1".into(),
        order_id: 4,
        price_foreign: "100".into(),
        delivery_date: "01.01.2024".into(),
        price_local: LocalPrice::Converted(8300.0),
    }]);
    let sync = synchronizer(FixedRate::at(83.0), Sheet::with_rows(vec![]), store);

    let outcome = sync.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::SourceEmpty));
    assert_eq!(sync.store().list_keys().await.unwrap(), keys(&[4]));
}

#[tokio::test]
async fn test_missing_table_is_created_on_first_cycle() {
    let rows = vec![row(&["1", "7", "100", "01.01.2024"])];
    let sync = synchronizer(
        FixedRate::at(1.5),
        Sheet::with_rows(rows),
        MemoryOrderStore::without_table(),
    );

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.inserted, vec![7]);
    assert!(sync.store().has_table());
}

#[tokio::test]
async fn test_unreadable_store_skips_cycle() {
    let store = UnreadableStore(MemoryOrderStore::with_orders([stored(4)]));
    let sheet = Sheet::with_rows(vec![row(&["1", "7", "100", "01.01.2024"])]);
    let rates = RateFetcher::new(FixedRate::at(83.0));
    let sync = Synchronizer::new(rates, SourceFetcher::new(sheet), Box::new(store));

    let outcome = sync.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::StoreUnavailable));
    assert_eq!(sync.store().0.list_keys().await.unwrap(), keys(&[4]));
}

#[tokio::test]
async fn test_refused_window_reconciles_rows_read_so_far() {
    // 150 rows; the second window (sheet rows 102..201) is refused
    let sheet = Sheet::with_rows(numbered_rows(150, 1000)).failing_from(102, Failure::Refused);
    let store = MemoryOrderStore::with_orders([stored(1000), stored(1120), stored(9)]);
    let sync = synchronizer(FixedRate::at(83.0), sheet, store);

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.updated, vec![1000]);
    assert_eq!(summary.inserted.len(), 99);
    assert_eq!(summary.deleted, vec![9, 1120]);
    let expected: BTreeSet<OrderId> = (1000..1100).collect();
    assert_eq!(sync.store().list_keys().await.unwrap(), expected);
}

#[tokio::test]
async fn test_unreachable_token_endpoint_deletes_nothing() {
    let sheet = Sheet::with_rows(numbered_rows(4, 10)).failing_from(4, Failure::TokenUnreachable);
    let store = MemoryOrderStore::with_orders([stored(12), stored(13)]);
    let rates = RateFetcher::new(FixedRate::at(83.0));
    let source = SourceFetcher::new(sheet).with_window(2, 2);
    let sync = Synchronizer::new(rates, source, Box::new(store));

    let outcome = sync.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::SourceUnavailable));
    assert_eq!(sync.store().list_keys().await.unwrap(), keys(&[12, 13]));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_existing_order_is_repriced() {
    let store = MemoryOrderStore::with_orders([Order {
        sequence_number: "1".into(),
        order_id: 1249708,
        price_foreign: "600".into(),
        delivery_date: "24.05.2022".into(),
        price_local: LocalPrice::Unavailable,
    }]);
    let sheet = Sheet::with_rows(vec![row(&["1", "1249708", "675", "24.05.2022"])]);
    let sync = synchronizer(FixedRate::at(83.0), sheet, store);

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.updated, vec![1249708]);
    let stored = sync.store().get(1249708).unwrap();
    assert_eq!(stored.price_foreign, "675");
    assert_eq!(stored.price_local.to_string(), "56025.0");
}

#[tokio::test]
async fn test_scenario_new_order_is_inserted() {
    let sheet = Sheet::with_rows(vec![row(&["3", "1120833", "610", "05.05.2022"])]);
    let sync = synchronizer(FixedRate::at(83.0), sheet, MemoryOrderStore::new());

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.inserted, vec![1120833]);
    assert_eq!(
        sync.store().get(1120833).unwrap().price_local,
        LocalPrice::Converted(50630.0)
    );
}

#[tokio::test]
async fn test_scenario_dropped_order_is_deleted() {
    let existing = |order_id| Order {
        sequence_number: "1".into(),
        order_id,
        price_foreign: "1".into(),
        delivery_date: "".into(),
        price_local: LocalPrice::Unavailable,
    };
    let store = MemoryOrderStore::with_orders([existing(1249708), existing(4)]);
    let sheet = Sheet::with_rows(vec![row(&["1", "1249708", "675", "24.05.2022"])]);
    let sync = synchronizer(FixedRate::at(83.0), sheet, store);

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.deleted, vec![4]);
    assert_eq!(sync.store().list_keys().await.unwrap(), keys(&[1249708]));
}

#[tokio::test]
async fn test_scenario_no_rate_stores_sentinel() {
    let rate = FixedRate::unreachable();
    let sheet = Sheet::with_rows(vec![
        row(&["1", "1249708", "675", "24.05.2022"]),
        row(&["2", "1182407", "214", "13.05.2022"]),
    ]);
    let sync = synchronizer(rate, sheet, MemoryOrderStore::new());

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.inserted.len(), 2);
    for order in sync.store().orders() {
        assert_eq!(order.price_local.to_string(), "???");
    }
}

#[tokio::test]
async fn test_rate_timeouts_are_bounded() {
    let rate = FixedRate::unreachable();
    let calls = rate.calls.clone();
    let fetcher = RateFetcher::new(rate)
        .with_policy(RetryPolicy::rate_service().with_repeat_delay(Duration::ZERO));

    assert_eq!(fetcher.fetch().await, None);
    // 100ms, 200ms, 300ms then give up without walking back further
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Over HTTP
// ============================================================================

#[tokio::test]
async fn test_cycle_against_http_services() {
    let mut cbr = mockito::Server::new_async().await;
    let _rate = cbr
        .mock("GET", "/scripts/XML_dynamic.asp")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body("<ValCurs><Record><Nominal>1</Nominal><Value>83,0000</Value></Record></ValCurs>")
        .create_async()
        .await;

    let mut sheets = mockito::Server::new_async().await;
    let _first = sheets
        .mock("GET", "/v4/spreadsheets/sheet-1/values/2:101")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"values": [["1", "1249708", "675", "24.05.2022"], ["2", "1182407", "214", "13.05.2022"]]}"#)
        .create_async()
        .await;
    let _rest = sheets
        .mock("GET", "/v4/spreadsheets/sheet-1/values/102:201")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"range": "Sheet1!A102:Z201"}"#)
        .create_async()
        .await;

    let rates = RateFetcher::new(CbrClient::new(cbr.url(), "R01235"));
    let source = SourceFetcher::new(SheetsClient::new(
        sheets.url(),
        "sheet-1",
        Arc::new(StaticToken("token".into())),
        600,
    ));
    let sync = Synchronizer::new(rates, source, Box::new(MemoryOrderStore::new()));

    let summary = completed(sync.run_cycle().await);

    assert_eq!(summary.inserted, vec![1249708, 1182407]);
    assert_eq!(
        sync.store().get(1182407).unwrap().price_local.to_string(),
        "17762.0"
    );
}
