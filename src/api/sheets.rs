use crate::api::auth::TokenProvider;
use crate::error::SheetError;
use crate::fetch::SheetSource;
use crate::models::RawRow;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
/// Default per-user read quota of the Sheets API
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

type SheetsRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Response of `spreadsheets.values.get`; `values` is omitted for empty ranges
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Read-only Google Sheets client for one spreadsheet
#[derive(Clone)]
pub struct SheetsClient {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    auth: Arc<dyn TokenProvider>,
    rate_limiter: Arc<SheetsRateLimiter>,
}

impl SheetsClient {
    pub fn new(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        auth: Arc<dyn TokenProvider>,
        requests_per_minute: u32,
    ) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            auth,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(rpm))),
        }
    }

    /// Fetch whole rows `first..=last` (1-based, A1 notation `first:last`)
    pub async fn get_rows(
        &self,
        first: u32,
        last: u32,
        timeout: Duration,
    ) -> Result<Vec<RawRow>, SheetError> {
        let token = self.auth.access_token().await?;
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}:{}",
            self.base_url, self.spreadsheet_id, first, last
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("majorDimension", "ROWS")])
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SheetError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let range: ValueRange = response.json().await?;
        tracing::debug!("Fetched {} rows from {}:{}", range.values.len(), first, last);

        Ok(range.values)
    }
}

#[async_trait]
impl SheetSource for SheetsClient {
    async fn rows(
        &self,
        first: u32,
        last: u32,
        timeout: Duration,
    ) -> Result<Vec<RawRow>, SheetError> {
        self.get_rows(first, last, timeout).await
    }
}
