use crate::error::RateError;
use crate::fetch::RateSource;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::time::Duration;

pub const CBR_API_BASE: &str = "https://www.cbr.ru";
/// Central-bank code for the US dollar
pub const USD_CODE: &str = "R01235";

/// Client for the Bank of Russia daily exchange-rate endpoint
///
/// One call is one HTTP request; retries and the date walk live in
/// [`crate::fetch::RateFetcher`].
#[derive(Clone)]
pub struct CbrClient {
    client: Client,
    base_url: String,
    currency_code: String,
}

impl CbrClient {
    pub fn new(base_url: impl Into<String>, currency_code: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            currency_code: currency_code.into(),
        }
    }

    /// Fetch the rate published for `date`.
    ///
    /// Returns `Ok(None)` when the service has no rate for that date
    /// (weekends, holidays, future dates).
    pub async fn get_rate(
        &self,
        date: NaiveDate,
        timeout: Duration,
    ) -> Result<Option<f64>, RateError> {
        let url = format!("{}/scripts/XML_dynamic.asp", self.base_url);
        let day = date.format("%d/%m/%Y").to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("date_req1", day.as_str()),
                ("date_req2", day.as_str()),
                ("VAL_NM_RQ", self.currency_code.as_str()),
            ])
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(RateError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_value(&body)
    }
}

impl Default for CbrClient {
    fn default() -> Self {
        Self::new(CBR_API_BASE, USD_CODE)
    }
}

#[async_trait]
impl RateSource for CbrClient {
    async fn rate_on(&self, date: NaiveDate, timeout: Duration) -> Result<Option<f64>, RateError> {
        self.get_rate(date, timeout).await
    }
}

/// Extract the first `<Value>` element, e.g. `<Value>81,7392</Value>` -> 81.7392
pub fn parse_value(body: &str) -> Result<Option<f64>, RateError> {
    let Some(start) = body.find("<Value>") else {
        return Ok(None);
    };
    let rest = &body[start + "<Value>".len()..];
    let raw = rest.split("</Value>").next().unwrap_or(rest).trim();

    raw.replace(',', ".")
        .parse::<f64>()
        .map(Some)
        .map_err(|_| RateError::Parse(raw.to_string()))
}
