use crate::error::RateError;
use crate::retry::{RetryAction, RetryError, RetryPolicy};
use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use std::time::Duration;

pub const DEFAULT_MAX_LOOKBACK_DAYS: u32 = 30;

/// One lookup against an exchange-rate service
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Rate published for `date`, `Ok(None)` if the service has none for that day
    async fn rate_on(&self, date: NaiveDate, timeout: Duration) -> Result<Option<f64>, RateError>;
}

/// Finds the most recent published rate, walking back from today
pub struct RateFetcher<S> {
    source: S,
    policy: RetryPolicy,
    max_lookback_days: u32,
}

impl<S: RateSource> RateFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            policy: RetryPolicy::rate_service(),
            max_lookback_days: DEFAULT_MAX_LOOKBACK_DAYS,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_lookback_days(mut self, days: u32) -> Self {
        self.max_lookback_days = days;
        self
    }

    /// Latest rate as of today, `None` if it could not be obtained
    pub async fn fetch(&self) -> Option<f64> {
        self.fetch_as_of(Local::now().date_naive()).await
    }

    /// Latest rate published on or before `today`.
    ///
    /// Never fails: every error is logged and turned into `None`.
    #[tracing::instrument(name = "fetch_rate", skip(self))]
    pub async fn fetch_as_of(&self, today: NaiveDate) -> Option<f64> {
        for offset in 0..=self.max_lookback_days {
            let Some(date) = today.checked_sub_days(Days::new(offset as u64)) else {
                break;
            };

            let result = self
                .policy
                .run(
                    "fetch_rate",
                    |timeout| self.source.rate_on(date, timeout),
                    classify,
                )
                .await;

            match result {
                Ok(Some(rate)) => {
                    tracing::debug!("Rate for {} is {}", date, rate);
                    return Some(rate);
                }
                Ok(None) => {
                    tracing::debug!("No rate published for {}, stepping back", date);
                }
                Err(RetryError::Exhausted { attempts, source }) => {
                    tracing::warn!(
                        "Rate service unavailable for {} after {} attempts: {}",
                        date,
                        attempts,
                        source
                    );
                    return None;
                }
                Err(RetryError::Aborted(e)) => {
                    tracing::warn!("Rate lookup for {} failed: {}", date, e);
                    return None;
                }
            }
        }

        tracing::warn!(
            "No rate published within {} days before {}",
            self.max_lookback_days,
            today
        );
        None
    }
}

fn classify(error: &RateError) -> RetryAction {
    match error {
        RateError::Timeout | RateError::Transport(_) => RetryAction::Escalate,
        RateError::Status(_) => RetryAction::Repeat,
        RateError::Parse(_) => RetryAction::Abort,
    }
}
