use crate::error::{AuthError, SheetError};
use crate::models::RawRow;
use crate::retry::{RetryAction, RetryError, RetryPolicy};
use async_trait::async_trait;
use std::time::Duration;

/// First data row; row 1 holds the column headers
pub const DEFAULT_FIRST_ROW: u32 = 2;
pub const DEFAULT_WINDOW_ROWS: u32 = 100;

/// Windowed read access to a spreadsheet
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Rows `first..=last` (1-based); an empty vec means the range is blank
    async fn rows(&self, first: u32, last: u32, timeout: Duration)
        -> Result<Vec<RawRow>, SheetError>;
}

/// Result of paginating the whole sheet
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSnapshot {
    /// Every window read up to the first blank one
    Complete(Vec<RawRow>),
    /// The API refused a window; rows read before the failure
    Partial(Vec<RawRow>),
    /// A window kept timing out; nothing from this fetch is usable
    Unavailable,
}

impl SourceSnapshot {
    /// Rows to reconcile, `None` when there is no usable snapshot
    pub fn rows(&self) -> Option<&[RawRow]> {
        match self {
            SourceSnapshot::Complete(rows) | SourceSnapshot::Partial(rows) => Some(rows),
            SourceSnapshot::Unavailable => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, SourceSnapshot::Partial(_))
    }
}

/// Reads the sheet in fixed-size windows until a blank window
pub struct SourceFetcher<S> {
    source: S,
    policy: RetryPolicy,
    first_row: u32,
    window_rows: u32,
}

impl<S: SheetSource> SourceFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            policy: RetryPolicy::sheet_source(),
            first_row: DEFAULT_FIRST_ROW,
            window_rows: DEFAULT_WINDOW_ROWS,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_window(mut self, first_row: u32, window_rows: u32) -> Self {
        self.first_row = first_row.max(1);
        self.window_rows = window_rows.max(1);
        self
    }

    #[tracing::instrument(name = "fetch_orders", skip(self))]
    pub async fn fetch_all(&self) -> SourceSnapshot {
        let mut rows: Vec<RawRow> = Vec::new();
        let mut first = self.first_row;

        loop {
            let last = first.saturating_add(self.window_rows - 1);

            let result = self
                .policy
                .run(
                    "fetch_window",
                    |timeout| self.source.rows(first, last, timeout),
                    classify,
                )
                .await;

            match result {
                Ok(window) if window.is_empty() => break,
                Ok(window) => {
                    tracing::debug!("Rows {}:{} returned {} rows", first, last, window.len());
                    rows.extend(window);
                }
                Err(RetryError::Exhausted { attempts, source }) => {
                    tracing::warn!(
                        "Rows {}:{} unavailable after {} attempts: {}",
                        first,
                        last,
                        attempts,
                        source
                    );
                    return SourceSnapshot::Unavailable;
                }
                Err(RetryError::Aborted(e)) => {
                    tracing::warn!(
                        "Reading rows {}:{} failed, keeping {} rows read so far: {}",
                        first,
                        last,
                        rows.len(),
                        e
                    );
                    return SourceSnapshot::Partial(rows);
                }
            }

            match last.checked_add(1) {
                Some(next) => first = next,
                None => break,
            }
        }

        SourceSnapshot::Complete(rows)
    }
}

/// Network trouble (including while refreshing the token) must end in
/// `Unavailable`; only answers from the API may end in `Partial`.
fn classify(error: &SheetError) -> RetryAction {
    match error {
        SheetError::Timeout | SheetError::Transport(_) => RetryAction::Escalate,
        SheetError::Auth(AuthError::Transport(_)) => RetryAction::Escalate,
        SheetError::Api { .. }
        | SheetError::Decode(_)
        | SheetError::Auth(_) => RetryAction::Abort,
    }
}
