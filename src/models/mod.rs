use serde::{Deserialize, Serialize};
use std::fmt;

/// Business identifier of an order (`order_id` column, unique)
pub type OrderId = i32;

/// One spreadsheet row as delivered by the source: `[row_num, order_id, price_usd, delivery_date]`
pub type RawRow = Vec<String>;

/// Stored in `price_rur` when no exchange rate could be fetched for the cycle
pub const PRICE_SENTINEL: &str = "???";

/// Price converted into local currency, or the sentinel when the rate is missing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LocalPrice {
    Converted(f64),
    Unavailable,
}

impl LocalPrice {
    /// Convert a foreign price with an optional rate
    pub fn compute(price_foreign: i64, rate: Option<f64>) -> Self {
        match rate {
            Some(rate) => LocalPrice::Converted(price_foreign as f64 * rate),
            None => LocalPrice::Unavailable,
        }
    }
}

impl fmt::Display for LocalPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Debug keeps the trailing ".0" on whole numbers (56025.0, not 56025)
            LocalPrice::Converted(v) => write!(f, "{:?}", v),
            LocalPrice::Unavailable => f.write_str(PRICE_SENTINEL),
        }
    }
}

/// An order as it is written to the `orders` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub sequence_number: String,
    pub order_id: OrderId,
    pub price_foreign: String,
    pub delivery_date: String,
    pub price_local: LocalPrice,
}

/// Why a source row could not be turned into an [`Order`]
#[derive(Debug, Clone, PartialEq)]
pub enum RowRejection {
    /// Order id cell missing or not an integer
    InvalidOrderId { row: usize, value: String },
    /// Foreign price cell missing or not an integer
    InvalidPrice {
        row: usize,
        order_id: OrderId,
        value: String,
    },
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRejection::InvalidOrderId { row, value } => {
                write!(f, "row {}: invalid order id {:?}", row, value)
            }
            RowRejection::InvalidPrice {
                row,
                order_id,
                value,
            } => write!(
                f,
                "row {} (order {}): invalid price {:?}",
                row, order_id, value
            ),
        }
    }
}

/// Read a cell, treating cells trimmed off the end of the row as empty
pub fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|s| s.trim()).unwrap_or("")
}
