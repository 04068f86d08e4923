use crate::models::OrderId;
use thiserror::Error;

/// Startup configuration problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Errors from a single exchange-rate request
#[derive(Error, Debug)]
pub enum RateError {
    #[error("rate request timed out")]
    Timeout,

    #[error("rate request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("rate service returned HTTP {0}")]
    Status(u16),

    #[error("unparseable rate value {0:?}")]
    Parse(String),
}

impl From<reqwest::Error> for RateError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RateError::Timeout
        } else {
            RateError::Transport(e)
        }
    }
}

/// Errors obtaining a service-account access token
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid credential file: {0}")]
    Credential(String),

    #[error("failed to sign token request: {0}")]
    Signing(#[source] anyhow::Error),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors from a single spreadsheet window request
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("sheet request timed out")]
    Timeout,

    #[error("sheet request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("sheets API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed sheets response: {0}")]
    Decode(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<reqwest::Error> for SheetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SheetError::Timeout
        } else if e.is_decode() {
            SheetError::Decode(e.to_string())
        } else {
            SheetError::Transport(e)
        }
    }
}

/// Errors from the order table
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("order {0} already exists")]
    Duplicate(OrderId),

    #[error("malformed order {order_id}: {reason}")]
    Malformed { order_id: OrderId, reason: String },

    #[error("orders table does not exist")]
    MissingTable,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
