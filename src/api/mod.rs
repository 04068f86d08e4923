pub mod auth;
pub mod cbr;
pub mod sheets;

pub use auth::{ServiceAccountAuth, ServiceAccountKey, StaticToken, TokenProvider};
pub use cbr::CbrClient;
pub use sheets::SheetsClient;
