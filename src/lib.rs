// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod retry;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types
pub use config::Settings;
pub use db::{MemoryOrderStore, OrderStore, PgOrderStore};
pub use fetch::{RateFetcher, SourceFetcher, SourceSnapshot};
pub use models::*;
pub use sync::{CycleOutcome, SkipReason, Synchronizer};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
