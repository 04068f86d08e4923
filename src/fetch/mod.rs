pub mod rate;
pub mod source;

pub use rate::{RateFetcher, RateSource};
pub use source::{SheetSource, SourceFetcher, SourceSnapshot};
