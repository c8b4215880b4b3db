//! The three caches between the market data feed and readers.
pub mod converter;
pub mod rates;
pub mod summary;

pub use converter::{ConvertedValues, CurrencyConverter, ValueBundle};
pub use rates::RateCache;
pub use summary::{CacheEntry, SummaryCache};
