//! Domain types and the pure valuation logic

pub mod config;
pub mod error;
pub mod ledger;
pub mod log;
pub mod market;
pub mod rates;
pub mod valuation;

// Types most callers need
pub use error::{ConversionError, FetchError};
pub use ledger::{Ledger, MemoryLedger, Transaction, TransactionKind, ValidityKey};
pub use market::{MarketDataSource, MarketState, PriceQuote, PriceSnapshot, PriceSource};
pub use rates::RateTable;
pub use valuation::PortfolioSummary;
