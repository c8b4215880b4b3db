//! Error kinds shared by the market data and conversion layers.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream fetch.
///
/// These never reach readers of the caches: the rate cache keeps serving its
/// last good data and the failure is logged by whoever triggered the refresh.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("No usable data: {0}")]
    NoDataAvailable(String),
    #[error("Request failed: {0}")]
    Http(String),
}

/// A currency pair that cannot be derived from the rates currently held.
///
/// Unlike [`FetchError`] this points at a configuration problem (an enabled
/// currency with no route to a known rate) and is reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("No conversion rate known for {from} -> {to}")]
    RateUnknown { from: String, to: String },
}

impl ConversionError {
    pub fn rate_unknown(from: &str, to: &str) -> Self {
        ConversionError::RateUnknown {
            from: from.to_ascii_uppercase(),
            to: to.to_ascii_uppercase(),
        }
    }
}
