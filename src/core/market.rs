//! Market data abstractions and the immutable state the rate cache serves.

use crate::core::error::{ConversionError, FetchError};
use crate::core::ledger::Transaction;
use crate::core::rates::RateTable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Spot price of 1 BTC in the two reference currencies, captured together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub currency_a: String,
    pub price_in_a: f64,
    pub currency_b: String,
    pub price_in_b: f64,
    pub captured_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Price in `currency` if it is one of the two reference currencies.
    pub fn price_in(&self, currency: &str) -> Option<f64> {
        if currency.eq_ignore_ascii_case(&self.currency_a) {
            Some(self.price_in_a)
        } else if currency.eq_ignore_ascii_case(&self.currency_b) {
            Some(self.price_in_b)
        } else {
            None
        }
    }
}

/// Where a served price came from, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Live,
    Stale,
    LastTransaction,
    Unavailable,
}

impl Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PriceSource::Live => "live",
                PriceSource::Stale => "stale",
                PriceSource::LastTransaction => "last transaction",
                PriceSource::Unavailable => "unavailable",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub currency: String,
    pub price: f64,
    pub source: PriceSource,
    pub captured_at: Option<DateTime<Utc>>,
}

impl PriceQuote {
    pub fn unavailable(currency: &str) -> Self {
        Self {
            currency: currency.to_ascii_uppercase(),
            price: 0.0,
            source: PriceSource::Unavailable,
            captured_at: None,
        }
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self.source, PriceSource::Live | PriceSource::Stale)
    }
}

/// Everything the rate cache holds, swapped as one unit.
///
/// The price and the rate table refresh on different cadences, so they can
/// come from different fetches, but a reader holding one `MarketState` always
/// sees a pair that was current together.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    pub price: Option<PriceSnapshot>,
    pub table: Option<Arc<RateTable>>,
    pub price_fetched_at: Option<Instant>,
    pub rates_fetched_at: Option<Instant>,
}

impl MarketState {
    /// Last successful fetch of either half in this process.
    pub fn last_success(&self) -> Option<Instant> {
        self.price_fetched_at.max(self.rates_fetched_at)
    }

    /// Converts with the held table. `Ok(None)` means no table has been
    /// loaded yet, which is a different thing from an underivable pair.
    pub fn try_convert(
        &self,
        value: f64,
        from: &str,
        to: &str,
    ) -> Result<Option<f64>, ConversionError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(Some(value));
        }
        match &self.table {
            Some(table) => table.convert(value, from, to).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves the BTC price in `currency` through the fallback chain: the
    /// held snapshot (live or stale), then the most recent transaction's
    /// price, then a zero quote. Only an underivable pair is an error.
    pub fn quote<F>(
        &self,
        currency: &str,
        stale_after: Duration,
        last_transaction: F,
    ) -> Result<PriceQuote, ConversionError>
    where
        F: FnOnce() -> Option<Transaction>,
    {
        if let Some(snapshot) = &self.price {
            let price = match snapshot.price_in(currency) {
                Some(price) => Some(price),
                None => self.try_convert(
                    snapshot.price_in_a,
                    &snapshot.currency_a,
                    currency,
                )?,
            };
            if let Some(price) = price {
                let fresh = self
                    .price_fetched_at
                    .is_some_and(|at| at.elapsed() <= stale_after);
                return Ok(PriceQuote {
                    currency: currency.to_ascii_uppercase(),
                    price,
                    source: if fresh {
                        PriceSource::Live
                    } else {
                        PriceSource::Stale
                    },
                    captured_at: Some(snapshot.captured_at),
                });
            }
        }

        if let Some(transaction) = last_transaction()
            && let Some(price) = self.try_convert(transaction.price, &transaction.currency, currency)?
        {
            return Ok(PriceQuote {
                currency: currency.to_ascii_uppercase(),
                price,
                source: PriceSource::LastTransaction,
                captured_at: Some(transaction.date),
            });
        }

        Ok(PriceQuote::unavailable(currency))
    }
}

#[async_trait]
pub trait BtcPriceProvider: Send + Sync {
    async fn fetch_btc_price(&self) -> Result<PriceSnapshot, FetchError>;
}

#[async_trait]
pub trait FiatRateProvider: Send + Sync {
    /// Rates from `pivot` to each of `currencies`.
    async fn fetch_fiat_rates(
        &self,
        pivot: &str,
        currencies: &[String],
    ) -> Result<RateTable, FetchError>;
}

/// The upstream feed. Stateless; every call may fail.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_btc_price(&self) -> Result<PriceSnapshot, FetchError>;

    async fn fetch_fiat_rates(
        &self,
        pivot: &str,
        currencies: &[String],
    ) -> Result<RateTable, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::fixtures::{buy, day};

    fn snapshot() -> PriceSnapshot {
        PriceSnapshot {
            currency_a: "USD".to_string(),
            price_in_a: 30000.0,
            currency_b: "EUR".to_string(),
            price_in_b: 27000.0,
            captured_at: day(5),
        }
    }

    fn live_state() -> MarketState {
        MarketState {
            price: Some(snapshot()),
            table: Some(Arc::new(
                RateTable::new("EUR", day(5))
                    .with_rate("EUR", "USD", 1.10)
                    .with_rate("EUR", "PLN", 4.40),
            )),
            price_fetched_at: Some(Instant::now()),
            rates_fetched_at: Some(Instant::now()),
        }
    }

    const STALE_AFTER: Duration = Duration::from_secs(60);

    #[test]
    fn test_reference_currency_quote_is_live() {
        let quote = live_state().quote("eur", STALE_AFTER, || None).unwrap();
        assert_eq!(quote.price, 27000.0);
        assert_eq!(quote.source, PriceSource::Live);
        assert_eq!(quote.currency, "EUR");
        assert_eq!(quote.captured_at, Some(day(5)));
    }

    #[test]
    fn test_other_currency_converted_from_currency_a() {
        let quote = live_state().quote("PLN", STALE_AFTER, || None).unwrap();
        assert!((quote.price - 30000.0 / 1.10 * 4.40).abs() < 1e-6);
    }

    #[test]
    fn test_unroutable_currency_is_an_error() {
        let result = live_state().quote("JPY", STALE_AFTER, || None);
        assert_eq!(result, Err(ConversionError::rate_unknown("USD", "JPY")));
    }

    #[test]
    fn test_restored_snapshot_is_stale() {
        let state = MarketState {
            price_fetched_at: None,
            ..live_state()
        };
        let quote = state.quote("USD", STALE_AFTER, || None).unwrap();
        assert_eq!(quote.source, PriceSource::Stale);
        assert!(quote.is_reliable());
    }

    #[test]
    fn test_falls_back_to_last_transaction() {
        let state = MarketState::default();
        let quote = state
            .quote("USD", STALE_AFTER, || {
                Some(buy("1", 0.1, 21000.0, "USD", day(3)))
            })
            .unwrap();
        assert_eq!(quote.price, 21000.0);
        assert_eq!(quote.source, PriceSource::LastTransaction);
        assert!(!quote.is_reliable());
    }

    #[test]
    fn test_falls_back_to_zero_without_any_data() {
        let state = MarketState::default();
        let quote = state.quote("USD", STALE_AFTER, || None).unwrap();
        assert_eq!(quote, PriceQuote::unavailable("USD"));

        // A transaction in a currency we cannot convert yet is skipped, not an error
        let quote = state
            .quote("EUR", STALE_AFTER, || Some(buy("1", 0.1, 21000.0, "USD", day(3))))
            .unwrap();
        assert_eq!(quote.source, PriceSource::Unavailable);
    }

    #[test]
    fn test_last_success_is_latest_of_both_halves() {
        let earlier = Instant::now();
        let later = earlier + Duration::from_secs(1);
        let state = MarketState {
            price_fetched_at: Some(later),
            rates_fetched_at: Some(earlier),
            ..MarketState::default()
        };
        assert_eq!(state.last_success(), Some(later));
        assert_eq!(MarketState::default().last_success(), None);
    }
}
